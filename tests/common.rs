//! Test utilities & fixtures.
//!
//! Provides a scripted serial link standing in for a CUL stick, plus config
//! and timing fixtures that keep the loops fast and deterministic.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use culmax::config::{Config, CulConfig, HubConfig, LoggingConfig};
use culmax::cul::{CulPort, CulTiming, PortOpener};

/// Shared state of one scripted serial link, visible to the test while the
/// transceiver loop drives the port.
#[derive(Default)]
pub struct LinkState {
    incoming: VecDeque<String>,
    written: Vec<String>,
    /// Milliseconds reported in reply to each budget query.
    budget_ms: u32,
    /// Fail the next read or write with an I/O error.
    fail_next: bool,
    /// Swallow version requests so the handshake never completes.
    mute: bool,
    /// Remaining budget-query replies; `None` means unlimited.
    budget_replies: Option<u32>,
    opens: usize,
}

/// Handle to a scripted link; clones share the same state.
#[derive(Clone, Default)]
pub struct FakeLink(Arc<Mutex<LinkState>>);

#[allow(dead_code)] // Not every integration test exercises every knob.
impl FakeLink {
    pub fn new(budget_ms: u32) -> Self {
        let link = FakeLink::default();
        link.0.lock().unwrap().budget_ms = budget_ms;
        link
    }

    /// Deliver one inbound line (a frame, a budget report, noise).
    pub fn push_line(&self, line: &str) {
        self.0.lock().unwrap().incoming.push_back(line.to_string());
    }

    /// Deliver a protocol frame with a signal-strength suffix appended, as
    /// the stick does once `X21` reporting is enabled.
    pub fn push_frame(&self, frame: &str) {
        self.push_line(&format!("{}3A", frame));
    }

    /// Everything written to the port so far.
    pub fn written(&self) -> Vec<String> {
        self.0.lock().unwrap().written.clone()
    }

    /// Written protocol frames only (lines starting with `Zs`).
    pub fn sent_frames(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .written
            .iter()
            .filter(|line| line.starts_with("Zs"))
            .cloned()
            .collect()
    }

    pub fn set_budget(&self, budget_ms: u32) {
        self.0.lock().unwrap().budget_ms = budget_ms;
    }

    /// Answer only the next `n` budget queries, then go silent.
    pub fn limit_budget_replies(&self, n: u32) {
        self.0.lock().unwrap().budget_replies = Some(n);
    }

    pub fn fail_next(&self) {
        self.0.lock().unwrap().fail_next = true;
    }

    pub fn mute(&self) {
        self.0.lock().unwrap().mute = true;
    }

    /// How many times the port has been (re)opened.
    pub fn opens(&self) -> usize {
        self.0.lock().unwrap().opens
    }

    pub fn opener(&self) -> PortOpener {
        let link = self.clone();
        Box::new(move || {
            link.0.lock().unwrap().opens += 1;
            Ok(Box::new(FakePort(link.clone())) as Box<dyn CulPort>)
        })
    }
}

struct FakePort(FakeLink);

impl CulPort for FakePort {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut state = self.0 .0.lock().unwrap();
        if state.fail_next {
            state.fail_next = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted fault"));
        }
        Ok(state.incoming.pop_front())
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.0 .0.lock().unwrap();
        if state.fail_next {
            state.fail_next = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted fault"));
        }
        state.written.push(line.to_string());
        match line {
            "V" => {
                if !state.mute {
                    state.incoming.push_back("V 1.67 nanoCUL868".to_string());
                }
            }
            "X" => {
                if let Some(remaining) = &mut state.budget_replies {
                    if *remaining == 0 {
                        return Ok(());
                    }
                    *remaining -= 1;
                }
                let budget = state.budget_ms;
                state.incoming.push_back(format!("21  {}", budget));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Timing with all real-world settle delays collapsed; loops spin in
/// microseconds instead of seconds.
pub fn fast_timing() -> CulTiming {
    CulTiming {
        open_settle: Duration::ZERO,
        version_retry_delay: Duration::ZERO,
        init_settle: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        reconnect_backoff: vec![Duration::from_millis(1); 4],
    }
}

/// Config pointing at nothing in particular; the port is never opened for
/// real because tests inject a scripted opener.
#[allow(dead_code)]
pub fn test_config(paired: &[&str]) -> Config {
    Config {
        cul: CulConfig {
            port: "/dev/null".to_string(),
            baud_rate: 38400,
        },
        hub: HubConfig {
            address: "0x123456".to_string(),
            pairing_timeout_secs: 30,
            paired_devices: paired.iter().map(|s| s.to_string()).collect(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
    }
}

/// Poll until `predicate` holds or the deadline passes; keeps tests free of
/// fixed sleeps that either flake or crawl.
#[allow(dead_code)]
pub async fn wait_for<F: FnMut() -> bool>(mut predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the init handshake finished (`T01` is its last command).
/// Frames pushed earlier would be eaten by the handshake's noise drain.
#[allow(dead_code)]
pub async fn wait_ready(link: &FakeLink) {
    wait_for(
        || link.written().iter().any(|l| l == "T01"),
        "init handshake",
    )
    .await;
}
