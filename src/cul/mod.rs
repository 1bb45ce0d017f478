//! # Duty-Cycle Transceiver Module
//!
//! Owns the serial connection to the CUL stick and runs the single loop that
//! multiplexes it: inbound lines are classified (budget report, protocol
//! frame, other) and outbound commands drain from a bounded queue, gated by
//! the regulatory duty-cycle budget ("1% rule") the stick enforces.
//!
//! The transmit budget is a time-decaying allowance of milliseconds the stick
//! reports only when asked (`X`). We track it pessimistically: any written
//! protocol frame zeroes the local counter until the next budget report,
//! because the true remaining value is unknown after a send.
//!
//! Connection lifecycle: `Closed → Handshaking → Ready`, with a bounded
//! reconnect/backoff on I/O failure and a fatal stop once the backoff
//! schedule is exhausted. Closing the inbound frame channel on exit is the
//! shutdown signal for the session router downstream.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::logutil::escape_log;

pub mod port;

pub use port::{serial_opener, CulPort, PortOpener};

/// Bounded outbound queue; when full the oldest unsent command is displaced.
const MAX_QUEUED_COMMANDS: usize = 10;

/// Plain command asking the stick for the remaining transmit budget.
const COMMAND_REQUEST_BUDGET: &str = "X";

/// Outbound protocol frames start with this marker; writing one invalidates
/// the local budget counter.
const SEND_MARKER: &str = "Zs";

/// Budget floor (internal units, ms × 10) for time-critical replies.
const MIN_SEND_BUDGET: u32 = 2000;

/// Timing knobs for the transceiver loop. Defaults match the stick's real
/// settle requirements; tests shrink them to keep the loop fast.
#[derive(Debug, Clone)]
pub struct CulTiming {
    /// Wait after opening the port before the first command (nanoCUL-style
    /// sticks drop bytes while their USB bridge settles).
    pub open_settle: Duration,
    /// Gap between firmware version requests during the handshake.
    pub version_retry_delay: Duration,
    /// Settle delay after each init command.
    pub init_settle: Duration,
    /// Sleep per Ready-loop iteration; the line is slow, busy-polling only
    /// wastes CPU.
    pub poll_interval: Duration,
    /// Reconnect backoff schedule; one attempt per entry.
    pub reconnect_backoff: Vec<Duration>,
}

impl Default for CulTiming {
    fn default() -> Self {
        CulTiming {
            open_settle: Duration::from_secs(2),
            version_retry_delay: Duration::from_secs(1),
            init_settle: Duration::from_millis(300),
            poll_interval: Duration::from_millis(200),
            reconnect_backoff: vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40),
            ],
        }
    }
}

/// Version request attempts during the handshake.
const VERSION_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum CulError {
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CUL stick did not report a firmware version")]
    NoVersion,
    #[error("serial device lost and reconnect attempts exhausted")]
    ReconnectExhausted,
}

/// Cloneable view of the transceiver shared with the session router and the
/// application: the outbound queue, the budget counter and the stop flag.
#[derive(Clone)]
pub struct CulHandle {
    send_queue: Arc<Mutex<VecDeque<String>>>,
    budget: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    version: Arc<Mutex<Option<String>>>,
}

impl CulHandle {
    fn new() -> Self {
        CulHandle {
            send_queue: Arc::new(Mutex::new(VecDeque::new())),
            budget: Arc::new(AtomicU32::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            version: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a command line for transmission. Commands are latency-sensitive
    /// device replies, not a durable log: when the queue is full the oldest
    /// unsent command is displaced in favour of the new one.
    pub fn enqueue_command(&self, command: String) {
        let mut queue = self.send_queue.lock().unwrap();
        queue.push_front(command);
        if queue.len() > MAX_QUEUED_COMMANDS {
            if let Some(displaced) = queue.pop_back() {
                warn!(
                    "outbound queue full, displacing oldest command {}",
                    escape_log(&displaced)
                );
            }
        }
    }

    /// Whether enough budget remains for a time-critical reply (a pairing
    /// Pong must reach the device before its receive window closes).
    pub fn has_send_budget(&self) -> bool {
        self.budget.load(Ordering::SeqCst) >= MIN_SEND_BUDGET
    }

    /// Remaining transmit budget in internal units (ms × 10).
    pub fn remaining_budget(&self) -> u32 {
        self.budget.load(Ordering::SeqCst)
    }

    /// Firmware version the stick reported during the handshake.
    pub fn cul_version(&self) -> Option<String> {
        self.version.lock().unwrap().clone()
    }

    /// Request a cooperative stop; observed within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn pop_command(&self) -> Option<String> {
        self.send_queue.lock().unwrap().pop_back()
    }

    fn requeue_command(&self, command: String) {
        self.send_queue.lock().unwrap().push_back(command);
    }

    #[cfg(test)]
    fn queued_commands(&self) -> usize {
        self.send_queue.lock().unwrap().len()
    }
}

/// The transceiver task. Owns the port exclusively; everything else reaches
/// the line through the [`CulHandle`] queue.
pub struct CulTransceiver {
    opener: PortOpener,
    port: Option<Box<dyn CulPort>>,
    frame_tx: mpsc::Sender<String>,
    handle: CulHandle,
    timing: CulTiming,
}

impl CulTransceiver {
    pub fn new(
        opener: PortOpener,
        frame_tx: mpsc::Sender<String>,
        timing: CulTiming,
    ) -> (Self, CulHandle) {
        let handle = CulHandle::new();
        (
            CulTransceiver {
                opener,
                port: None,
                frame_tx,
                handle: handle.clone(),
                timing,
            },
            handle,
        )
    }

    /// Run until stopped or fatally disconnected. Dropping `frame_tx` on
    /// return closes the inbound channel and lets the router wind down.
    pub async fn run(mut self) -> Result<(), CulError> {
        if let Err(err) = self.open_port().await {
            warn!("initial CUL handshake failed: {}", err);
            self.reconnect().await?;
        }
        info!("CUL transceiver ready");

        while !self.handle.is_stopped() {
            match self.poll_once().await {
                Ok(()) => {}
                Err(CulError::Io(err)) => {
                    warn!("serial fault <{}>, reopening device", err);
                    self.reconnect().await?;
                }
                Err(err) => {
                    self.handle.stop();
                    return Err(err);
                }
            }
            sleep(self.timing.poll_interval).await;
        }
        info!("CUL transceiver stopping");
        Ok(())
    }

    /// One Ready-loop iteration: classify one inbound line, drain at most one
    /// outbound command, keep the budget fresh.
    async fn poll_once(&mut self) -> Result<(), CulError> {
        self.receive_line()?;
        self.send_pending()?;
        if self.handle.remaining_budget() == 0 {
            // Budget unknown; ask before the next iteration so sends are not
            // starved waiting for a report that was never requested.
            self.write_line(COMMAND_REQUEST_BUDGET)?;
        }
        Ok(())
    }

    fn receive_line(&mut self) -> Result<(), CulError> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Ok(()),
        };
        if let Some(line) = port.read_line()? {
            if let Some(rest) = line.strip_prefix("21") {
                // Budget report: decimal milliseconds of airtime left.
                match rest.trim().parse::<u32>() {
                    Ok(ms) => {
                        let budget = ms.saturating_mul(10).max(1);
                        self.handle.budget.store(budget, Ordering::SeqCst);
                        debug!("pending budget: {} internal units", budget);
                    }
                    Err(_) => debug!("unparsable budget report '{}'", escape_log(&line)),
                }
            } else if line.starts_with('Z') {
                match self.frame_tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(line)) => {
                        warn!("inbound frame queue full, dropping {}", escape_log(&line));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Router is gone; nothing left to serve.
                        self.handle.stop();
                    }
                }
            } else {
                debug!("unhandled response from CUL: '{}'", escape_log(&line));
            }
        }
        Ok(())
    }

    fn send_pending(&mut self) -> Result<(), CulError> {
        let command = match self.handle.pop_command() {
            Some(command) => command,
            None => return Ok(()),
        };
        // The stick transmits roughly one byte per ten internal units; only
        // send when the whole frame fits in the remaining allowance.
        if self.handle.remaining_budget() > command.len() as u32 * 10 {
            self.write_line(&command)?;
        } else {
            debug!("not enough budget for {} chars, re-queueing", command.len());
            self.handle.requeue_command(command);
            self.write_line(COMMAND_REQUEST_BUDGET)?;
        }
        Ok(())
    }

    fn write_line(&mut self, command: &str) -> Result<(), CulError> {
        // True remaining budget is unknown the moment a frame goes out;
        // invalidate before the write so the invariant holds even on error.
        if command.starts_with(SEND_MARKER) {
            self.handle.budget.store(0, Ordering::SeqCst);
        }
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
        debug!("writing command {}", escape_log(command));
        port.write_line(command)?;
        Ok(())
    }

    /// Open the port and run the init handshake: firmware version (up to 10
    /// requests), then enable signal-strength reporting (`X21`), enable
    /// Moritz frame reception (`Zr`) and disable the legacy FHT mode (`T01`).
    async fn open_port(&mut self) -> Result<(), CulError> {
        self.port = None;
        self.handle.budget.store(0, Ordering::SeqCst);

        let mut port = (self.opener)()?;
        sleep(self.timing.open_settle).await;

        // Drain boot noise before talking to the stick.
        while let Some(line) = port.read_line()? {
            debug!("discarding boot output '{}'", escape_log(&line));
        }

        let mut version = None;
        for _ in 0..VERSION_ATTEMPTS {
            port.write_line("V")?;
            sleep(self.timing.version_retry_delay).await;
            if let Some(line) = port.read_line()? {
                version = Some(line);
                break;
            }
            info!("no version from CUL reported?");
        }
        let version = version.ok_or(CulError::NoVersion)?;
        info!("CUL reported version {}", escape_log(&version));
        *self.handle.version.lock().unwrap() = Some(version);

        for command in ["X21", "Zr", "T01"] {
            port.write_line(command)?;
            sleep(self.timing.init_settle).await;
        }
        self.port = Some(port);
        Ok(())
    }

    /// Bounded reconnect: one attempt per backoff entry, fatal afterwards.
    /// Queued outbound commands survive; only the port handle is replaced.
    async fn reconnect(&mut self) -> Result<(), CulError> {
        self.port = None;
        self.handle.budget.store(0, Ordering::SeqCst);

        let backoff = self.timing.reconnect_backoff.clone();
        for delay in backoff {
            sleep(delay).await;
            if self.handle.is_stopped() {
                return Ok(());
            }
            match self.open_port().await {
                Ok(()) => {
                    info!("serial device reopened");
                    return Ok(());
                }
                Err(err) => warn!("reopen attempt failed: {}", err),
            }
        }
        error!("unable to reopen serial device, quitting");
        self.handle.stop();
        Err(CulError::ReconnectExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_displaces_oldest_when_full() {
        let handle = CulHandle::new();
        for i in 0..12 {
            handle.enqueue_command(format!("Zs{:02}", i));
        }
        assert_eq!(handle.queued_commands(), MAX_QUEUED_COMMANDS);
        // Oldest two were displaced; the next command popped is number 2.
        assert_eq!(handle.pop_command().as_deref(), Some("Zs02"));
    }

    #[test]
    fn requeued_command_stays_next_in_line() {
        let handle = CulHandle::new();
        handle.enqueue_command("ZsAA".into());
        handle.enqueue_command("ZsBB".into());
        let first = handle.pop_command().unwrap();
        assert_eq!(first, "ZsAA");
        handle.requeue_command(first);
        assert_eq!(handle.pop_command().as_deref(), Some("ZsAA"));
    }

    #[test]
    fn send_budget_threshold() {
        let handle = CulHandle::new();
        assert!(!handle.has_send_budget());
        handle.budget.store(1999, Ordering::SeqCst);
        assert!(!handle.has_send_budget());
        handle.budget.store(2000, Ordering::SeqCst);
        assert!(handle.has_send_budget());
    }
}
