//! Hub assembly: wires the transceiver task and the session router together
//! and owns their lifecycle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use log::info;
use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::cul::{serial_opener, CulTiming, CulTransceiver, PortOpener};

use super::router::SessionRouter;
use super::HubHandle;

/// Inbound decoded-frame queue depth. The radio is slow; anything deeper
/// just hides a stuck router.
const INBOUND_QUEUE_CAPACITY: usize = 32;

/// Command queue depth between external handles and the router.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Event fan-out buffer per subscriber.
const EVENT_CAPACITY: usize = 64;

/// The assembled hub: one transceiver loop owning the serial line, one
/// session router owning the device state.
pub struct CulHub {
    transceiver: CulTransceiver,
    router: SessionRouter,
    handle: HubHandle,
}

impl CulHub {
    /// Build a hub talking to the serial device named in the config.
    pub fn new(config: &Config) -> Result<Self> {
        let opener = serial_opener(config.cul.port.clone(), config.cul.baud_rate);
        Self::with_opener(config, opener, CulTiming::default())
    }

    /// Build a hub over an arbitrary port opener. Used by tests to drive the
    /// full stack against scripted serial links.
    pub fn with_opener(config: &Config, opener: PortOpener, timing: CulTiming) -> Result<Self> {
        let sender_id = config
            .hub
            .address()
            .context("invalid hub address in config")?;
        let seeded: HashSet<u32> = config
            .hub
            .parsed_paired_devices()
            .context("invalid paired_devices entry in config")?
            .into_iter()
            .collect();

        let (frame_tx, frame_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let states = Arc::new(RwLock::new(HashMap::new()));
        let devices = Arc::new(RwLock::new(HashMap::new()));

        let (transceiver, cul) = CulTransceiver::new(opener, frame_tx, timing);
        let router = SessionRouter::new(
            sender_id,
            cul.clone(),
            frame_rx,
            command_rx,
            states.clone(),
            devices.clone(),
            events.clone(),
            seeded,
        );
        let handle = HubHandle {
            command_tx,
            states,
            devices,
            events,
            cul,
        };
        Ok(CulHub {
            transceiver,
            router,
            handle,
        })
    }

    /// External surface: commands, snapshots, events, shutdown.
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Run both loops until shutdown or a fatal serial failure. The
    /// transceiver stops first (closing the serial line and the frame
    /// channel); the router observes the closure and winds down.
    pub async fn run(self) -> Result<()> {
        let CulHub {
            transceiver,
            router,
            handle,
        } = self;

        let link = tokio::spawn(transceiver.run());
        router.run().await;
        handle.cul.stop();

        match link.await {
            Ok(Ok(())) => {
                info!("hub stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(err).context("transceiver terminated"),
            Err(err) => Err(err).context("transceiver task panicked"),
        }
    }
}
