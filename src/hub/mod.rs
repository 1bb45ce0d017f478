//! # Session Hub Module
//!
//! The session layer on top of the duty-cycle transceiver: a single router
//! loop consumes decoded inbound frames, drives the pairing state machine,
//! maintains the per-device state cache and produces outbound frames back
//! into the transceiver queue. External callers reach it through a cloneable
//! [`HubHandle`]: validated device commands, point-in-time cache snapshots
//! and an event subscription.
//!
//! ## Events
//!
//! Pairing results and thermostat updates are published on an explicit
//! broadcast channel. A persistence or notification layer subscribes with
//! [`HubHandle::subscribe`]; slow subscribers only lag their own receiver.
//!
//! ## Ownership
//!
//! The router loop is the only writer of the state cache, the pairing
//! window, the ack dedup ring and the outbound message counter. Handles read
//! the cache through a lock-guarded snapshot copy, so no external access can
//! race a merge in progress.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::cul::CulHandle;
use crate::protocol::{
    DeviceKind, Header, Message, ProtocolError, TemperatureProfile, ThermostatMode, ValveConfig,
};

pub mod router;
pub mod server;
pub mod state;

pub use server::CulHub;
pub use state::{Device, DeviceState};

/// Events emitted to external subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    DevicePaired {
        device_id: u32,
    },
    DeviceRepaired {
        device_id: u32,
    },
    ThermostatUpdate {
        device_id: u32,
        measured_temperature: Option<f32>,
        desired_temperature: Option<f32>,
        mode: Option<ThermostatMode>,
        battery_low: Option<bool>,
    },
}

/// Commands accepted from external callers, executed by the router loop
/// (which owns the outbound message counter).
#[derive(Debug)]
pub enum HubCommand {
    SetTemperature {
        device_id: u32,
        temperature: f32,
        mode: ThermostatMode,
    },
    SetTime {
        device_id: u32,
    },
    SetGroupId {
        device_id: u32,
        group: u8,
    },
    RemoveGroupId {
        device_id: u32,
    },
    ConfigValve {
        device_id: u32,
        config: ValveConfig,
    },
    ConfigTemperatures {
        device_id: u32,
        profile: TemperatureProfile,
    },
    AddLinkPartner {
        device_id: u32,
        partner_id: u32,
        partner_kind: DeviceKind,
    },
    RemoveLinkPartner {
        device_id: u32,
        partner_id: u32,
        partner_kind: DeviceKind,
    },
    WakeUp {
        device_id: u32,
    },
    EnablePairing {
        duration: Duration,
    },
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("device id 0x{0:X} exceeds the 24-bit address space")]
    InvalidDeviceId(u32),
    #[error("hub is shutting down")]
    Closed,
}

/// Cloneable external surface of the hub.
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) command_tx: mpsc::Sender<HubCommand>,
    pub(crate) states: Arc<RwLock<HashMap<u32, DeviceState>>>,
    pub(crate) devices: Arc<RwLock<HashMap<u32, Device>>>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) cul: CulHandle,
}

impl HubHandle {
    /// Subscribe to pairing and thermostat events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Set the desired temperature and operating mode of a thermostat.
    pub async fn set_temperature(
        &self,
        device_id: u32,
        temperature: f32,
        mode: ThermostatMode,
    ) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.send(HubCommand::SetTemperature {
            device_id,
            temperature,
            mode,
        })
        .await
    }

    /// Push the current wall-clock time to a device.
    pub async fn set_time(&self, device_id: u32) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.send(HubCommand::SetTime { device_id }).await
    }

    pub async fn set_group_id(&self, device_id: u32, group: u8) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.send(HubCommand::SetGroupId { device_id, group }).await
    }

    pub async fn remove_group_id(&self, device_id: u32) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.send(HubCommand::RemoveGroupId { device_id }).await
    }

    /// Write a valve configuration. Fails synchronously with
    /// [`ProtocolError::MissingPayloadParameter`] if a field is absent;
    /// nothing is enqueued in that case.
    pub async fn config_valve(&self, device_id: u32, config: ValveConfig) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        // Probe-encode against codec preconditions before enqueueing.
        Message::ConfigValve {
            header: Header::default(),
            config,
        }
        .encode()?;
        self.send(HubCommand::ConfigValve { device_id, config })
            .await
    }

    /// Write a comfort/eco/limit temperature profile. Validation as in
    /// [`HubHandle::config_valve`].
    pub async fn config_temperatures(
        &self,
        device_id: u32,
        profile: TemperatureProfile,
    ) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        Message::ConfigTemperatures {
            header: Header::default(),
            profile,
        }
        .encode()?;
        self.send(HubCommand::ConfigTemperatures { device_id, profile })
            .await
    }

    /// Link two devices so they exchange state directly.
    pub async fn add_link_partner(
        &self,
        device_id: u32,
        partner_id: u32,
        partner_kind: DeviceKind,
    ) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.check_device_id(partner_id)?;
        self.send(HubCommand::AddLinkPartner {
            device_id,
            partner_id,
            partner_kind,
        })
        .await
    }

    pub async fn remove_link_partner(
        &self,
        device_id: u32,
        partner_id: u32,
        partner_kind: DeviceKind,
    ) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.check_device_id(partner_id)?;
        self.send(HubCommand::RemoveLinkPartner {
            device_id,
            partner_id,
            partner_kind,
        })
        .await
    }

    /// Wake a sleeping device so it listens for follow-up commands.
    pub async fn wake_up(&self, device_id: u32) -> Result<(), HubError> {
        self.check_device_id(device_id)?;
        self.send(HubCommand::WakeUp { device_id }).await
    }

    /// Open the factory-reset pairing window for `duration`.
    pub async fn enable_pairing(&self, duration: Duration) -> Result<(), HubError> {
        self.send(HubCommand::EnablePairing { duration }).await
    }

    /// Point-in-time copy of the state cache, optionally restricted to one
    /// device kind.
    pub fn current_state(&self, kind: Option<DeviceKind>) -> HashMap<u32, DeviceState> {
        let states = self.states.read().unwrap();
        let devices = self.devices.read().unwrap();
        state::snapshot(&states, &devices, kind)
    }

    /// Copy of the device directory.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    /// Whether enough duty-cycle budget remains for a time-critical send.
    pub fn has_send_budget(&self) -> bool {
        self.cul.has_send_budget()
    }

    /// Request a cooperative shutdown of both loops.
    pub fn shutdown(&self) {
        self.cul.stop();
    }

    fn check_device_id(&self, device_id: u32) -> Result<(), HubError> {
        if device_id > 0xFF_FFFF {
            return Err(HubError::InvalidDeviceId(device_id));
        }
        Ok(())
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}
