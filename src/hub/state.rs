//! Device directory and per-device state cache records.
//!
//! The cache is a superset across device kinds: a record only ever gains the
//! fields the device actually reports, everything else stays `None`. Records
//! are mutated exclusively by the session router and handed out as clones,
//! so external consumers (an HTTP layer, a history logger) never observe a
//! half-merged update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{
    DeviceKind, Message, ShutterState, ThermostatMode, ThermostatStatus, WallThermostatStatus,
};

/// One entry of the device directory, created when a device first asks to
/// pair and marked paired once our Pong went out.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub sender_id: u32,
    pub kind: DeviceKind,
    pub serial: String,
    pub firmware_version: Option<String>,
    pub paired: bool,
}

/// Most recent decoded attributes of one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub mode: Option<ThermostatMode>,
    pub desired_temperature: Option<f32>,
    pub measured_temperature: Option<f32>,
    pub valve_position: Option<u8>,
    pub locked: Option<bool>,
    pub rf_error: Option<bool>,
    pub battery_low: Option<bool>,
    pub dst_active: Option<bool>,
    pub lan_gateway: Option<bool>,
    pub display_actual_temperature: Option<bool>,
    pub shutter_state: Option<ShutterState>,
    pub button_pressed: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub signal_strength: Option<u8>,
}

impl DeviceState {
    /// Merge the decoded fields of a state-bearing message into this record.
    /// Returns false for message kinds that carry no device state.
    pub fn merge(&mut self, msg: &Message) -> bool {
        match msg {
            Message::ThermostatState { status, .. } => {
                self.merge_thermostat_status(status);
                true
            }
            Message::Ack {
                status: Some(status),
                ..
            } => {
                self.merge_thermostat_status(status);
                true
            }
            Message::WallThermostatState { status, .. } => {
                self.merge_wall_status(status);
                true
            }
            Message::SetTemperature {
                desired_temperature,
                mode,
                ..
            } => {
                self.desired_temperature = Some(*desired_temperature);
                self.mode = Some(*mode);
                true
            }
            Message::WallThermostatControl {
                desired_temperature,
                measured_temperature,
                ..
            } => {
                self.desired_temperature = Some(*desired_temperature);
                self.measured_temperature = Some(*measured_temperature);
                true
            }
            Message::ShutterContactState {
                state,
                rf_error,
                battery_low,
                ..
            } => {
                self.shutter_state = Some(*state);
                self.rf_error = Some(*rf_error);
                self.battery_low = Some(*battery_low);
                true
            }
            Message::PushButtonState {
                pressed,
                rf_error,
                battery_low,
                lan_gateway,
                ..
            } => {
                self.button_pressed = Some(*pressed);
                self.rf_error = Some(*rf_error);
                self.battery_low = Some(*battery_low);
                self.lan_gateway = Some(*lan_gateway);
                true
            }
            _ => false,
        }
    }

    fn merge_thermostat_status(&mut self, status: &ThermostatStatus) {
        self.mode = Some(status.mode);
        self.dst_active = Some(status.dst_active);
        self.lan_gateway = Some(status.lan_gateway);
        self.locked = Some(status.locked);
        self.rf_error = Some(status.rf_error);
        self.battery_low = Some(status.battery_low);
        self.desired_temperature = Some(status.desired_temperature);
        self.valve_position = Some(status.valve_position);
        if let Some(measured) = status.measured_temperature {
            self.measured_temperature = Some(measured);
        }
    }

    fn merge_wall_status(&mut self, status: &WallThermostatStatus) {
        self.mode = Some(status.mode);
        self.dst_active = Some(status.dst_active);
        self.lan_gateway = Some(status.lan_gateway);
        self.locked = Some(status.locked);
        self.rf_error = Some(status.rf_error);
        self.battery_low = Some(status.battery_low);
        self.desired_temperature = Some(status.desired_temperature);
        self.display_actual_temperature = Some(status.display_actual_temperature);
        if let Some(measured) = status.measured_temperature {
            self.measured_temperature = Some(measured);
        }
    }
}

/// Point-in-time copy of the cache, optionally limited to one device kind
/// (the kind comes from the directory, states alone do not know it).
pub fn snapshot(
    states: &HashMap<u32, DeviceState>,
    devices: &HashMap<u32, Device>,
    kind: Option<DeviceKind>,
) -> HashMap<u32, DeviceState> {
    states
        .iter()
        .filter(|(id, _)| match kind {
            None => true,
            Some(kind) => devices.get(id).map(|d| d.kind == kind).unwrap_or(false),
        })
        .map(|(id, state)| (*id, state.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    #[test]
    fn merge_keeps_unreported_fields() {
        let mut state = DeviceState {
            valve_position: Some(40),
            ..DeviceState::default()
        };
        let updated = state.merge(&Message::SetTemperature {
            header: Header::default(),
            desired_temperature: 21.5,
            mode: ThermostatMode::Manual,
        });
        assert!(updated);
        assert_eq!(state.desired_temperature, Some(21.5));
        // A SetTemperature carries no valve position; the old value stays.
        assert_eq!(state.valve_position, Some(40));
    }

    #[test]
    fn merge_does_not_clear_measured_temperature() {
        let mut state = DeviceState {
            measured_temperature: Some(19.8),
            ..DeviceState::default()
        };
        state.merge(&Message::ThermostatState {
            header: Header::default(),
            status: ThermostatStatus {
                mode: ThermostatMode::Auto,
                dst_active: false,
                lan_gateway: false,
                locked: false,
                rf_error: false,
                battery_low: false,
                desired_temperature: 17.0,
                valve_position: 0,
                measured_temperature: None,
            },
        });
        // Status without a measurement leaves the last reading in place.
        assert_eq!(state.measured_temperature, Some(19.8));
        assert_eq!(state.desired_temperature, Some(17.0));
    }

    #[test]
    fn pairing_messages_carry_no_state() {
        let mut state = DeviceState::default();
        let updated = state.merge(&Message::PairPong {
            header: Header::default(),
            device_kind: DeviceKind::Cube,
        });
        assert!(!updated);
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn snapshot_filters_by_directory_kind() {
        let mut states = HashMap::new();
        states.insert(1u32, DeviceState::default());
        states.insert(2u32, DeviceState::default());
        let mut devices = HashMap::new();
        devices.insert(
            1u32,
            Device {
                sender_id: 1,
                kind: DeviceKind::HeatingThermostat,
                serial: "KEQ0000001".into(),
                firmware_version: None,
                paired: true,
            },
        );
        devices.insert(
            2u32,
            Device {
                sender_id: 2,
                kind: DeviceKind::ShutterContact,
                serial: "KEQ0000002".into(),
                firmware_version: None,
                paired: true,
            },
        );
        let slice = snapshot(&states, &devices, Some(DeviceKind::HeatingThermostat));
        assert_eq!(slice.len(), 1);
        assert!(slice.contains_key(&1));
    }
}
