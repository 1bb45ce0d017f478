//! # Moritz Protocol Module
//!
//! Message types and wire tables for the Moritz radio protocol spoken by
//! MAX! heating-control devices, as seen through a CUL transceiver stick.
//!
//! Frames arrive and leave as single ASCII lines of upper-case hex. Every
//! message shares a fixed header (counter, flag, kind, sender, receiver,
//! group) followed by a kind-specific payload with bit-packed, scaled and
//! table-encoded fields. The codec itself lives in [`codec`]; this module
//! defines the typed message enum, the lookup tables and the error taxonomy.
//!
//! Message kind ids follow the FHEM CUL_MAX tables. Kinds without a payload
//! decoder registered here are rejected with
//! [`ProtocolError::UnknownMessageKind`] rather than half-parsed.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod codec;

/// Receiver id that addresses every device at once.
pub const BROADCAST_ID: u32 = 0;

/// Lowest desired temperature a thermostat accepts ("OFF").
pub const MIN_TEMPERATURE: f32 = 4.5;
/// Highest desired temperature a thermostat accepts ("ON").
pub const MAX_TEMPERATURE: f32 = 30.5;

/// Errors raised while decoding or encoding Moritz frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("frame length {actual} does not match indicated length {indicated}")]
    LengthMismatch { indicated: usize, actual: usize },
    #[error("frame too short ({0} chars)")]
    TruncatedFrame(usize),
    #[error("unknown message kind 0x{0:02X}")]
    UnknownMessageKind(u8),
    #[error("malformed hex in frame: {0}")]
    MalformedHex(String),
    #[error("invalid payload value: {0}")]
    InvalidValue(String),
    #[error("missing {0} in payload")]
    MissingPayloadParameter(&'static str),
    #[error("{0:?} is device-originated and cannot be encoded")]
    Unencodable(MessageKind),
    #[error("ambiguous trailing payload for {0:?}")]
    AmbiguousPayload(MessageKind),
}

/// Wire message kinds, by numeric id.
///
/// The full FHEM id table is represented so logs can name any kind the stick
/// reports, but only the kinds with a payload rule in [`codec`] decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PairPing,
    PairPong,
    Ack,
    TimeInformation,
    ConfigWeekProfile,
    ConfigTemperatures,
    ConfigValve,
    AddLinkPartner,
    RemoveLinkPartner,
    SetGroupId,
    RemoveGroupId,
    ShutterContactState,
    SetTemperature,
    WallThermostatControl,
    SetComfortTemperature,
    SetEcoTemperature,
    PushButtonState,
    ThermostatState,
    WallThermostatState,
    SetDisplayActualTemperature,
    Reset,
    WakeUp,
}

impl MessageKind {
    /// Numeric id as used in the third header slot on the wire.
    pub fn wire_id(self) -> u8 {
        match self {
            MessageKind::PairPing => 0x00,
            MessageKind::PairPong => 0x01,
            MessageKind::Ack => 0x02,
            MessageKind::TimeInformation => 0x03,
            MessageKind::ConfigWeekProfile => 0x10,
            MessageKind::ConfigTemperatures => 0x11,
            MessageKind::ConfigValve => 0x12,
            MessageKind::AddLinkPartner => 0x20,
            MessageKind::RemoveLinkPartner => 0x21,
            MessageKind::SetGroupId => 0x22,
            MessageKind::RemoveGroupId => 0x23,
            MessageKind::ShutterContactState => 0x30,
            MessageKind::SetTemperature => 0x40,
            MessageKind::WallThermostatControl => 0x42,
            MessageKind::SetComfortTemperature => 0x43,
            MessageKind::SetEcoTemperature => 0x44,
            MessageKind::PushButtonState => 0x50,
            MessageKind::ThermostatState => 0x60,
            MessageKind::WallThermostatState => 0x70,
            MessageKind::SetDisplayActualTemperature => 0x82,
            MessageKind::Reset => 0xF0,
            MessageKind::WakeUp => 0xF1,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        Some(match id {
            0x00 => MessageKind::PairPing,
            0x01 => MessageKind::PairPong,
            0x02 => MessageKind::Ack,
            0x03 => MessageKind::TimeInformation,
            0x10 => MessageKind::ConfigWeekProfile,
            0x11 => MessageKind::ConfigTemperatures,
            0x12 => MessageKind::ConfigValve,
            0x20 => MessageKind::AddLinkPartner,
            0x21 => MessageKind::RemoveLinkPartner,
            0x22 => MessageKind::SetGroupId,
            0x23 => MessageKind::RemoveGroupId,
            0x30 => MessageKind::ShutterContactState,
            0x40 => MessageKind::SetTemperature,
            0x42 => MessageKind::WallThermostatControl,
            0x43 => MessageKind::SetComfortTemperature,
            0x44 => MessageKind::SetEcoTemperature,
            0x50 => MessageKind::PushButtonState,
            0x60 => MessageKind::ThermostatState,
            0x70 => MessageKind::WallThermostatState,
            0x82 => MessageKind::SetDisplayActualTemperature,
            0xF0 => MessageKind::Reset,
            0xF1 => MessageKind::WakeUp,
            _ => return None,
        })
    }
}

/// Kinds of device known to the protocol, by pairing-table id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cube,
    HeatingThermostat,
    HeatingThermostatPlus,
    WallMountedThermostat,
    ShutterContact,
    PushButton,
}

impl DeviceKind {
    pub fn wire_id(self) -> u8 {
        match self {
            DeviceKind::Cube => 0,
            DeviceKind::HeatingThermostat => 1,
            DeviceKind::HeatingThermostatPlus => 2,
            DeviceKind::WallMountedThermostat => 3,
            DeviceKind::ShutterContact => 4,
            DeviceKind::PushButton => 5,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => DeviceKind::Cube,
            1 => DeviceKind::HeatingThermostat,
            2 => DeviceKind::HeatingThermostatPlus,
            3 => DeviceKind::WallMountedThermostat,
            4 => DeviceKind::ShutterContact,
            5 => DeviceKind::PushButton,
            _ => return None,
        })
    }
}

/// Thermostat operating mode, packed into the top bits of several payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatMode {
    Auto,
    Manual,
    Temporary,
    Boost,
}

impl ThermostatMode {
    pub fn bits(self) -> u8 {
        match self {
            ThermostatMode::Auto => 0,
            ThermostatMode::Manual => 1,
            ThermostatMode::Temporary => 2,
            ThermostatMode::Boost => 3,
        }
    }

    /// Only the low two bits are significant.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => ThermostatMode::Auto,
            1 => ThermostatMode::Manual,
            2 => ThermostatMode::Temporary,
            _ => ThermostatMode::Boost,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThermostatMode::Auto => "auto",
            ThermostatMode::Manual => "manual",
            ThermostatMode::Temporary => "temporary",
            ThermostatMode::Boost => "boost",
        }
    }
}

/// Open/closed state reported by shutter contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterState {
    Closed,
    Open,
}

impl ShutterState {
    /// The wire uses 0 for closed and 2 for open; 1 and 3 are unassigned.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(ShutterState::Closed),
            2 => Some(ShutterState::Open),
            _ => None,
        }
    }
}

/// Weekday for the valve decalcification schedule. The wire counts from
/// Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecalcDay {
    Saturday,
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl DecalcDay {
    pub fn wire_id(self) -> u8 {
        match self {
            DecalcDay::Saturday => 0,
            DecalcDay::Sunday => 1,
            DecalcDay::Monday => 2,
            DecalcDay::Tuesday => 3,
            DecalcDay::Wednesday => 4,
            DecalcDay::Thursday => 5,
            DecalcDay::Friday => 6,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => DecalcDay::Saturday,
            1 => DecalcDay::Sunday,
            2 => DecalcDay::Monday,
            3 => DecalcDay::Tuesday,
            4 => DecalcDay::Wednesday,
            5 => DecalcDay::Thursday,
            6 => DecalcDay::Friday,
            _ => return None,
        })
    }
}

/// Boost durations the valve accepts, minutes to 3-bit wire code.
const BOOST_DURATIONS: [(u32, u8); 8] = [
    (0, 0),
    (5, 1),
    (10, 2),
    (15, 3),
    (20, 4),
    (25, 5),
    (30, 6),
    (60, 7),
];

/// Wire code for a boost duration in minutes, if it is one of the fixed steps.
pub fn boost_duration_code(minutes: u32) -> Option<u8> {
    BOOST_DURATIONS
        .iter()
        .find(|(m, _)| *m == minutes)
        .map(|(_, c)| *c)
}

/// Boost duration in minutes for a 3-bit wire code.
pub fn boost_duration_minutes(code: u8) -> Option<u32> {
    BOOST_DURATIONS
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(m, _)| *m)
}

/// Result of a command acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    Ok,
    InvalidCommand,
    Ignore,
}

impl AckState {
    pub fn wire_byte(self) -> u8 {
        match self {
            AckState::Ok => 0x01,
            AckState::InvalidCommand => 0x81,
            AckState::Ignore => 0x00,
        }
    }

    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AckState::Ok),
            0x81 => Some(AckState::InvalidCommand),
            0x00 => Some(AckState::Ignore),
            _ => None,
        }
    }
}

/// Common frame header. `sender_id` and `receiver_id` are 24-bit device
/// addresses; `receiver_id == 0` is a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub counter: u8,
    pub flag: u8,
    pub sender_id: u32,
    pub receiver_id: u32,
    pub group_id: u8,
}

impl Header {
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id == BROADCAST_ID
    }
}

/// Status block shared by ThermostatState reports and Ack messages that carry
/// an embedded state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThermostatStatus {
    pub mode: ThermostatMode,
    pub dst_active: bool,
    pub lan_gateway: bool,
    pub locked: bool,
    pub rf_error: bool,
    pub battery_low: bool,
    pub desired_temperature: f32,
    pub valve_position: u8,
    pub measured_temperature: Option<f32>,
}

/// Status block reported by wall-mounted thermostats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WallThermostatStatus {
    pub mode: ThermostatMode,
    pub dst_active: bool,
    pub lan_gateway: bool,
    pub locked: bool,
    pub rf_error: bool,
    pub battery_low: bool,
    pub desired_temperature: f32,
    pub display_actual_temperature: bool,
    pub measured_temperature: Option<f32>,
    pub until: Option<UntilTime>,
}

/// Half-hour-resolution end time for a temporary temperature override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UntilTime {
    pub day: u8,
    pub month: u8,
    /// Years since 2000.
    pub year: u8,
    pub hour: u8,
    pub half_hour: bool,
}

/// Comfort/eco/limit temperature profile written to a thermostat.
///
/// All fields must be present to encode; a missing field fails with
/// [`ProtocolError::MissingPayloadParameter`] naming it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureProfile {
    pub comfort_temperature: Option<f32>,
    pub eco_temperature: Option<f32>,
    pub max_temperature: Option<f32>,
    pub min_temperature: Option<f32>,
    /// Degrees, -3.5 to +3.5.
    pub measurement_offset: Option<f32>,
    pub window_open_temperature: Option<f32>,
    /// Minutes, multiples of 5.
    pub window_open_duration: Option<u32>,
}

/// Valve behaviour configuration written to a thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValveConfig {
    /// Minutes, one of the fixed boost steps (0, 5, 10, 15, 20, 25, 30, 60).
    pub boost_duration: Option<u32>,
    /// Percent.
    pub boost_valve_position: Option<u8>,
    pub decalc_day: Option<DecalcDay>,
    pub decalc_hour: Option<u8>,
    /// Percent.
    pub max_valve_position: Option<u8>,
    /// Percent.
    pub valve_offset: Option<u8>,
}

/// One decoded Moritz message. Every variant carries the common [`Header`];
/// payload fields are typed per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sent by a device asking to pair (long boost keypress or battery swap).
    PairPing {
        header: Header,
        firmware_version: String,
        device_kind: DeviceKind,
        selftest: u8,
        serial: String,
    },
    /// Our reply accepting a pairing request.
    PairPong {
        header: Header,
        device_kind: DeviceKind,
    },
    /// Command acknowledgement. Often carries an embedded thermostat status.
    Ack {
        header: Header,
        state: Option<AckState>,
        status: Option<ThermostatStatus>,
    },
    /// Time request (empty) or time broadcast (5 packed bytes).
    TimeInformation {
        header: Header,
        time: Option<NaiveDateTime>,
    },
    ConfigTemperatures {
        header: Header,
        profile: TemperatureProfile,
    },
    ConfigValve {
        header: Header,
        config: ValveConfig,
    },
    AddLinkPartner {
        header: Header,
        partner_id: Option<u32>,
        partner_kind: Option<DeviceKind>,
    },
    RemoveLinkPartner {
        header: Header,
        partner_id: Option<u32>,
        partner_kind: Option<DeviceKind>,
    },
    SetGroupId {
        header: Header,
        group: u8,
    },
    RemoveGroupId {
        header: Header,
    },
    ShutterContactState {
        header: Header,
        state: ShutterState,
        unknown_bits: u8,
        rf_error: bool,
        battery_low: bool,
    },
    SetTemperature {
        header: Header,
        desired_temperature: f32,
        mode: ThermostatMode,
    },
    WallThermostatControl {
        header: Header,
        desired_temperature: f32,
        measured_temperature: f32,
    },
    PushButtonState {
        header: Header,
        pressed: bool,
        rf_error: bool,
        battery_low: bool,
        lan_gateway: bool,
    },
    ThermostatState {
        header: Header,
        status: ThermostatStatus,
    },
    WallThermostatState {
        header: Header,
        status: WallThermostatStatus,
    },
    WakeUp {
        header: Header,
    },
    Reset {
        header: Header,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PairPing { .. } => MessageKind::PairPing,
            Message::PairPong { .. } => MessageKind::PairPong,
            Message::Ack { .. } => MessageKind::Ack,
            Message::TimeInformation { .. } => MessageKind::TimeInformation,
            Message::ConfigTemperatures { .. } => MessageKind::ConfigTemperatures,
            Message::ConfigValve { .. } => MessageKind::ConfigValve,
            Message::AddLinkPartner { .. } => MessageKind::AddLinkPartner,
            Message::RemoveLinkPartner { .. } => MessageKind::RemoveLinkPartner,
            Message::SetGroupId { .. } => MessageKind::SetGroupId,
            Message::RemoveGroupId { .. } => MessageKind::RemoveGroupId,
            Message::ShutterContactState { .. } => MessageKind::ShutterContactState,
            Message::SetTemperature { .. } => MessageKind::SetTemperature,
            Message::WallThermostatControl { .. } => MessageKind::WallThermostatControl,
            Message::PushButtonState { .. } => MessageKind::PushButtonState,
            Message::ThermostatState { .. } => MessageKind::ThermostatState,
            Message::WallThermostatState { .. } => MessageKind::WallThermostatState,
            Message::WakeUp { .. } => MessageKind::WakeUp,
            Message::Reset { .. } => MessageKind::Reset,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::PairPing { header, .. }
            | Message::PairPong { header, .. }
            | Message::Ack { header, .. }
            | Message::TimeInformation { header, .. }
            | Message::ConfigTemperatures { header, .. }
            | Message::ConfigValve { header, .. }
            | Message::AddLinkPartner { header, .. }
            | Message::RemoveLinkPartner { header, .. }
            | Message::SetGroupId { header, .. }
            | Message::RemoveGroupId { header }
            | Message::ShutterContactState { header, .. }
            | Message::SetTemperature { header, .. }
            | Message::WallThermostatControl { header, .. }
            | Message::PushButtonState { header, .. }
            | Message::ThermostatState { header, .. }
            | Message::WallThermostatState { header, .. }
            | Message::WakeUp { header }
            | Message::Reset { header } => header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_ids_round_trip() {
        for id in 0u8..=0xFF {
            if let Some(kind) = MessageKind::from_wire_id(id) {
                assert_eq!(kind.wire_id(), id);
            }
        }
    }

    #[test]
    fn device_kind_table_matches_pairing_ids() {
        assert_eq!(DeviceKind::from_wire_id(0), Some(DeviceKind::Cube));
        assert_eq!(
            DeviceKind::from_wire_id(1),
            Some(DeviceKind::HeatingThermostat)
        );
        assert_eq!(DeviceKind::from_wire_id(5), Some(DeviceKind::PushButton));
        assert_eq!(DeviceKind::from_wire_id(6), None);
    }

    #[test]
    fn boost_duration_table_is_symmetric() {
        for minutes in [0u32, 5, 10, 15, 20, 25, 30, 60] {
            let code = boost_duration_code(minutes).unwrap();
            assert_eq!(boost_duration_minutes(code), Some(minutes));
        }
        assert_eq!(boost_duration_code(45), None);
    }

    #[test]
    fn shutter_state_rejects_unassigned_bits() {
        assert_eq!(ShutterState::from_bits(0), Some(ShutterState::Closed));
        assert_eq!(ShutterState::from_bits(2), Some(ShutterState::Open));
        assert_eq!(ShutterState::from_bits(1), None);
        assert_eq!(ShutterState::from_bits(3), None);
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&ThermostatMode::Temporary).unwrap();
        assert_eq!(json, "\"temporary\"");
    }
}
