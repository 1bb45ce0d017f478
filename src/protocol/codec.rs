//! Frame codec for the Moritz wire format.
//!
//! A frame is one ASCII line of upper-case hex:
//!
//!   `Z` `length(2)` `counter(2)` `flag(2)` `kind(2)` `sender(6)` `receiver(6)` `group(2)` `payload(…)`
//!
//! where `length == (total hex chars - 3) / 2`. Outbound frames produced by
//! the stick are echoed back with a `Zs` marker; the decoder normalizes both
//! spellings. Two culfw firmware variants append one extra trailing byte pair
//! to received frames; the decoder tolerates that, the encoder never emits it.
//!
//! Decoding is stateless: every call parses one complete line and returns a
//! fully populated [`Message`] or a [`ProtocolError`].

use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::{
    boost_duration_code, boost_duration_minutes, AckState, DecalcDay, DeviceKind, Header, Message,
    MessageKind, ProtocolError, ShutterState, ThermostatMode, ThermostatStatus, UntilTime,
    WallThermostatStatus, MAX_TEMPERATURE, MIN_TEMPERATURE,
};

/// Marker + length + the six header fields.
const HEADER_CHARS: usize = 23;

impl Message {
    /// Decode one raw frame line into a typed message.
    pub fn decode(raw: &str) -> Result<Message, ProtocolError> {
        decode(raw)
    }

    /// Encode this message into an outbound `Zs…` frame line.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

pub fn decode(raw: &str) -> Result<Message, ProtocolError> {
    if !raw.is_ascii() {
        return Err(ProtocolError::MalformedHex(format!(
            "non-ASCII frame ({} bytes)",
            raw.len()
        )));
    }
    // A send echo starts with "Zs"; dropping the leading Z leaves the same
    // fixed field offsets as a received "Z" frame.
    let mut frame = if raw.starts_with("Zs") { &raw[1..] } else { raw };
    if frame.len() < HEADER_CHARS {
        return Err(ProtocolError::TruncatedFrame(frame.len()));
    }

    let length = hex_field(frame, 1, 3)? as usize;
    if frame.len() - 3 != length * 2 {
        // culfw 1.67 and relatives append one extra byte pair; accept the
        // frame after dropping it, reject anything else.
        if frame.len() - 5 == length * 2 {
            frame = &frame[..frame.len() - 2];
        } else {
            return Err(ProtocolError::LengthMismatch {
                indicated: length,
                actual: (frame.len() - 3) / 2,
            });
        }
    }

    let header = Header {
        counter: hex_field(frame, 3, 5)? as u8,
        flag: hex_field(frame, 5, 7)? as u8,
        sender_id: hex_field(frame, 9, 15)?,
        receiver_id: hex_field(frame, 15, 21)?,
        group_id: hex_field(frame, 21, 23)? as u8,
    };
    let kind_id = hex_field(frame, 7, 9)? as u8;
    let payload = &frame[HEADER_CHARS..];

    let kind = MessageKind::from_wire_id(kind_id)
        .ok_or(ProtocolError::UnknownMessageKind(kind_id))?;
    match kind {
        MessageKind::PairPing => decode_pair_ping(header, payload),
        MessageKind::PairPong => decode_pair_pong(header, payload),
        MessageKind::Ack => decode_ack(header, payload),
        MessageKind::TimeInformation => decode_time_information(header, payload),
        MessageKind::ConfigTemperatures => decode_config_temperatures(header, payload),
        MessageKind::ConfigValve => decode_config_valve(header, payload),
        MessageKind::SetGroupId => decode_set_group_id(header, payload),
        MessageKind::ShutterContactState => decode_shutter_contact_state(header, payload),
        MessageKind::SetTemperature => decode_set_temperature(header, payload),
        MessageKind::WallThermostatControl => decode_wall_thermostat_control(header, payload),
        MessageKind::ThermostatState => decode_thermostat_state(header, payload),
        MessageKind::WallThermostatState => decode_wall_thermostat_state(header, payload),
        MessageKind::PushButtonState => decode_push_button_state(header, payload),
        // Known id, but no payload decoder registered.
        _ => Err(ProtocolError::UnknownMessageKind(kind_id)),
    }
}

pub fn encode(msg: &Message) -> Result<String, ProtocolError> {
    let payload = encode_payload(msg)?;
    let flag = encode_flag(msg);
    let header = msg.header();

    let mut body = String::with_capacity(20 + payload.len());
    let _ = write!(
        body,
        "{:02X}{:02X}{:02X}{:06X}{:06X}{:02X}",
        header.counter,
        flag,
        msg.kind().wire_id(),
        header.sender_id,
        header.receiver_id,
        header.group_id
    );
    body.push_str(&payload);
    Ok(format!("Zs{:02X}{}", body.len() / 2, body))
}

/// Flag rule per variant: time broadcasts and requests carry distinct flags,
/// pairing replies a fixed zero, everything else flags group addressing.
fn encode_flag(msg: &Message) -> u8 {
    match msg {
        Message::TimeInformation { time, .. } => {
            if time.is_none() {
                0x0A
            } else {
                0x04
            }
        }
        Message::PairPong { .. } => 0x00,
        _ => {
            if msg.header().group_id != 0 {
                0x4
            } else {
                0x0
            }
        }
    }
}

fn encode_payload(msg: &Message) -> Result<String, ProtocolError> {
    match msg {
        Message::PairPong { device_kind, .. } => Ok(format!("{:02X}", device_kind.wire_id())),
        Message::Ack { state, .. } => {
            let state = state.ok_or(ProtocolError::MissingPayloadParameter("ack_state"))?;
            Ok(format!("{:02X}", state.wire_byte()))
        }
        Message::TimeInformation { time, .. } => Ok(match time {
            None => String::new(),
            Some(t) => encode_wire_time(t),
        }),
        Message::ConfigTemperatures { profile, .. } => {
            let comfort = profile
                .comfort_temperature
                .ok_or(ProtocolError::MissingPayloadParameter("comfort_temperature"))?;
            let eco = profile
                .eco_temperature
                .ok_or(ProtocolError::MissingPayloadParameter("eco_temperature"))?;
            let max = profile
                .max_temperature
                .ok_or(ProtocolError::MissingPayloadParameter("max_temperature"))?;
            let min = profile
                .min_temperature
                .ok_or(ProtocolError::MissingPayloadParameter("min_temperature"))?;
            let offset = profile
                .measurement_offset
                .ok_or(ProtocolError::MissingPayloadParameter("measurement_offset"))?;
            let window_temp = profile.window_open_temperature.ok_or(
                ProtocolError::MissingPayloadParameter("window_open_temperature"),
            )?;
            let window_dur = profile
                .window_open_duration
                .ok_or(ProtocolError::MissingPayloadParameter("window_open_duration"))?;
            Ok(format!(
                "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                half_degrees(comfort),
                half_degrees(eco),
                half_degrees(max),
                half_degrees(min),
                ((offset + 3.5) * 2.0) as u8,
                half_degrees(window_temp),
                (window_dur / 5) as u8
            ))
        }
        Message::ConfigValve { config, .. } => {
            let boost_minutes = config
                .boost_duration
                .ok_or(ProtocolError::MissingPayloadParameter("boost_duration"))?;
            let boost_position = config
                .boost_valve_position
                .ok_or(ProtocolError::MissingPayloadParameter("boost_valve_position"))?;
            let decalc_day = config
                .decalc_day
                .ok_or(ProtocolError::MissingPayloadParameter("decalc_day"))?;
            let decalc_hour = config
                .decalc_hour
                .ok_or(ProtocolError::MissingPayloadParameter("decalc_hour"))?;
            let max_position = config
                .max_valve_position
                .ok_or(ProtocolError::MissingPayloadParameter("max_valve_position"))?;
            let offset = config
                .valve_offset
                .ok_or(ProtocolError::MissingPayloadParameter("valve_offset"))?;
            let boost_code = boost_duration_code(boost_minutes).ok_or_else(|| {
                ProtocolError::InvalidValue(format!(
                    "boost duration {} min is not a supported step",
                    boost_minutes
                ))
            })?;
            Ok(format!(
                "{:02X}{:02X}{:02X}{:02X}",
                (boost_code << 5) | (boost_position / 5),
                (decalc_day.wire_id() << 5) | (decalc_hour & 0x1F),
                percent_byte(max_position),
                percent_byte(offset)
            ))
        }
        Message::AddLinkPartner {
            partner_id,
            partner_kind,
            ..
        }
        | Message::RemoveLinkPartner {
            partner_id,
            partner_kind,
            ..
        } => {
            let id = partner_id.ok_or(ProtocolError::MissingPayloadParameter("partner_id"))?;
            let kind =
                partner_kind.ok_or(ProtocolError::MissingPayloadParameter("partner_kind"))?;
            Ok(format!("{:06X}{:02X}", id, kind.wire_id()))
        }
        Message::SetGroupId { group, .. } => Ok(format!("{:02X}", group)),
        Message::RemoveGroupId { .. } => Ok("00".to_string()),
        Message::SetTemperature {
            desired_temperature,
            mode,
            ..
        } => {
            let desired = if *desired_temperature > MAX_TEMPERATURE {
                MAX_TEMPERATURE // "ON"
            } else if *desired_temperature < MIN_TEMPERATURE {
                MIN_TEMPERATURE // "OFF"
            } else {
                // always round to the nearest half degree first
                (desired_temperature * 2.0).round() / 2.0
            };
            Ok(format!(
                "{:02X}",
                (mode.bits() << 6) | (desired * 2.0) as u8
            ))
        }
        Message::WakeUp { .. } | Message::Reset { .. } => Ok(String::new()),
        Message::PairPing { .. }
        | Message::ShutterContactState { .. }
        | Message::WallThermostatControl { .. }
        | Message::PushButtonState { .. }
        | Message::ThermostatState { .. }
        | Message::WallThermostatState { .. } => Err(ProtocolError::Unencodable(msg.kind())),
    }
}

fn decode_pair_ping(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 3 {
        return Err(ProtocolError::InvalidValue(format!(
            "pair ping payload of {} bytes",
            bytes.len()
        )));
    }
    let firmware = bytes[0] as i8 as i32;
    let device_kind = DeviceKind::from_wire_id(bytes[1]).ok_or_else(|| {
        ProtocolError::InvalidValue(format!("unknown device kind {}", bytes[1]))
    })?;
    let serial = String::from_utf8(bytes[3..].to_vec())
        .map_err(|_| ProtocolError::InvalidValue("device serial is not ASCII".into()))?;
    Ok(Message::PairPing {
        header,
        firmware_version: format!("V{}.{}", firmware / 0x10, firmware.rem_euclid(0x10)),
        device_kind,
        selftest: bytes[2],
        serial,
    })
}

fn decode_pair_pong(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    // The pairing reply carries the device kind as a decimal number.
    let id: u8 = payload
        .parse()
        .map_err(|_| ProtocolError::InvalidValue(format!("pair pong payload '{}'", payload)))?;
    let device_kind = DeviceKind::from_wire_id(id)
        .ok_or_else(|| ProtocolError::InvalidValue(format!("unknown device kind {}", id)))?;
    Ok(Message::PairPong {
        header,
        device_kind,
    })
}

fn decode_ack(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    let state = bytes.first().and_then(|b| AckState::from_wire_byte(*b));
    // A 4-byte ack embeds a thermostat status block after the state byte.
    let status = if bytes.len() == 4 {
        Some(decode_thermostat_status(&bytes[1..4])?)
    } else {
        None
    };
    Ok(Message::Ack {
        header,
        state,
        status,
    })
}

fn decode_time_information(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    if payload.is_empty() {
        return Ok(Message::TimeInformation { header, time: None });
    }
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 5 {
        return Err(ProtocolError::InvalidValue(format!(
            "time payload of {} bytes",
            bytes.len()
        )));
    }
    let year = 2000 + bytes[0] as i32;
    let day = bytes[1] as u32;
    let hour = (bytes[2] & 0x3F) as u32;
    let minute = (bytes[3] & 0x3F) as u32;
    let month = (((bytes[3] & 0xC0) >> 4) | ((bytes[4] & 0xC0) >> 6)) as u32;
    let second = (bytes[4] & 0x3F) as u32;
    let time = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            ProtocolError::InvalidValue(format!(
                "impossible wire time {}-{}-{} {}:{}:{}",
                year, month, day, hour, minute, second
            ))
        })?;
    Ok(Message::TimeInformation {
        header,
        time: Some(time),
    })
}

fn encode_wire_time(t: &NaiveDateTime) -> String {
    let month = t.month() as u8;
    format!(
        "{:02X}{:02X}{:02X}{:02X}{:02X}",
        (t.year() - 2000) as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8 | ((month & 0x0C) << 4),
        t.second() as u8 | ((month & 0x03) << 6)
    )
}

fn decode_config_temperatures(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 7 {
        return Err(ProtocolError::InvalidValue(format!(
            "temperature profile payload of {} bytes",
            bytes.len()
        )));
    }
    Ok(Message::ConfigTemperatures {
        header,
        profile: super::TemperatureProfile {
            comfort_temperature: Some(bytes[0] as f32 / 2.0),
            eco_temperature: Some(bytes[1] as f32 / 2.0),
            max_temperature: Some(bytes[2] as f32 / 2.0),
            min_temperature: Some(bytes[3] as f32 / 2.0),
            measurement_offset: Some(bytes[4] as f32 / 2.0 - 3.5),
            window_open_temperature: Some(bytes[5] as f32 / 2.0),
            window_open_duration: Some(bytes[6] as u32 * 5),
        },
    })
}

fn decode_config_valve(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 4 {
        return Err(ProtocolError::InvalidValue(format!(
            "valve config payload of {} bytes",
            bytes.len()
        )));
    }
    let decalc_day = DecalcDay::from_wire_id(bytes[1] >> 5).ok_or_else(|| {
        ProtocolError::InvalidValue(format!("decalc day code {}", bytes[1] >> 5))
    })?;
    Ok(Message::ConfigValve {
        header,
        config: super::ValveConfig {
            boost_duration: boost_duration_minutes(bytes[0] >> 5),
            boost_valve_position: Some((bytes[0] & 0x1F) * 5),
            decalc_day: Some(decalc_day),
            decalc_hour: Some(bytes[1] & 0x1F),
            max_valve_position: Some((bytes[2] as u32 * 100 / 255) as u8),
            valve_offset: Some((bytes[3] as u32 * 100 / 255) as u8),
        },
    })
}

fn decode_set_group_id(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    // Devices report their current group as a single hex digit.
    let digit = payload
        .get(..1)
        .ok_or(ProtocolError::InvalidValue("empty group id payload".into()))?;
    let group = u8::from_str_radix(digit, 16)
        .map_err(|_| ProtocolError::MalformedHex(digit.to_string()))?;
    Ok(Message::SetGroupId { header, group })
}

fn decode_shutter_contact_state(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    let status = *bytes
        .first()
        .ok_or(ProtocolError::InvalidValue("empty shutter payload".into()))?;
    let state = ShutterState::from_bits(status & 0x3).ok_or_else(|| {
        ProtocolError::InvalidValue(format!("shutter state bits {}", status & 0x3))
    })?;
    Ok(Message::ShutterContactState {
        header,
        state,
        unknown_bits: (status >> 2) & 0xF,
        rf_error: status & 0x40 != 0,
        battery_low: status & 0x80 != 0,
    })
}

fn decode_set_temperature(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    let byte = *bytes.first().ok_or(ProtocolError::InvalidValue(
        "empty set-temperature payload".into(),
    ))?;
    Ok(Message::SetTemperature {
        header,
        desired_temperature: (byte & 0x3F) as f32 / 2.0,
        mode: ThermostatMode::from_bits(byte >> 6),
    })
}

fn decode_wall_thermostat_control(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 2 {
        return Err(ProtocolError::InvalidValue(format!(
            "wall control payload of {} bytes",
            bytes.len()
        )));
    }
    // 16 bits: bit 15 is the measured-temperature high bit, bits 14..8 the
    // desired temperature, bits 7..0 the measured low byte.
    let measured_raw = (((bytes[0] >> 7) as u16) << 8) | bytes[1] as u16;
    Ok(Message::WallThermostatControl {
        header,
        desired_temperature: (bytes[0] & 0x7F) as f32 / 2.0,
        measured_temperature: measured_raw as f32 / 10.0,
    })
}

/// Status/valve/desired triple shared by ThermostatState and 4-byte Acks.
fn decode_thermostat_status(bytes: &[u8]) -> Result<ThermostatStatus, ProtocolError> {
    if bytes.len() < 3 {
        return Err(ProtocolError::InvalidValue(format!(
            "thermostat status of {} bytes",
            bytes.len()
        )));
    }
    let status = bytes[0];
    // The lock/RF/battery bits sit in the upper byte of the sign-extended
    // 16-bit status value.
    let upper = ((status as i8) as i16) >> 9;
    Ok(ThermostatStatus {
        mode: ThermostatMode::from_bits(status & 0x3),
        dst_active: status & 0x04 != 0,
        lan_gateway: status & 0x08 != 0,
        locked: upper & 0x1 != 0,
        rf_error: upper & 0x2 != 0,
        battery_low: upper & 0x4 != 0,
        desired_temperature: (bytes[2] & 0x7F) as f32 / 2.0,
        valve_position: bytes[1],
        measured_temperature: None,
    })
}

fn decode_thermostat_state(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    let mut status = decode_thermostat_status(&bytes)?;
    let trailing = &bytes[3..];
    // Two trailing bytes carry the measured temperature unless a temporary
    // override is active (then they encode the until time instead). Three
    // trailing bytes are a date we do not interpret.
    if trailing.len() == 2 && status.mode != ThermostatMode::Temporary {
        status.measured_temperature =
            Some((((trailing[0] & 0x1) as u16) << 8 | trailing[1] as u16) as f32 / 10.0);
    }
    Ok(Message::ThermostatState { header, status })
}

fn decode_wall_thermostat_state(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    if bytes.len() < 3 {
        return Err(ProtocolError::InvalidValue(format!(
            "wall thermostat state of {} bytes",
            bytes.len()
        )));
    }
    let b0 = bytes[0];
    let desired_raw = bytes[2];
    let mut status = WallThermostatStatus {
        mode: ThermostatMode::from_bits(b0 >> 6),
        dst_active: b0 & 0x20 != 0,
        lan_gateway: b0 & 0x10 != 0,
        locked: b0 & 0x08 != 0,
        rf_error: b0 & 0x04 != 0,
        battery_low: b0 & 0x02 != 0,
        desired_temperature: (desired_raw & 0x7F) as f32 / 2.0,
        display_actual_temperature: bytes[1] != 0,
        measured_temperature: None,
        until: None,
    };

    // Trailing bytes are either a plain measured temperature or an "until"
    // timestamp bracketed by two marker byte pairs; no authoritative source
    // documents this, so decode by shape and refuse ambiguous ones.
    let trailing = &bytes[3..];
    match trailing.len() {
        0 => {}
        2 => {
            status.measured_temperature = Some(trailing[1] as f32 / 10.0);
        }
        3 => {
            status.until = Some(decode_until(trailing[0], trailing[1], trailing[2]));
        }
        n if n >= 4 => {
            status.until = Some(decode_until(trailing[0], trailing[1], trailing[2]));
            let low = trailing[3..]
                .iter()
                .fold(0u32, |acc, b| (acc << 8) | *b as u32);
            status.measured_temperature =
                Some((((desired_raw >> 7) as u32) << 8 | low) as f32 / 10.0);
        }
        _ => return Err(ProtocolError::AmbiguousPayload(MessageKind::WallThermostatState)),
    }
    Ok(Message::WallThermostatState { header, status })
}

fn decode_until(b1: u8, b2: u8, b3: u8) -> UntilTime {
    let time = b3 & 0x3F;
    UntilTime {
        day: b1 & 0x1F,
        month: ((b1 & 0xE0) >> 4) | (b2 >> 7),
        year: b2 & 0x3F,
        hour: time / 2,
        half_hour: time % 2 == 1,
    }
}

fn decode_push_button_state(header: Header, payload: &str) -> Result<Message, ProtocolError> {
    let bytes = payload_bytes(payload)?;
    let b0 = *bytes.first().ok_or(ProtocolError::InvalidValue(
        "empty push button payload".into(),
    ))?;
    let pressed = match bytes.get(1) {
        Some(b1) => b1 & 0x1 != 0,
        None => b0 & 0x1 != 0,
    };
    Ok(Message::PushButtonState {
        header,
        pressed,
        rf_error: b0 & 0x20 != 0,
        battery_low: b0 & 0x40 != 0,
        lan_gateway: b0 & 0x08 != 0,
    })
}

fn hex_field(frame: &str, start: usize, end: usize) -> Result<u32, ProtocolError> {
    let slice = frame
        .get(start..end)
        .ok_or(ProtocolError::TruncatedFrame(frame.len()))?;
    u32::from_str_radix(slice, 16).map_err(|_| ProtocolError::MalformedHex(slice.to_string()))
}

fn payload_bytes(payload: &str) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() % 2 != 0 {
        return Err(ProtocolError::MalformedHex(payload.to_string()));
    }
    (0..payload.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&payload[i..i + 2], 16)
                .map_err(|_| ProtocolError::MalformedHex(payload[i..i + 2].to_string()))
        })
        .collect()
}

fn half_degrees(value: f32) -> u8 {
    (value * 2.0) as u8
}

fn percent_byte(percent: u8) -> u8 {
    (percent as u32 * 255 / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use chrono::NaiveDate;

    fn header(counter: u8, sender: u32, receiver: u32) -> Header {
        Header {
            counter,
            flag: 0,
            sender_id: sender,
            receiver_id: receiver,
            group_id: 0,
        }
    }

    #[test]
    fn decodes_real_ack_with_embedded_status() {
        // Captured from a live HeatingThermostat exchange.
        let msg = Message::decode("Z0E250202039EA5016F6900011904283C").unwrap();
        match msg {
            Message::Ack {
                header,
                state,
                status,
            } => {
                assert_eq!(header.counter, 0x25);
                assert_eq!(header.sender_id, 0x039EA5);
                assert_eq!(header.receiver_id, 0x016F69);
                assert_eq!(state, Some(AckState::Ok));
                let status = status.expect("embedded status");
                assert_eq!(status.mode, ThermostatMode::Manual);
                assert_eq!(status.valve_position, 0x04);
                assert_eq!(status.desired_temperature, 20.0);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn decodes_shutter_contact_report() {
        let msg = Message::decode("Z0B370630035BCC00CF400010").unwrap();
        match msg {
            Message::ShutterContactState {
                state,
                rf_error,
                battery_low,
                ..
            } => {
                assert_eq!(state, ShutterState::Closed);
                assert!(!rf_error);
                assert!(!battery_low);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn tolerates_one_extra_trailing_byte_pair() {
        // Same shutter frame with the culfw trailing pair still attached.
        let msg = Message::decode("Z0B370630035BCC00CF400010EA").unwrap();
        assert_eq!(msg.kind(), MessageKind::ShutterContactState);
    }

    #[test]
    fn rejects_frames_with_wrong_length() {
        let err = Message::decode("Z0B370630035BCC00CF400010EAEA").unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { indicated: 11, .. }));
    }

    #[test]
    fn rejects_unknown_message_kind() {
        // Kind 0xFF is unassigned.
        let err = Message::decode("Z0B3706FF035BCC00CF400010").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageKind(0xFF));
    }

    #[test]
    fn known_kind_without_decoder_is_rejected() {
        // 0xF1 (WakeUp) has no payload decoder registered.
        let err = Message::decode("Z0B3706F1035BCC00CF400010").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageKind(0xF1));
    }

    #[test]
    fn normalizes_send_echo_marker() {
        let sent = Message::decode("Zs0BB900401234560B3554004B").unwrap();
        let received = Message::decode("Z0BB900401234560B3554004B").unwrap();
        assert_eq!(sent, received);
    }

    #[test]
    fn sign_extended_status_sets_fault_flags() {
        // Status byte 0x99 is negative as a signed byte; the sign-extended
        // upper bits mark locked, RF error and battery low all at once.
        let status = super::decode_thermostat_status(&[0x99, 0x00, 0x28]).unwrap();
        assert!(status.locked);
        assert!(status.rf_error);
        assert!(status.battery_low);
        // 0x19 is positive; the same flags stay clear.
        let status = super::decode_thermostat_status(&[0x19, 0x00, 0x28]).unwrap();
        assert!(!status.locked && !status.rf_error && !status.battery_low);
    }

    #[test]
    fn thermostat_state_skips_measured_in_temporary_mode() {
        // Mode bits 0b10 (temporary) with two trailing bytes: the trailing
        // bytes encode the until time, not a measurement.
        let msg = Message::decode("Z0F050460039EA5000000001A002800CC").unwrap();
        match msg {
            Message::ThermostatState { status, .. } => {
                assert_eq!(status.mode, ThermostatMode::Temporary);
                assert_eq!(status.measured_temperature, None);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn wall_control_splits_desired_and_measured() {
        // Payload 0xA8 0xE2: high bit feeds the measured temperature,
        // remaining 7 bits of byte 0 are the desired temperature.
        let msg = Message::decode("Z0C000442016F69039EA500A8E2").unwrap();
        match msg {
            Message::WallThermostatControl {
                desired_temperature,
                measured_temperature,
                ..
            } => {
                assert_eq!(desired_temperature, 20.0);
                assert_eq!(measured_temperature, 48.2);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn wall_state_two_trailing_bytes_is_plain_measurement() {
        let msg = Message::decode("Z0F00047001234500000000110A2800E6").unwrap();
        match msg {
            Message::WallThermostatState { status, .. } => {
                assert_eq!(status.measured_temperature, Some(23.0));
                assert!(status.until.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn wall_state_one_trailing_byte_is_ambiguous() {
        let err = Message::decode("Z0E000470012345000000001105280A").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::AmbiguousPayload(MessageKind::WallThermostatState)
        );
    }

    #[test]
    fn time_information_round_trips() {
        let time = NaiveDate::from_ymd_opt(2023, 11, 5)
            .unwrap()
            .and_hms_opt(21, 17, 42)
            .unwrap();
        let msg = Message::TimeInformation {
            header: Header {
                counter: 0x42,
                flag: 0x04,
                sender_id: 0x123456,
                receiver_id: 0x0B3554,
                group_id: 0,
            },
            time: Some(time),
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn time_request_uses_query_flag() {
        let msg = Message::TimeInformation {
            header: header(1, 0x123456, 0x0B3554),
            time: None,
        };
        let encoded = msg.encode().unwrap();
        // Empty payload: ten header bytes, query flag 0x0A.
        assert_eq!(&encoded[2..4], "0A");
        assert_eq!(&encoded[6..8], "0A");
    }

    #[test]
    fn set_temperature_clamps_and_rounds() {
        let frame = |t: f32| {
            Message::SetTemperature {
                header: header(1, 0x123456, 0x0B3554),
                desired_temperature: t,
                mode: ThermostatMode::Manual,
            }
            .encode()
            .unwrap()
        };
        // 99 clamps to 30.5 ("ON"), 1.0 clamps to 4.5 ("OFF")
        assert!(frame(99.0).ends_with(&format!("{:02X}", (1 << 6) | 61)));
        assert!(frame(1.0).ends_with(&format!("{:02X}", (1 << 6) | 9)));
        // 20.3 rounds to 20.5
        assert!(frame(20.3).ends_with(&format!("{:02X}", (1 << 6) | 41)));
    }

    #[test]
    fn group_addressing_sets_the_flag() {
        let mut msg = Message::SetTemperature {
            header: header(1, 0x123456, 0x0B3554),
            desired_temperature: 21.0,
            mode: ThermostatMode::Auto,
        };
        assert_eq!(&msg.encode().unwrap()[6..8], "00");
        if let Message::SetTemperature { header, .. } = &mut msg {
            header.group_id = 3;
        }
        assert_eq!(&msg.encode().unwrap()[6..8], "04");
    }

    #[test]
    fn config_valve_packs_tables() {
        let msg = Message::ConfigValve {
            header: header(7, 0x123456, 0x0B3554),
            config: ValveConfig {
                boost_duration: Some(30),
                boost_valve_position: Some(80),
                decalc_day: Some(DecalcDay::Monday),
                decalc_hour: Some(12),
                max_valve_position: Some(100),
                valve_offset: Some(0),
            },
        };
        let encoded = msg.encode().unwrap();
        // boost: code 6 << 5 | 80/5 = 0xD0; decalc: 2 << 5 | 12 = 0x4C
        assert!(encoded.ends_with("D04CFF00"));
    }

    #[test]
    fn config_valve_rejects_off_table_boost_duration() {
        let msg = Message::ConfigValve {
            header: header(7, 0x123456, 0x0B3554),
            config: ValveConfig {
                boost_duration: Some(45),
                boost_valve_position: Some(80),
                decalc_day: Some(DecalcDay::Monday),
                decalc_hour: Some(12),
                max_valve_position: Some(100),
                valve_offset: Some(0),
            },
        };
        assert!(matches!(
            msg.encode().unwrap_err(),
            ProtocolError::InvalidValue(_)
        ));
    }

    #[test]
    fn pair_pong_round_trips() {
        let msg = Message::PairPong {
            header: Header {
                counter: 1,
                flag: 0,
                sender_id: 0x123456,
                receiver_id: 0x0E016C,
                group_id: 0,
            },
            device_kind: DeviceKind::Cube,
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn ack_reply_round_trips() {
        let msg = Message::Ack {
            header: header(0x25, 0x123456, 0x039EA5),
            state: Some(AckState::Ignore),
            status: None,
        };
        let encoded = msg.encode().unwrap();
        assert!(encoded.ends_with("00"));
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn device_originated_kinds_refuse_to_encode() {
        let msg = Message::decode("Z0B370630035BCC00CF400010").unwrap();
        assert_eq!(
            msg.encode().unwrap_err(),
            ProtocolError::Unencodable(MessageKind::ShutterContactState)
        );
    }
}
