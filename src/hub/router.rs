//! Session router loop.
//!
//! Consumes raw frames from the transceiver, decodes them, applies the
//! message-type state machine (pairing, acknowledgement, state update) and
//! produces outbound frames back into the transceiver queue. Runs until the
//! stop flag is set or the transceiver closes the inbound channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::cul::CulHandle;
use crate::logutil::escape_log;
use crate::protocol::{
    AckState, DeviceKind, Header, Message, ThermostatStatus, BROADCAST_ID,
};

use super::state::{Device, DeviceState};
use super::{Event, HubCommand};

/// Most-recent acknowledgements remembered for deduplication.
pub const ACK_DEDUP_CAPACITY: usize = 5;

/// Poll timeout per queue; the stop signal is observed within two of these.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SessionRouter {
    sender_id: u32,
    cul: CulHandle,
    frame_rx: mpsc::Receiver<String>,
    command_rx: mpsc::Receiver<HubCommand>,
    states: Arc<RwLock<HashMap<u32, DeviceState>>>,
    devices: Arc<RwLock<HashMap<u32, Device>>>,
    events: broadcast::Sender<Event>,
    /// Devices paired in an earlier run, seeded from config so their
    /// broadcasts pass the filter without a fresh pairing.
    seeded_paired: HashSet<u32>,
    acked: VecDeque<(u8, u32)>,
    pairing_until: Option<Instant>,
    counter: u8,
}

impl SessionRouter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sender_id: u32,
        cul: CulHandle,
        frame_rx: mpsc::Receiver<String>,
        command_rx: mpsc::Receiver<HubCommand>,
        states: Arc<RwLock<HashMap<u32, DeviceState>>>,
        devices: Arc<RwLock<HashMap<u32, Device>>>,
        events: broadcast::Sender<Event>,
        seeded_paired: HashSet<u32>,
    ) -> Self {
        SessionRouter {
            sender_id,
            cul,
            frame_rx,
            command_rx,
            states,
            devices,
            events,
            seeded_paired,
            acked: VecDeque::with_capacity(ACK_DEDUP_CAPACITY),
            pairing_until: None,
            counter: 0,
        }
    }

    pub async fn run(mut self) {
        info!(
            "session router starting (hub address 0x{:06X})",
            self.sender_id
        );
        loop {
            if self.cul.is_stopped() {
                break;
            }
            self.expire_pairing_window();

            match timeout(POLL_TIMEOUT, self.frame_rx.recv()).await {
                Ok(Some(line)) => self.handle_frame(&line),
                Ok(None) => {
                    info!("inbound frame channel closed, session router stopping");
                    break;
                }
                Err(_) => {}
            }
            match timeout(POLL_TIMEOUT, self.command_rx.recv()).await {
                Ok(Some(command)) => self.handle_command(command),
                // All external handles gone; keep serving the radio side.
                Ok(None) => {}
                Err(_) => {}
            }
            tokio::task::yield_now().await;
        }
        info!("session router stopped");
    }

    /// Decode one raw line and dispatch it. The stick appends a 2-hex-digit
    /// signal strength to every received frame (enabled by `X21`); strip it
    /// before the codec sees the frame.
    fn handle_frame(&mut self, line: &str) {
        if line.len() < 2 {
            return;
        }
        let (frame, rssi) = line.split_at(line.len() - 2);
        let signal = u8::from_str_radix(rssi, 16).ok();
        match Message::decode(frame) {
            Ok(msg) => self.dispatch(msg, signal),
            Err(err) => {
                warn!(
                    "message parsing failed, ignoring frame '{}': {}",
                    escape_log(line),
                    err
                );
            }
        }
    }

    fn dispatch(&mut self, msg: Message, signal: Option<u8>) {
        let header = *msg.header();

        // Pairing requests are exempt from the address filters: a factory
        // reset device broadcasts to nobody in particular.
        if let Message::PairPing {
            firmware_version,
            device_kind,
            serial,
            ..
        } = &msg
        {
            let (firmware, kind, serial) =
                (firmware_version.clone(), *device_kind, serial.clone());
            self.handle_pair_ping(header, firmware, kind, serial);
            return;
        }

        if header.receiver_id != BROADCAST_ID && header.receiver_id != self.sender_id {
            debug!(
                "discarding frame for 0x{:06X}, not addressed to us",
                header.receiver_id
            );
            return;
        }
        if header.receiver_id == BROADCAST_ID && !self.is_paired(header.sender_id) {
            debug!(
                "discarding broadcast from unpaired device 0x{:06X}",
                header.sender_id
            );
            return;
        }

        match &msg {
            Message::TimeInformation { time: None, .. } => {
                self.send_time_information(&header);
            }
            Message::TimeInformation { time: Some(t), .. } => {
                debug!("time broadcast from 0x{:06X}: {}", header.sender_id, t);
            }
            Message::ThermostatState { status, .. } => {
                info!("thermostat state updated for 0x{:06X}", header.sender_id);
                self.send_ack(&header);
                let status = *status;
                self.merge_state(&msg, signal);
                self.emit(thermostat_update(header.sender_id, Some(&status)));
            }
            Message::Ack { state, status, .. } => match state {
                Some(AckState::Ok) => {
                    if status.is_some() {
                        info!(
                            "ack with thermostat state from 0x{:06X}",
                            header.sender_id
                        );
                        self.merge_state(&msg, signal);
                    }
                    self.emit(thermostat_update(header.sender_id, status.as_ref()));
                }
                Some(AckState::Ignore) => {}
                other => debug!("ack from 0x{:06X} with state {:?}", header.sender_id, other),
            },
            Message::ShutterContactState { .. }
            | Message::WallThermostatState { .. }
            | Message::SetTemperature { .. }
            | Message::WallThermostatControl { .. } => {
                debug!(
                    "{:?} update from 0x{:06X}",
                    msg.kind(),
                    header.sender_id
                );
                self.send_ack(&header);
                self.merge_state(&msg, signal);
            }
            Message::PushButtonState { .. } => {
                debug!("push button update from 0x{:06X}", header.sender_id);
                self.merge_state(&msg, signal);
            }
            other => {
                warn!("unhandled message of kind {:?} from 0x{:06X}", other.kind(), header.sender_id);
            }
        }
    }

    fn handle_pair_ping(
        &mut self,
        header: Header,
        firmware: String,
        kind: DeviceKind,
        serial: String,
    ) {
        self.register_device(&header, firmware, kind, serial);

        if header.receiver_id == BROADCAST_ID {
            // Pairing after factory reset: only while the window is open.
            if !self.pairing_enabled() {
                info!(
                    "pair request from 0x{:06X} but pairing window is closed, ignoring",
                    header.sender_id
                );
                return;
            }
            if self.send_pong(&header) {
                self.mark_paired(header.sender_id);
                self.emit(Event::DevicePaired {
                    device_id: header.sender_id,
                });
            }
        } else if header.receiver_id == self.sender_id {
            // Re-pair after battery replacement: always honored.
            if self.send_pong(&header) {
                self.mark_paired(header.sender_id);
                self.emit(Event::DeviceRepaired {
                    device_id: header.sender_id,
                });
            }
        } else {
            debug!(
                "pair request addressed to other device 0x{:06X}, ignoring",
                header.receiver_id
            );
        }
    }

    /// Reply to a pairing request, budget permitting. A late Pong is worse
    /// than none: the device's receive window closes quickly, so an
    /// underfunded reply is skipped rather than queued.
    fn send_pong(&mut self, ping: &Header) -> bool {
        if !self.cul.has_send_budget() {
            info!(
                "NOT responding to pair request from 0x{:06X}, send budget too low to be on time",
                ping.sender_id
            );
            return false;
        }
        let msg = Message::PairPong {
            header: Header {
                counter: self.next_counter(),
                flag: 0,
                sender_id: self.sender_id,
                receiver_id: ping.sender_id,
                group_id: ping.group_id,
            },
            device_kind: DeviceKind::Cube,
        };
        self.send_message(msg);
        true
    }

    /// Acknowledge a device report, at most once per `(counter, sender)`.
    fn send_ack(&mut self, header: &Header) {
        let key = (header.counter, header.sender_id);
        if self.acked.contains(&key) {
            debug!(
                "already acknowledged counter {:02X} from 0x{:06X}, saving budget",
                header.counter, header.sender_id
            );
            return;
        }
        let ack = Message::Ack {
            header: Header {
                counter: header.counter,
                flag: 0,
                sender_id: self.sender_id,
                receiver_id: header.sender_id,
                group_id: header.group_id,
            },
            state: Some(AckState::Ignore),
            status: None,
        };
        self.send_message(ack);
        self.acked.push_front(key);
        self.acked.truncate(ACK_DEDUP_CAPACITY);
    }

    fn send_time_information(&mut self, request: &Header) {
        info!(
            "time information requested by 0x{:06X}, responding",
            request.sender_id
        );
        let msg = Message::TimeInformation {
            header: Header {
                counter: self.next_counter(),
                flag: 0,
                sender_id: self.sender_id,
                receiver_id: request.sender_id,
                group_id: request.group_id,
            },
            time: Some(Local::now().naive_local()),
        };
        self.send_message(msg);
    }

    fn handle_command(&mut self, command: HubCommand) {
        let msg = match command {
            HubCommand::EnablePairing { duration } => {
                info!("pairing window open for {}s", duration.as_secs());
                self.pairing_until = Some(Instant::now() + duration);
                return;
            }
            HubCommand::SetTemperature {
                device_id,
                temperature,
                mode,
            } => {
                debug!(
                    "setting temperature for 0x{:06X} to {} ({})",
                    device_id,
                    temperature,
                    mode.as_str()
                );
                Message::SetTemperature {
                    header: self.command_header(device_id),
                    desired_temperature: temperature,
                    mode,
                }
            }
            HubCommand::SetTime { device_id } => Message::TimeInformation {
                header: self.command_header(device_id),
                time: Some(Local::now().naive_local()),
            },
            HubCommand::SetGroupId { device_id, group } => Message::SetGroupId {
                header: self.command_header(device_id),
                group,
            },
            HubCommand::RemoveGroupId { device_id } => Message::RemoveGroupId {
                header: self.command_header(device_id),
            },
            HubCommand::ConfigValve { device_id, config } => Message::ConfigValve {
                header: self.command_header(device_id),
                config,
            },
            HubCommand::ConfigTemperatures { device_id, profile } => {
                Message::ConfigTemperatures {
                    header: self.command_header(device_id),
                    profile,
                }
            }
            HubCommand::AddLinkPartner {
                device_id,
                partner_id,
                partner_kind,
            } => Message::AddLinkPartner {
                header: self.command_header(device_id),
                partner_id: Some(partner_id),
                partner_kind: Some(partner_kind),
            },
            HubCommand::RemoveLinkPartner {
                device_id,
                partner_id,
                partner_kind,
            } => Message::RemoveLinkPartner {
                header: self.command_header(device_id),
                partner_id: Some(partner_id),
                partner_kind: Some(partner_kind),
            },
            HubCommand::WakeUp { device_id } => {
                debug!("waking device 0x{:06X}", device_id);
                Message::WakeUp {
                    header: self.command_header(device_id),
                }
            }
        };
        self.send_message(msg);
    }

    fn command_header(&mut self, receiver_id: u32) -> Header {
        Header {
            counter: self.next_counter(),
            flag: 0,
            sender_id: self.sender_id,
            receiver_id,
            group_id: 0,
        }
    }

    fn send_message(&self, msg: Message) {
        match msg.encode() {
            Ok(frame) => self.cul.enqueue_command(frame),
            // Handles validate before enqueueing; anything left is a bug
            // worth hearing about, but never worth killing the loop.
            Err(err) => error!("message sending failed, ignoring {:?}: {}", msg.kind(), err),
        }
    }

    fn merge_state(&self, msg: &Message, signal: Option<u8>) {
        let sender_id = msg.header().sender_id;
        let mut states = self.states.write().unwrap();
        let entry = states.entry(sender_id).or_default();
        if entry.merge(msg) {
            entry.last_seen = Some(Utc::now());
            if signal.is_some() {
                entry.signal_strength = signal;
            }
        }
    }

    fn register_device(&self, header: &Header, firmware: String, kind: DeviceKind, serial: String) {
        let mut devices = self.devices.write().unwrap();
        let entry = devices.entry(header.sender_id).or_insert_with(|| Device {
            sender_id: header.sender_id,
            kind,
            serial,
            firmware_version: None,
            paired: false,
        });
        entry.firmware_version = Some(firmware);
    }

    fn mark_paired(&self, device_id: u32) {
        if let Some(device) = self.devices.write().unwrap().get_mut(&device_id) {
            device.paired = true;
        }
    }

    fn is_paired(&self, device_id: u32) -> bool {
        if self.seeded_paired.contains(&device_id) {
            return true;
        }
        self.devices
            .read()
            .unwrap()
            .get(&device_id)
            .map(|d| d.paired)
            .unwrap_or(false)
    }

    fn pairing_enabled(&self) -> bool {
        self.pairing_until
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    fn expire_pairing_window(&mut self) {
        if let Some(deadline) = self.pairing_until {
            if Instant::now() >= deadline {
                info!("pairing window closed");
                self.pairing_until = None;
            }
        }
    }

    fn next_counter(&mut self) -> u8 {
        self.counter = self.counter.wrapping_add(1);
        self.counter
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine; events are best-effort notifications.
        let _ = self.events.send(event);
    }
}

fn thermostat_update(device_id: u32, status: Option<&ThermostatStatus>) -> Event {
    Event::ThermostatUpdate {
        device_id,
        measured_temperature: status.and_then(|s| s.measured_temperature),
        desired_temperature: status.map(|s| s.desired_temperature),
        mode: status.map(|s| s.mode),
        battery_low: status.map(|s| s.battery_low),
    }
}
