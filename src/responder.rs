//! Works out what the emulated bulbs say in reply to a request.
//!
//! Each message type maps to one entry of a static handler table.  Queries produce one state
//! message per addressed device, mutations are applied to each addressed device, and the
//! acknowledgement and state replies a client asked for are added in the order a real bulb sends
//! them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use lifx_core::{BuildOptions, Message, RawMessage, Service};
use log::{debug, error, info, warn};

use crate::adapter::DeviceAdapter;
use crate::error::{Error, Result};
use crate::registry::{now_nanos, PublishedDevice, PublishedDevices};
use crate::sequence::SequenceFilter;
use crate::settings::BridgeSettings;

const VENDOR_LIFX: u32 = 1;
const HOST_FIRMWARE_BUILD: u64 = 1_428_977_151_000_000_000;
const HOST_FIRMWARE_VERSION: u32 = 65538;
/// Bit pattern of the signal strength a LIFX Original reports
const WIFI_SIGNAL_BITS: u32 = 944_912_011;
const WIFI_TX: u32 = 3_397_400;
const WIFI_RX: u32 = 23_670;
const WIFI_RESERVED: i16 = 3010;
const WIFI_FIRMWARE_VERSION: u32 = 6_619_161;

/// The parts of the bridge settings the replies report.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    /// Advertised in StateService
    pub port: u16,
    pub location_label: String,
    pub group_label: String,
    pub white_product: u32,
    pub color_product: u32,
}

impl From<&BridgeSettings> for ResponderSettings {
    fn from(settings: &BridgeSettings) -> ResponderSettings {
        ResponderSettings {
            port: settings.port,
            location_label: settings.location_label.clone(),
            group_label: settings.group_label.clone(),
            white_product: settings.white_product,
            color_product: settings.color_product,
        }
    }
}

type StateFn = fn(&Responder, &PublishedDevice) -> Result<Message>;
type ApplyFn = fn(&Responder, &PublishedDevice, &Message) -> Result<()>;

#[derive(Clone, Copy)]
enum Action {
    /// Reply with the device's state, then an acknowledgement if one was asked for.
    Query(StateFn),
    /// Apply the change, acknowledge if asked to, then reply with the new state if asked to.
    Set(ApplyFn, StateFn),
    /// Send the payload back from every device, whatever the target.
    Echo,
    /// Replies other devices send.  Logged and dropped.
    Inbound,
}

struct Handler {
    typ: u16,
    name: &'static str,
    action: Action,
}

static HANDLERS: &[Handler] = &[
    Handler { typ: 2, name: "GetService", action: Action::Query(Responder::state_service) },
    Handler { typ: 3, name: "StateService", action: Action::Inbound },
    Handler { typ: 12, name: "GetHostInfo", action: Action::Query(Responder::state_host_info) },
    Handler { typ: 13, name: "StateHostInfo", action: Action::Inbound },
    Handler { typ: 14, name: "GetHostFirmware", action: Action::Query(Responder::state_host_firmware) },
    Handler { typ: 15, name: "StateHostFirmware", action: Action::Inbound },
    Handler { typ: 16, name: "GetWifiInfo", action: Action::Query(Responder::state_wifi_info) },
    Handler { typ: 17, name: "StateWifiInfo", action: Action::Inbound },
    Handler { typ: 18, name: "GetWifiFirmware", action: Action::Query(Responder::state_wifi_firmware) },
    Handler { typ: 19, name: "StateWifiFirmware", action: Action::Inbound },
    Handler { typ: 20, name: "GetPower", action: Action::Query(Responder::state_power) },
    Handler { typ: 21, name: "SetPower", action: Action::Set(Responder::apply_power, Responder::state_power) },
    Handler { typ: 22, name: "StatePower", action: Action::Inbound },
    Handler { typ: 23, name: "GetLabel", action: Action::Query(Responder::state_label) },
    Handler { typ: 24, name: "SetLabel", action: Action::Set(Responder::apply_label, Responder::state_label) },
    Handler { typ: 25, name: "StateLabel", action: Action::Inbound },
    Handler { typ: 32, name: "GetVersion", action: Action::Query(Responder::state_version) },
    Handler { typ: 33, name: "StateVersion", action: Action::Inbound },
    Handler { typ: 34, name: "GetInfo", action: Action::Query(Responder::state_info) },
    Handler { typ: 35, name: "StateInfo", action: Action::Inbound },
    Handler { typ: 45, name: "Acknowledgement", action: Action::Inbound },
    Handler { typ: 48, name: "GetLocation", action: Action::Query(Responder::state_location) },
    Handler { typ: 50, name: "StateLocation", action: Action::Inbound },
    Handler { typ: 51, name: "GetGroup", action: Action::Query(Responder::state_group) },
    Handler { typ: 53, name: "StateGroup", action: Action::Inbound },
    Handler { typ: 58, name: "EchoRequest", action: Action::Echo },
    Handler { typ: 59, name: "EchoResponse", action: Action::Inbound },
    Handler { typ: 101, name: "LightGet", action: Action::Query(Responder::light_state) },
    Handler { typ: 102, name: "LightSetColor", action: Action::Set(Responder::apply_color, Responder::light_state) },
    Handler { typ: 107, name: "LightState", action: Action::Inbound },
    Handler { typ: 116, name: "LightGetPower", action: Action::Query(Responder::light_state_power) },
    Handler { typ: 117, name: "LightSetPower", action: Action::Set(Responder::apply_power, Responder::light_state_power) },
    Handler { typ: 118, name: "LightStatePower", action: Action::Inbound },
];

fn handler(typ: u16) -> Option<&'static Handler> {
    HANDLERS.iter().find(|h| h.typ == typ)
}

/// Header fields for a reply from `device` to `request`.
fn reply_options(request: &RawMessage, device: &PublishedDevice) -> BuildOptions {
    BuildOptions {
        target: Some(device.address().target()),
        ack_required: false,
        res_required: false,
        sequence: request.frame_addr.sequence,
        source: request.frame.source,
    }
}

pub struct Responder {
    devices: Arc<PublishedDevices>,
    adapter: DeviceAdapter,
    sequence: SequenceFilter,
    settings: ResponderSettings,
    started: Instant,
}

impl Responder {
    pub fn new(
        devices: Arc<PublishedDevices>,
        adapter: DeviceAdapter,
        settings: ResponderSettings,
    ) -> Responder {
        Responder {
            devices,
            adapter,
            sequence: SequenceFilter::new(),
            settings,
            started: Instant::now(),
        }
    }

    /// The replies to one decoded request from `peer`, in the order they should be sent.
    pub fn respond(&mut self, raw: &RawMessage, msg: &Message, peer: SocketAddr) -> Vec<RawMessage> {
        let seq = raw.frame_addr.sequence;
        if !self.sequence.admit(seq) {
            debug!("skipping message from {}, already seen seq_num = {}", peer, seq);
            return Vec::new();
        }

        let typ = raw.protocol_header.typ;
        let handler = match handler(typ) {
            Some(handler) => handler,
            None => {
                debug!("ignoring unknown message type {} from {}", typ, peer);
                return Vec::new();
            }
        };
        debug!(
            "{} from {} (source {}, seq_num = {}, target {:#x}{})",
            handler.name,
            peer,
            raw.frame.source,
            seq,
            raw.frame_addr.target,
            if raw.frame.tagged { ", tagged" } else { "" }
        );

        match handler.action {
            Action::Inbound => {
                debug!("{} from {} is a device reply, nothing to do", handler.name, peer);
                if raw.frame_addr.ack_required || raw.frame_addr.res_required {
                    warn!(
                        "{} from {} asks for an ack or response, which devices don't send",
                        handler.name, peer
                    );
                }
                Vec::new()
            }
            Action::Echo => self.echo(raw, msg),
            Action::Query(_) | Action::Set(..) => {
                let mut replies = Vec::new();
                let mut stale = false;
                for device in self.devices.snapshot() {
                    if !raw.frame.tagged && !device.address().matches(raw.frame_addr.target) {
                        continue;
                    }
                    match self.answer(handler, raw, msg, &device, &mut replies) {
                        Ok(()) => {}
                        Err(Error::DeviceNotFound(id)) => {
                            error!("{}: device {} ({}) doesn't exist", handler.name, id, device.label.0);
                            stale = true;
                        }
                        Err(e) => error!("{}: unable to answer for device {}: {}", handler.name, device.id, e),
                    }
                }
                if stale {
                    if let Err(e) = self.devices.refresh() {
                        warn!("unable to refresh published devices: {}", e);
                    }
                }
                replies
            }
        }
    }

    /// Adds the replies one device sends for a query or a mutation to `replies`.
    ///
    /// Replies pushed before an error stay: a mutation that was applied is still acknowledged
    /// when reading back the new state fails.
    fn answer(
        &self,
        handler: &Handler,
        raw: &RawMessage,
        msg: &Message,
        device: &PublishedDevice,
        replies: &mut Vec<RawMessage>,
    ) -> Result<()> {
        let opts = reply_options(raw, device);
        let ack = || RawMessage::build(&opts, Message::Acknowledgement { seq: opts.sequence });

        match handler.action {
            Action::Query(state) => {
                replies.push(RawMessage::build(&opts, state(self, device)?)?);
                if raw.frame_addr.ack_required {
                    replies.push(ack()?);
                }
            }
            Action::Set(apply, state) => {
                apply(self, device, msg)?;
                if raw.frame_addr.ack_required {
                    replies.push(ack()?);
                }
                if raw.frame_addr.res_required {
                    replies.push(RawMessage::build(&opts, state(self, device)?)?);
                }
            }
            Action::Echo | Action::Inbound => {}
        }
        Ok(())
    }

    fn echo(&self, raw: &RawMessage, msg: &Message) -> Vec<RawMessage> {
        let payload = match msg {
            Message::EchoRequest { payload } => payload,
            _ => return Vec::new(),
        };
        let mut replies = Vec::new();
        for device in self.devices.snapshot() {
            let opts = reply_options(raw, &device);
            let built = RawMessage::build(
                &opts,
                Message::EchoResponse {
                    payload: payload.clone(),
                },
            )
            .and_then(|reply| {
                replies.push(reply);
                if raw.frame_addr.ack_required {
                    replies.push(RawMessage::build(
                        &opts,
                        Message::Acknowledgement { seq: opts.sequence },
                    )?);
                }
                Ok(())
            });
            if let Err(e) = built {
                error!("EchoRequest: unable to answer for device {}: {}", device.id, e);
            }
        }
        replies
    }

    fn state_service(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateService {
            service: Service::UDP,
            port: u32::from(self.settings.port),
        })
    }

    fn state_host_info(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateHostInfo {
            signal: 0.0,
            tx: 0,
            rx: 0,
            reserved: 0,
        })
    }

    fn state_host_firmware(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateHostFirmware {
            build: HOST_FIRMWARE_BUILD,
            reserved: 0,
            version: HOST_FIRMWARE_VERSION,
        })
    }

    fn state_wifi_info(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateWifiInfo {
            signal: f32::from_bits(WIFI_SIGNAL_BITS),
            tx: WIFI_TX,
            rx: WIFI_RX,
            reserved: WIFI_RESERVED,
        })
    }

    fn state_wifi_firmware(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateWifiFirmware {
            build: 0,
            reserved: 0,
            version: WIFI_FIRMWARE_VERSION,
        })
    }

    fn state_power(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StatePower {
            level: self.adapter.get_power(device.id)?.into(),
        })
    }

    fn state_label(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateLabel {
            label: device.label.clone(),
        })
    }

    fn state_version(&self, device: &PublishedDevice) -> Result<Message> {
        let product = if self.adapter.capabilities(device.id)?.rgb {
            self.settings.color_product
        } else {
            self.settings.white_product
        };
        Ok(Message::StateVersion {
            vendor: VENDOR_LIFX,
            product,
            version: 0,
        })
    }

    fn state_info(&self, _device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateInfo {
            time: now_nanos(),
            uptime: u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX),
            downtime: 0,
        })
    }

    fn state_location(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateLocation {
            location: device.properties.location,
            label: lifx_core::LifxString::new(&self.settings.location_label),
            updated_at: device.properties.updated_at,
        })
    }

    fn state_group(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::StateGroup {
            group: device.properties.group,
            label: lifx_core::LifxString::new(&self.settings.group_label),
            updated_at: device.properties.updated_at,
        })
    }

    fn light_state(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::LightState {
            color: self.adapter.get_color(device.id)?,
            reserved: 0,
            power: self.adapter.get_power(device.id)?.into(),
            label: device.label.clone(),
            reserved2: 0,
        })
    }

    fn light_state_power(&self, device: &PublishedDevice) -> Result<Message> {
        Ok(Message::LightStatePower {
            level: self.adapter.get_power(device.id)?.into(),
        })
    }

    fn apply_power(&self, device: &PublishedDevice, msg: &Message) -> Result<()> {
        let level = match *msg {
            Message::SetPower { level } | Message::LightSetPower { level, .. } => level,
            _ => return Ok(()),
        };
        self.adapter
            .turn_on_off(device.id, lifx_core::PowerLevel::from_level(level).is_on())
    }

    fn apply_label(&self, device: &PublishedDevice, msg: &Message) -> Result<()> {
        if let Message::SetLabel { label } = msg {
            info!(
                "renaming {} to {:?} isn't supported, rename it in the automation host",
                device.label.0, label.0
            );
        }
        Ok(())
    }

    fn apply_color(&self, device: &PublishedDevice, msg: &Message) -> Result<()> {
        match *msg {
            Message::LightSetColor { color, duration, .. } => {
                debug!(
                    "{}: set color to {} over {}ms",
                    device.label.0,
                    color.describe(false),
                    duration
                );
                self.adapter.set_color(device.id, color)
            }
            _ => Ok(()),
        }
    }
}
