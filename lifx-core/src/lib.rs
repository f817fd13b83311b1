//! This crate provides the message types and framing for the LIFX LAN protocol, as seen from the
//! device side of the wire.
//!
//! More info about the protocol can be found here: https://lan.developer.lifx.com/
//!
//! Like other low-level LIFX libraries, this crate does not talk to the network.  It turns
//! datagrams into [RawMessage]s and typed [Message]s, and back again.
//!
//! # Decoding
//!
//! [RawMessage::unpack] splits a datagram into its 36 byte header and its payload, and
//! [Message::from_raw] interprets the payload based on the message type found in the header.
//! [decode] does both.  Message types that this crate doesn't know about are not an error: they
//! decode to [Message::Unknown] so that the caller can log and ignore them.
//!
//! # Reserved fields
//! When *constructing* packets, every reserved field is set to zero.  However, it's possible to
//! receive packets with these fields set to non-zero values, so they are preserved when decoding.
//! Be conservative in what you send, and liberal in what you accept.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Size in bytes of the frame, frame address and protocol header taken together.
pub const HEADER_SIZE: usize = 36;

/// The only protocol number LIFX devices speak.
pub const PROTOCOL_NUMBER: u16 = 1024;

/// The UDP port LIFX devices listen on.
pub const DEFAULT_PORT: u16 = 56700;

/// Various message encoding/decoding errors
#[derive(Error, Debug)]
pub enum Error {
    /// The datagram is truncated, or its declared size doesn't agree with its contents.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// One of the message fields contains an invalid or unsupported value.
    ///
    /// The inner string is a description of the error.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

trait LifxFrom<T>: Sized {
    fn from(val: T) -> Result<Self, Error>;
}

macro_rules! derive_lifx_from {
{ $( $t:ty ),*} => {
    $(
        impl LifxFrom<$t> for $t {
            fn from(val: $t) -> Result<Self, Error> { Ok(val)}
        }
    )*

}
}

derive_lifx_from! {
    u8, u16, i16, u32, f32, u64, LifxIdent, LifxString, EchoPayload, HSBK
}

impl LifxFrom<u8> for Service {
    fn from(val: u8) -> Result<Service, Error> {
        if val != Service::UDP as u8 {
            Err(Error::ProtocolError(format!(
                "Unknown service value {}",
                val
            )))
        } else {
            Ok(Service::UDP)
        }
    }
}

/// Opaque payload carried by [Message::EchoRequest] and [Message::EchoResponse].
#[derive(Clone, PartialEq, Eq)]
pub struct EchoPayload(pub [u8; 64]);

impl std::fmt::Debug for EchoPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "<EchoPayload>")
    }
}

/// 16 byte identifier used for locations and groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifxIdent(pub [u8; 16]);

/// Lifx strings are fixed-length (32-bytes maximum), zero padded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifxString(pub String);

impl LifxString {
    /// Constructs a new LifxString, truncating to 32 bytes.
    ///
    /// Truncation never splits a UTF-8 sequence.
    pub fn new(s: &str) -> LifxString {
        let mut end = s.len().min(32);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        LifxString(s[..end].to_owned())
    }
}

impl std::fmt::Display for LifxString {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl std::cmp::PartialEq<str> for LifxString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

trait LittleEndianWriter<T>: WriteBytesExt {
    fn write_val(&mut self, v: T) -> Result<(), io::Error>;
}

macro_rules! derive_writer {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: WriteBytesExt> LittleEndianWriter<$t> for T {
            fn write_val(&mut self, v: $t) -> Result<(), io::Error> {
                self . $m ::<LittleEndian>(v)
            }
        }
    )*

}
}

derive_writer! { write_u32: u32, write_u16: u16, write_i16: i16, write_u64: u64, write_f32: f32 }

impl<T: WriteBytesExt> LittleEndianWriter<u8> for T {
    fn write_val(&mut self, v: u8) -> Result<(), io::Error> {
        self.write_u8(v)
    }
}

/// Strings are written as at most 32 bytes of UTF-8, never splitting a character, zero padded.
impl<T: WriteBytesExt> LittleEndianWriter<&LifxString> for T {
    fn write_val(&mut self, v: &LifxString) -> Result<(), io::Error> {
        let mut len = v.0.len().min(32);
        while !v.0.is_char_boundary(len) {
            len -= 1;
        }
        self.write_all(&v.0.as_bytes()[..len])?;
        self.write_all(&[0; 32][..32 - len])
    }
}

impl<T: WriteBytesExt> LittleEndianWriter<&LifxIdent> for T {
    fn write_val(&mut self, v: &LifxIdent) -> Result<(), io::Error> {
        self.write_all(&v.0)
    }
}

impl<T: WriteBytesExt> LittleEndianWriter<&EchoPayload> for T {
    fn write_val(&mut self, v: &EchoPayload) -> Result<(), io::Error> {
        self.write_all(&v.0)
    }
}

impl<T: WriteBytesExt> LittleEndianWriter<HSBK> for T {
    fn write_val(&mut self, v: HSBK) -> Result<(), io::Error> {
        self.write_val(v.hue)?;
        self.write_val(v.saturation)?;
        self.write_val(v.brightness)?;
        self.write_val(v.kelvin)?;
        Ok(())
    }
}

trait LittleEndianReader<T> {
    fn read_val(&mut self) -> Result<T, io::Error>;
}

macro_rules! derive_reader {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: ReadBytesExt> LittleEndianReader<$t> for T {
            fn read_val(&mut self) -> Result<$t, io::Error> {
                self . $m ::<LittleEndian>()
            }
        }
    )*

}
}

derive_reader! { read_u32: u32, read_u16: u16, read_i16: i16, read_u64: u64, read_f32: f32 }

impl<R: ReadBytesExt> LittleEndianReader<u8> for R {
    fn read_val(&mut self) -> Result<u8, io::Error> {
        self.read_u8()
    }
}

impl<R: ReadBytesExt> LittleEndianReader<HSBK> for R {
    fn read_val(&mut self) -> Result<HSBK, io::Error> {
        let hue = self.read_val()?;
        let sat = self.read_val()?;
        let bri = self.read_val()?;
        let kel = self.read_val()?;
        Ok(HSBK {
            hue,
            saturation: sat,
            brightness: bri,
            kelvin: kel,
        })
    }
}

impl<R: ReadBytesExt> LittleEndianReader<LifxIdent> for R {
    fn read_val(&mut self) -> Result<LifxIdent, io::Error> {
        let mut val = [0; 16];
        self.read_exact(&mut val)?;
        Ok(LifxIdent(val))
    }
}

impl<R: ReadBytesExt> LittleEndianReader<LifxString> for R {
    fn read_val(&mut self) -> Result<LifxString, io::Error> {
        let mut raw = [0; 32];
        self.read_exact(&mut raw)?;
        let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
        Ok(LifxString(String::from_utf8_lossy(&raw[..end]).into_owned()))
    }
}

impl<R: ReadBytesExt> LittleEndianReader<EchoPayload> for R {
    fn read_val(&mut self) -> Result<EchoPayload, io::Error> {
        let mut val = [0; 64];
        self.read_exact(&mut val)?;
        Ok(EchoPayload(val))
    }
}

macro_rules! unpack {
    ($msg:ident, $typ:ident, $( $n:ident: $t:ident ),*) => {
        {
        let mut c = Cursor::new(&$msg.payload);
        $(
            let $n: $t = c.read_val()?;
        )*

        Message::$typ{
            $(
                $n: LifxFrom::from($n)?,
            )*
        }
        }

    };
}

/// What services are exposed by the device.
///
/// LIFX only documents the UDP service, though bulbs may support other undocumented services.
/// A StateService with a non-UDP service fails to decode.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Service {
    UDP = 1,
}

/// Device power, as reported in [Message::StatePower] and friends.
///
/// The protocol only defines the two extremes.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerLevel {
    Standby = 0,
    Enabled = 65535,
}

impl PowerLevel {
    /// Interprets a requested power level.  Anything non-zero counts as on.
    pub fn from_level(level: u16) -> PowerLevel {
        if level == 0 {
            PowerLevel::Standby
        } else {
            PowerLevel::Enabled
        }
    }

    pub fn is_on(self) -> bool {
        self == PowerLevel::Enabled
    }
}

impl From<PowerLevel> for u16 {
    fn from(level: PowerLevel) -> u16 {
        level as u16
    }
}

/// Decoded LIFX Messages
///
/// This enum lists the device and light messages a LIFX bulb answers to, plus the replies it
/// sends.  Anything else decodes to [Message::Unknown].
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// GetService - 2
    ///
    /// Sent by a client to acquire responses from all devices on the local network. No payload is
    /// required. Causes the devices to transmit a StateService message.
    GetService,

    /// StateService - 3
    ///
    /// Response to [Message::GetService] message.
    StateService {
        /// unsigned 8-bit integer, maps to `Service`
        service: Service,
        /// Port number of the light.  If the service is temporarily unavailable, then the port value
        /// will be 0.
        port: u32,
    },

    /// GetHostInfo - 12
    ///
    /// Get Host MCU information. No payload is required. Causes the device to transmit a
    /// [Message::StateHostInfo] message.
    GetHostInfo,

    /// StateHostInfo - 13
    ///
    /// Response to [Message::GetHostInfo] message.
    StateHostInfo {
        /// radio receive signal strength in miliWatts
        signal: f32,
        /// Bytes transmitted since power on
        tx: u32,
        /// Bytes received since power on
        rx: u32,
        reserved: i16,
    },

    /// GetHostFirmware - 14
    ///
    /// Gets Host MCU firmware information. No payload is required. Causes the device to transmit a
    /// [Message::StateHostFirmware] message.
    GetHostFirmware,

    /// StateHostFirmware - 15
    ///
    /// Response to [Message::GetHostFirmware] message.
    StateHostFirmware {
        /// Firmware build time (absolute time in nanoseconds since epoch)
        build: u64,
        reserved: u64,
        /// Firmware version
        version: u32,
    },

    /// GetWifiInfo - 16
    ///
    /// Get Wifi subsystem information. No payload is required. Causes the device to transmit a
    /// [Message::StateWifiInfo] message.
    GetWifiInfo,

    /// StateWifiInfo - 17
    ///
    /// Response to [Message::GetWifiInfo] message.
    StateWifiInfo {
        /// Radio receive signal strength in mw
        signal: f32,
        /// bytes transmitted since power on
        tx: u32,
        /// bytes received since power on
        rx: u32,
        reserved: i16,
    },

    /// GetWifiFirmware - 18
    ///
    /// Get Wifi subsystem firmware. No payload is required. Causes the device to transmit a
    /// [Message::StateWifiFirmware] message.
    GetWifiFirmware,

    /// StateWifiFirmware - 19
    ///
    /// Response to [Message::GetWifiFirmware] message.
    StateWifiFirmware {
        /// firmware build time (absolute time in nanoseconds since epoch)
        build: u64,
        reserved: u64,
        /// firmware version
        version: u32,
    },

    /// GetPower - 20
    ///
    /// Get device power level. No payload is required. Causes the device to transmit a
    /// [Message::StatePower] message
    GetPower,

    /// SetPower - 21
    ///
    /// Set device power level.
    SetPower {
        /// Zero implies standby and non-zero means on.  See [PowerLevel::from_level].
        level: u16,
    },

    /// StatePower - 22
    ///
    /// Response to [Message::GetPower] message.
    StatePower { level: u16 },

    /// GetLabel - 23
    ///
    /// Get device label. No payload is required. Causes the device to transmit a
    /// [Message::StateLabel] message.
    GetLabel,

    /// SetLabel - 24
    ///
    /// Set the device label text.
    SetLabel { label: LifxString },

    /// StateLabel - 25
    ///
    /// Response to [Message::GetLabel] message.
    StateLabel { label: LifxString },

    /// GetVersion - 32
    ///
    /// Get the hardware version. No payload is required. Causes the device to transmit a
    /// [Message::StateVersion] message.
    GetVersion,

    /// StateVersion - 33
    ///
    /// Provides the hardware version of the device.
    StateVersion {
        /// vendor ID
        vendor: u32,
        /// product ID
        product: u32,
        /// hardware version
        version: u32,
    },

    /// GetInfo - 34
    ///
    /// Get run-time information. No payload is required. Causes the device to transmit a
    /// [Message::StateInfo] message.
    GetInfo,

    /// StateInfo - 35
    ///
    /// Provides run-time information of device.
    StateInfo {
        /// current time (absolute time in nanoseconds since epoch)
        time: u64,
        /// time since last power on (relative time in nanoseconds)
        uptime: u64,
        /// last power off period (5 second accuracy, in nanoseconds)
        downtime: u64,
    },

    /// Acknowledgement - 45
    ///
    /// Response to any message sent with ack_required set to 1.
    ///
    /// (Note that technically this message has no payload, but the frame sequence number is stored
    /// here for convenience).
    Acknowledgement { seq: u8 },

    /// GetLocation - 48
    ///
    /// Ask the bulb to return its location information. No payload is required. Causes the device
    /// to transmit a [Message::StateLocation] message.
    GetLocation,

    /// StateLocation - 50
    StateLocation {
        location: LifxIdent,
        label: LifxString,
        /// UTC timestamp of last label update in nanoseconds
        updated_at: u64,
    },

    /// GetGroup - 51
    ///
    /// Ask the bulb to return its group membership information.  No payload is required.
    /// Causes the device to transmit a [Message::StateGroup] message.
    GetGroup,

    /// StateGroup - 53
    StateGroup {
        group: LifxIdent,
        label: LifxString,
        updated_at: u64,
    },

    /// EchoRequest - 58
    ///
    /// Request an arbitrary payload be echoed back. Causes the device to transmit an
    /// [Message::EchoResponse] message.
    EchoRequest { payload: EchoPayload },

    /// EchoResponse - 59
    ///
    /// Echo response with payload sent in the EchoRequest.
    EchoResponse { payload: EchoPayload },

    /// Get - 101
    ///
    /// Sent by a client to obtain the light state. No payload required. Causes the device to
    /// transmit a [Message::LightState] message.
    LightGet,

    /// SetColor - 102
    ///
    /// Sent by a client to change the light state.
    ///
    /// If the Frame Address res_required field is set to one (1) then the device will transmit a
    /// State message.
    LightSetColor {
        reserved: u8,
        /// Color in HSBK
        color: HSBK,
        /// Color transition time in milliseconds
        duration: u32,
    },

    /// State - 107
    ///
    /// Sent by a device to provide the current light state.
    LightState {
        color: HSBK,
        reserved: i16,
        power: u16,
        label: LifxString,
        reserved2: u64,
    },

    /// GetPower - 116
    ///
    /// Sent by a client to obtain the power level. No payload required. Causes the device to
    /// transmit a [Message::LightStatePower] message.
    LightGetPower,

    /// SetPower - 117
    ///
    /// Sent by a client to change the light power level.  The duration is the power level
    /// transition time in milliseconds.
    LightSetPower { level: u16, duration: u32 },

    /// StatePower - 118
    ///
    /// Sent by a device to provide the current power level.
    LightStatePower { level: u16 },

    /// A message type this crate doesn't know how to decode.
    ///
    /// LIFX clients and devices are known to send messages that are not officially documented, so
    /// this does not necessarily represent a bug.  The payload is kept as-is.
    Unknown { typ: u16, payload: Vec<u8> },
}

/// Fixed payload size, in bytes, of each known message type.
pub fn payload_size(typ: u16) -> Option<usize> {
    let size = match typ {
        2 | 12 | 14 | 16 | 18 | 20 | 23 | 32 | 34 | 45 | 48 | 51 | 101 | 116 => 0,
        3 => 5,
        13 | 17 => 14,
        15 | 19 => 20,
        21 | 22 | 118 => 2,
        24 | 25 => 32,
        33 => 12,
        35 => 24,
        50 | 53 => 56,
        58 | 59 => 64,
        102 => 13,
        107 => 52,
        117 => 6,
        _ => return None,
    };
    Some(size)
}

impl Message {
    /// The message type number carried in the protocol header.
    pub fn get_num(&self) -> u16 {
        match *self {
            Message::GetService => 2,
            Message::StateService { .. } => 3,
            Message::GetHostInfo => 12,
            Message::StateHostInfo { .. } => 13,
            Message::GetHostFirmware => 14,
            Message::StateHostFirmware { .. } => 15,
            Message::GetWifiInfo => 16,
            Message::StateWifiInfo { .. } => 17,
            Message::GetWifiFirmware => 18,
            Message::StateWifiFirmware { .. } => 19,
            Message::GetPower => 20,
            Message::SetPower { .. } => 21,
            Message::StatePower { .. } => 22,
            Message::GetLabel => 23,
            Message::SetLabel { .. } => 24,
            Message::StateLabel { .. } => 25,
            Message::GetVersion => 32,
            Message::StateVersion { .. } => 33,
            Message::GetInfo => 34,
            Message::StateInfo { .. } => 35,
            Message::Acknowledgement { .. } => 45,
            Message::GetLocation => 48,
            Message::StateLocation { .. } => 50,
            Message::GetGroup => 51,
            Message::StateGroup { .. } => 53,
            Message::EchoRequest { .. } => 58,
            Message::EchoResponse { .. } => 59,
            Message::LightGet => 101,
            Message::LightSetColor { .. } => 102,
            Message::LightState { .. } => 107,
            Message::LightGetPower => 116,
            Message::LightSetPower { .. } => 117,
            Message::LightStatePower { .. } => 118,
            Message::Unknown { typ, .. } => typ,
        }
    }

    /// Tries to parse the payload in a [RawMessage], based on its message type.
    ///
    /// Unrecognized message types are returned as [Message::Unknown].  A payload shorter than its
    /// type's documented layout is a [Error::MalformedMessage]; trailing bytes are ignored.
    pub fn from_raw(msg: &RawMessage) -> Result<Message, Error> {
        let typ = msg.protocol_header.typ;
        let expected = match payload_size(typ) {
            Some(size) => size,
            None => {
                return Ok(Message::Unknown {
                    typ,
                    payload: msg.payload.clone(),
                })
            }
        };
        if msg.payload.len() < expected {
            return Err(Error::MalformedMessage(format!(
                "message type {} needs a {} byte payload, got {}",
                typ,
                expected,
                msg.payload.len()
            )));
        }

        match typ {
            2 => Ok(Message::GetService),
            3 => Ok(unpack!(msg, StateService, service: u8, port: u32)),
            12 => Ok(Message::GetHostInfo),
            13 => Ok(unpack!(
                msg,
                StateHostInfo,
                signal: f32,
                tx: u32,
                rx: u32,
                reserved: i16
            )),
            14 => Ok(Message::GetHostFirmware),
            15 => Ok(unpack!(
                msg,
                StateHostFirmware,
                build: u64,
                reserved: u64,
                version: u32
            )),
            16 => Ok(Message::GetWifiInfo),
            17 => Ok(unpack!(
                msg,
                StateWifiInfo,
                signal: f32,
                tx: u32,
                rx: u32,
                reserved: i16
            )),
            18 => Ok(Message::GetWifiFirmware),
            19 => Ok(unpack!(
                msg,
                StateWifiFirmware,
                build: u64,
                reserved: u64,
                version: u32
            )),
            20 => Ok(Message::GetPower),
            21 => Ok(unpack!(msg, SetPower, level: u16)),
            22 => Ok(unpack!(msg, StatePower, level: u16)),
            23 => Ok(Message::GetLabel),
            24 => Ok(unpack!(msg, SetLabel, label: LifxString)),
            25 => Ok(unpack!(msg, StateLabel, label: LifxString)),
            32 => Ok(Message::GetVersion),
            33 => Ok(unpack!(
                msg,
                StateVersion,
                vendor: u32,
                product: u32,
                version: u32
            )),
            34 => Ok(Message::GetInfo),
            35 => Ok(unpack!(
                msg,
                StateInfo,
                time: u64,
                uptime: u64,
                downtime: u64
            )),
            45 => Ok(Message::Acknowledgement {
                seq: msg.frame_addr.sequence,
            }),
            48 => Ok(Message::GetLocation),
            50 => Ok(unpack!(
                msg,
                StateLocation,
                location: LifxIdent,
                label: LifxString,
                updated_at: u64
            )),
            51 => Ok(Message::GetGroup),
            53 => Ok(unpack!(
                msg,
                StateGroup,
                group: LifxIdent,
                label: LifxString,
                updated_at: u64
            )),
            58 => Ok(unpack!(msg, EchoRequest, payload: EchoPayload)),
            59 => Ok(unpack!(msg, EchoResponse, payload: EchoPayload)),
            101 => Ok(Message::LightGet),
            102 => Ok(unpack!(
                msg,
                LightSetColor,
                reserved: u8,
                color: HSBK,
                duration: u32
            )),
            107 => Ok(unpack!(
                msg,
                LightState,
                color: HSBK,
                reserved: i16,
                power: u16,
                label: LifxString,
                reserved2: u64
            )),
            116 => Ok(Message::LightGetPower),
            117 => Ok(unpack!(msg, LightSetPower, level: u16, duration: u32)),
            118 => Ok(unpack!(msg, LightStatePower, level: u16)),
            _ => Ok(Message::Unknown {
                typ,
                payload: msg.payload.clone(),
            }),
        }
    }

    /// Packs the payload of this message, in the layout its message type prescribes.
    pub fn pack_payload(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(payload_size(self.get_num()).unwrap_or(0));
        match self {
            Message::GetService
            | Message::GetHostInfo
            | Message::GetHostFirmware
            | Message::GetWifiFirmware
            | Message::GetWifiInfo
            | Message::GetPower
            | Message::GetLabel
            | Message::GetVersion
            | Message::GetInfo
            | Message::Acknowledgement { .. }
            | Message::GetLocation
            | Message::GetGroup
            | Message::LightGet
            | Message::LightGetPower => {
                // these types have no payload
            }
            Message::StateService { service, port } => {
                v.write_val(*service as u8)?;
                v.write_val(*port)?;
            }
            Message::StateHostInfo {
                signal,
                tx,
                rx,
                reserved,
            }
            | Message::StateWifiInfo {
                signal,
                tx,
                rx,
                reserved,
            } => {
                v.write_val(*signal)?;
                v.write_val(*tx)?;
                v.write_val(*rx)?;
                v.write_val(*reserved)?;
            }
            Message::StateHostFirmware {
                build,
                reserved,
                version,
            }
            | Message::StateWifiFirmware {
                build,
                reserved,
                version,
            } => {
                v.write_val(*build)?;
                v.write_val(*reserved)?;
                v.write_val(*version)?;
            }
            Message::SetPower { level }
            | Message::StatePower { level }
            | Message::LightStatePower { level } => {
                v.write_val(*level)?;
            }
            Message::SetLabel { label } | Message::StateLabel { label } => {
                v.write_val(label)?;
            }
            Message::StateVersion {
                vendor,
                product,
                version,
            } => {
                v.write_val(*vendor)?;
                v.write_val(*product)?;
                v.write_val(*version)?;
            }
            Message::StateInfo {
                time,
                uptime,
                downtime,
            } => {
                v.write_val(*time)?;
                v.write_val(*uptime)?;
                v.write_val(*downtime)?;
            }
            Message::StateLocation {
                location: ident,
                label,
                updated_at,
            }
            | Message::StateGroup {
                group: ident,
                label,
                updated_at,
            } => {
                v.write_val(ident)?;
                v.write_val(label)?;
                v.write_val(*updated_at)?;
            }
            Message::EchoRequest { payload } | Message::EchoResponse { payload } => {
                v.write_val(payload)?;
            }
            Message::LightSetColor {
                reserved,
                color,
                duration,
            } => {
                v.write_val(*reserved)?;
                v.write_val(*color)?;
                v.write_val(*duration)?;
            }
            Message::LightState {
                color,
                reserved,
                power,
                label,
                reserved2,
            } => {
                v.write_val(*color)?;
                v.write_val(*reserved)?;
                v.write_val(*power)?;
                v.write_val(label)?;
                v.write_val(*reserved2)?;
            }
            Message::LightSetPower { level, duration } => {
                v.write_val(*level)?;
                v.write_val(*duration)?;
            }
            Message::Unknown { payload, .. } => {
                v.write_all(payload)?;
            }
        }
        Ok(v)
    }
}

/// Bulb color (Hue-Saturation-Brightness-Kelvin)
///
/// # Notes:
///
/// When a light is displaying whites, saturation will be zero, hue will be ignored, and only
/// brightness and kelvin will matter.
///
/// Normal values for "kelvin" are from 2500 (warm/yellow) to 9000 (cool/blue)
///
/// When a light is displaying colors, kelvin is ignored.
///
/// To display "pure" colors, set saturation to full (65535).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HSBK {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl HSBK {
    pub fn describe(&self, short: bool) -> String {
        match short {
            true if self.saturation == 0 => format!("{}K", self.kelvin),
            true => format!(
                "{:.0}/{:.0}",
                (self.hue as f32 / 65535.0) * 360.0,
                self.saturation as f32 / 655.35
            ),
            false if self.saturation == 0 => format!(
                "{:.0}% White ({})",
                self.brightness as f32 / 655.35,
                describe_kelvin(self.kelvin)
            ),
            false => format!(
                "{:.0}% hue: {} sat: {}",
                self.brightness as f32 / 655.35,
                self.hue,
                self.saturation
            ),
        }
    }
}

/// Describe (in english words) the color temperature as given in kelvin.
///
/// These descriptions match the values shown in the LIFX mobile app.
pub fn describe_kelvin(k: u16) -> &'static str {
    match k {
        0..=2500 => "Ultra Warm",
        2501..=2700 => "Incandescent",
        2701..=3000 => "Warm",
        3001..=3200 => "Neutral Warm",
        3201..=3500 => "Neutral",
        3501..=4000 => "Cool",
        4001..=4500 => "Cool Daylight",
        4501..=5000 => "Soft Daylight",
        5001..=5500 => "Daylight",
        5501..=6000 => "Noon Daylight",
        6001..=6500 => "Bright Daylight",
        6501..=7000 => "Cloudy Daylight",
        7001..=7500 => "Blue Daylight",
        7501..=8000 => "Blue Overcast",
        8001..=8500 => "Blue Water",
        _ => "Blue Ice",
    }
}

/// The raw message structure
///
/// Contains a low-level protocol info.  This is what is sent and received via UDP packets.
///
/// To parse the payload, use [Message::from_raw].
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub frame: Frame,
    pub frame_addr: FrameAddress,
    pub protocol_header: ProtocolHeader,
    pub payload: Vec<u8>,
}

/// The Frame section contains information about the following:
///
/// * Size of the entire message
/// * LIFX Protocol number: must be 1024 (decimal)
/// * Use of the Frame Address target field
/// * Source identifier
///
/// The `tagged` field is a boolean that indicates whether the Frame Address target field is
/// being used to address an individual device or all devices.  If `tagged` is true, then the
/// `target` field should be all zeros.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// 16 bits: Size of entire message in bytes including this field
    pub size: u16,

    /// 2 bits: Message origin indicator: must be zero (0)
    pub origin: u8,

    /// 1 bit: Determines usage of the Frame Address target field
    pub tagged: bool,

    /// 1 bit: Message includes a target address: must be one (1)
    pub addressable: bool,

    /// 12 bits: Protocol number: must be 1024 (decimal)
    pub protocol: u16,

    /// 32 bits: Source identifier: unique value set by the client, used by responses.
    pub source: u32,
}

/// The Frame Address section contains the following routing information:
///
/// * Target device address
/// * Acknowledgement message is required flag
/// * State response message is required flag
/// * Message sequence number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAddress {
    /// 64 bits: 6 byte device address (MAC address) or zero (0) means all devices.  The
    /// address occupies the low 48 bits, first byte least significant.
    pub target: u64,

    /// 48 bits: Must all be zero (0)
    pub reserved: [u8; 6],

    /// 6 bits: Reserved
    pub reserved2: u8,

    /// 1 bit: Acknowledgement message required
    pub ack_required: bool,

    /// 1 bit: Response message required
    pub res_required: bool,

    /// 8 bits: Wrap around message sequence number
    pub sequence: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolHeader {
    /// 64 bits: Reserved
    pub reserved: u64,

    /// 16 bits: Message type determines the payload being used
    pub typ: u16,

    /// 16 bits: Reserved
    pub reserved2: u16,
}

impl Frame {
    /// packed sized, in bytes
    fn packed_size() -> usize {
        8
    }

    fn validate(&self) -> Result<(), Error> {
        if self.protocol != PROTOCOL_NUMBER {
            return Err(Error::ProtocolError(format!(
                "Unpacked frame had protocol version {}",
                self.protocol
            )));
        }
        Ok(())
    }

    fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());

        v.write_u16::<LittleEndian>(self.size)?;

        // pack origin + tagged + addressable +  protocol as a u16
        let mut d: u16 = ((self.origin & 0b11) as u16) << 14;
        if self.tagged {
            d |= 1 << 13;
        }
        if self.addressable {
            d |= 1 << 12;
        }
        d |= self.protocol & 0b1111_1111_1111;

        v.write_u16::<LittleEndian>(d)?;

        v.write_u32::<LittleEndian>(self.source)?;

        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<Frame, Error> {
        let mut c = Cursor::new(v);

        let size = c.read_val()?;

        // origin + tagged + addressable + protocol
        let d: u16 = c.read_val()?;

        let origin: u8 = ((d & 0b1100_0000_0000_0000) >> 14) as u8;
        let tagged: bool = (d & 0b0010_0000_0000_0000) > 0;
        let addressable = (d & 0b0001_0000_0000_0000) > 0;
        let protocol: u16 = d & 0b0000_1111_1111_1111;

        let source = c.read_val()?;

        let frame = Frame {
            size,
            origin,
            tagged,
            addressable,
            protocol,
            source,
        };
        frame.validate()?;
        Ok(frame)
    }
}

impl FrameAddress {
    fn packed_size() -> usize {
        16
    }

    fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());
        v.write_u64::<LittleEndian>(self.target)?;
        v.write_all(&self.reserved)?;

        let mut b: u8 = (self.reserved2 & 0b11_1111) << 2;
        if self.ack_required {
            b |= 0b10;
        }
        if self.res_required {
            b |= 0b01;
        }
        v.write_u8(b)?;
        v.write_u8(self.sequence)?;
        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<FrameAddress, Error> {
        let mut c = Cursor::new(v);

        let target = c.read_val()?;

        let mut reserved: [u8; 6] = [0; 6];
        c.read_exact(&mut reserved)?;

        let b: u8 = c.read_val()?;
        let reserved2: u8 = (b & 0b1111_1100) >> 2;
        let ack_required = (b & 0b10) > 0;
        let res_required = (b & 0b01) > 0;

        let sequence = c.read_val()?;

        Ok(FrameAddress {
            target,
            reserved,
            reserved2,
            ack_required,
            res_required,
            sequence,
        })
    }
}

impl ProtocolHeader {
    fn packed_size() -> usize {
        12
    }

    /// Packs this part of the packet into some bytes
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());
        v.write_u64::<LittleEndian>(self.reserved)?;
        v.write_u16::<LittleEndian>(self.typ)?;
        v.write_u16::<LittleEndian>(self.reserved2)?;
        Ok(v)
    }

    fn unpack(v: &[u8]) -> Result<ProtocolHeader, Error> {
        let mut c = Cursor::new(v);

        let reserved = c.read_val()?;
        let typ = c.read_val()?;
        let reserved2 = c.read_val()?;

        Ok(ProtocolHeader {
            reserved,
            typ,
            reserved2,
        })
    }
}

/// Options used to contruct a [RawMessage].
///
/// See also [RawMessage::build].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// If not `None`, this is the address of the device the message is from or for.  If `None`,
    /// the message is tagged (addressed to all devices).
    pub target: Option<u64>,
    /// Acknowledgement message required.
    pub ack_required: bool,
    /// Response message required.
    pub res_required: bool,
    /// A wrap around sequence number.  Replies carry the sequence number of their request.
    pub sequence: u8,
    /// Client identifier.  Replies carry the source of their request.
    pub source: u32,
}

impl RawMessage {
    /// Build a RawMessage (which is suitable for sending on the network) from a given Message
    /// type.
    ///
    /// If [BuildOptions::target] is None, then the message is addressed to all devices.  Else it should be a
    /// bulb UID (MAC address)
    pub fn build(options: &BuildOptions, typ: Message) -> Result<RawMessage, Error> {
        let frame = Frame {
            size: 0,
            origin: 0,
            tagged: options.target.is_none(),
            addressable: true,
            protocol: PROTOCOL_NUMBER,
            source: options.source,
        };
        let addr = FrameAddress {
            target: options.target.unwrap_or(0),
            reserved: [0; 6],
            reserved2: 0,
            ack_required: options.ack_required,
            res_required: options.res_required,
            sequence: options.sequence,
        };
        let phead = ProtocolHeader {
            reserved: 0,
            reserved2: 0,
            typ: typ.get_num(),
        };

        let mut msg = RawMessage {
            frame,
            frame_addr: addr,
            protocol_header: phead,
            payload: typ.pack_payload()?,
        };

        let size = msg.packed_size();
        msg.frame.size = u16::try_from(size).map_err(|_| {
            Error::ProtocolError(format!("{} byte message does not fit in a datagram", size))
        })?;

        Ok(msg)
    }

    /// The total size (in bytes) of the packed version of this message.
    pub fn packed_size(&self) -> usize {
        Frame::packed_size()
            + FrameAddress::packed_size()
            + ProtocolHeader::packed_size()
            + self.payload.len()
    }

    /// Packs this RawMessage into some bytes that can be send over the network.
    ///
    /// The length of the returned data will be [RawMessage::packed_size] in size.
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(self.packed_size());
        v.extend(self.frame.pack()?);
        v.extend(self.frame_addr.pack()?);
        v.extend(self.protocol_header.pack()?);
        v.extend(&self.payload);
        Ok(v)
    }

    /// Given some bytes (generally read from a network socket), unpack the data into a
    /// `RawMessage` structure.
    ///
    /// Bytes past the size declared in the frame are ignored.
    pub fn unpack(v: &[u8]) -> Result<RawMessage, Error> {
        if v.len() < HEADER_SIZE {
            return Err(Error::MalformedMessage(format!(
                "{} byte datagram is shorter than the {} byte header",
                v.len(),
                HEADER_SIZE
            )));
        }

        let mut start = 0;
        let frame = Frame::unpack(v)?;
        let size = frame.size as usize;
        if size < HEADER_SIZE || size > v.len() {
            return Err(Error::MalformedMessage(format!(
                "frame declares {} bytes but the datagram holds {}",
                size,
                v.len()
            )));
        }
        start += Frame::packed_size();
        let addr = FrameAddress::unpack(&v[start..])?;
        start += FrameAddress::packed_size();
        let proto = ProtocolHeader::unpack(&v[start..])?;
        start += ProtocolHeader::packed_size();

        let body = Vec::from(&v[start..size]);

        Ok(RawMessage {
            frame,
            frame_addr: addr,
            protocol_header: proto,
            payload: body,
        })
    }
}

/// Unpacks a datagram and decodes its payload.
pub fn decode(v: &[u8]) -> Result<(RawMessage, Message), Error> {
    let raw = RawMessage::unpack(v)?;
    let msg = Message::from_raw(&raw)?;
    Ok((raw, msg))
}

/// Builds and packs a message, ready to be sent.
pub fn encode(options: &BuildOptions, msg: Message) -> Result<Vec<u8>, Error> {
    RawMessage::build(options, msg)?.pack()
}
