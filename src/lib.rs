//! Makes devices of a home-automation system look like LIFX bulbs on the local network.
//!
//! LIFX controllers (the phone app, voice assistants, scripts using the LAN protocol) discover
//! the bridge's devices with a broadcast and then drive them with the same messages they'd send
//! a real bulb.  [server::Server] owns the UDP socket, [responder::Responder] decides what each
//! emulated bulb answers, and [adapter::DeviceAdapter] maps LIFX power, brightness and color
//! onto whatever the device can do.
//!
//! The automation host is reached through the [registry::DeviceRegistry] trait.
//! [memory::MemoryRegistry] is an implementation backed by the settings file.

pub mod adapter;
pub mod color;
pub mod error;
pub mod memory;
pub mod registry;
pub mod responder;
pub mod sequence;
pub mod server;
pub mod settings;

pub use error::{Error, Result};
