use std::io;

use thiserror::Error;

use crate::registry::DeviceId;

/// Errors raised by the bridge.
///
/// None of these stop the transport loop once it is running: a bad datagram or a stale device is
/// logged and the loop moves on.  Only errors at startup are fatal, such as a socket that can't
/// be bound or a settings or state file that can't be read.
#[derive(Error, Debug)]
pub enum Error {
    /// The device identifier no longer resolves in the registry.  The published device list is
    /// stale and needs a refresh.
    #[error("device {0} doesn't exist")]
    DeviceNotFound(DeviceId),

    /// The registry failed for some other reason, e.g. its state file couldn't be written.
    #[error("device registry: {0}")]
    Registry(String),

    #[error(transparent)]
    Codec(#[from] lifx_core::Error),

    #[error("socket: {0}")]
    Socket(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
