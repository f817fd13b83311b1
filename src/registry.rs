//! The bridge's view of the home-automation system it fronts.
//!
//! The automation host owns the devices and is the source of truth for their state.  The bridge
//! reaches it only through [DeviceRegistry], and keeps a [PublishedDevices] cache of which devices
//! to emulate, rebuilt whenever the host says the list changed or a lookup turns out stale.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lifx_core::{LifxIdent, LifxString};
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;

/// Identifier of a device in the automation host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor prefix shared by every synthetic hardware address.
pub const FAKE_MAC_PREFIX: [u8; 2] = [0x00, 0x16];

/// The 6 byte hardware address a published device answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress(pub [u8; 6]);

impl HardwareAddress {
    /// The synthetic ("fake MAC") address of a device: the vendor prefix followed by the device
    /// identifier, big endian.  Distinct identifiers always get distinct addresses.
    pub fn for_device(id: DeviceId) -> HardwareAddress {
        let [a, b, c, d] = id.0.to_be_bytes();
        HardwareAddress([FAKE_MAC_PREFIX[0], FAKE_MAC_PREFIX[1], a, b, c, d])
    }

    /// Inverse of [HardwareAddress::for_device].
    pub fn device_id(&self) -> Option<DeviceId> {
        if self.0[..2] != FAKE_MAC_PREFIX {
            return None;
        }
        let [_, _, a, b, c, d] = self.0;
        Some(DeviceId(u32::from_be_bytes([a, b, c, d])))
    }

    /// The address as it appears in the frame address `target` field.
    pub fn target(&self) -> u64 {
        let mut bytes = [0; 8];
        bytes[..6].copy_from_slice(&self.0);
        u64::from_le_bytes(bytes)
    }

    /// Whether a frame address `target` names this device.  The two reserved bytes are ignored.
    pub fn matches(&self, target: u64) -> bool {
        target & 0xffff_ffff_ffff == self.target()
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// What a device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub dimmable: bool,
    pub rgb: bool,
}

/// A device's current state, in the host's units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    pub on: bool,
    /// 0-100
    pub brightness: u8,
    /// 0-100, for RGB devices
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Level of the white channel(s), 0-100, when the device has them.
    pub white_level: Option<u8>,
    /// White color temperature in kelvin, when the device has one.
    pub white_temperature: Option<u16>,
}

/// A change requested of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    TurnOn,
    TurnOff,
    /// 0-100
    Brightness(u8),
    /// Red, green and blue levels, 0-100 each.  White channels are driven to zero.
    Color { red: u8, green: u8, blue: u8 },
}

/// Per-device values the bridge generates once and asks the host to keep for as long as the
/// device stays published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProperties {
    pub address: HardwareAddress,
    pub location: LifxIdent,
    pub group: LifxIdent,
    /// When the location and group were assigned, in nanoseconds since the epoch.
    pub updated_at: u64,
}

impl DeviceProperties {
    /// Fresh properties for a newly published device.
    pub fn generate(id: DeviceId) -> DeviceProperties {
        DeviceProperties {
            address: HardwareAddress::for_device(id),
            location: LifxIdent(*Uuid::new_v4().as_bytes()),
            group: LifxIdent(*Uuid::new_v4().as_bytes()),
            updated_at: now_nanos(),
        }
    }
}

/// A published device, as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub id: DeviceId,
    pub name: String,
    pub alias: Option<String>,
    /// `None` until the bridge has stored properties for the device.
    pub properties: Option<DeviceProperties>,
}

/// The automation host's device surface.
///
/// Every call that names a device fails with [crate::Error::DeviceNotFound] once the identifier
/// no longer resolves.
pub trait DeviceRegistry: Send + Sync {
    /// Devices currently marked published.
    fn published(&self) -> Result<Vec<Listing>>;

    fn capabilities(&self, id: DeviceId) -> Result<Capabilities>;

    fn state(&self, id: DeviceId) -> Result<DeviceState>;

    fn apply(&self, id: DeviceId, mutation: Mutation) -> Result<()>;

    /// Persist the bridge's properties for a device in the host's property store.
    ///
    /// Host failures other than a missing device are reported as [crate::Error::Registry].
    fn store_properties(&self, id: DeviceId, properties: &DeviceProperties) -> Result<()>;
}

/// A device the bridge is currently emulating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDevice {
    pub id: DeviceId,
    /// The alias if one is set, else the device name
    pub label: LifxString,
    pub properties: DeviceProperties,
}

impl PublishedDevice {
    pub fn address(&self) -> HardwareAddress {
        self.properties.address
    }
}

/// Cache of the devices to emulate.
///
/// Shared between the transport loop, which reads it for every datagram, and whoever relays the
/// host's change notifications, which calls [PublishedDevices::refresh].
pub struct PublishedDevices {
    registry: Arc<dyn DeviceRegistry>,
    devices: RwLock<Vec<PublishedDevice>>,
    /// Held for the whole of a refresh, so a new device gets its properties generated once
    refreshing: Mutex<()>,
}

impl PublishedDevices {
    /// An empty cache.  Call [PublishedDevices::refresh] to fill it.
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> PublishedDevices {
        PublishedDevices {
            registry,
            devices: RwLock::new(Vec::new()),
            refreshing: Mutex::new(()),
        }
    }

    /// Rebuilds the cache from the registry, returning the number of published devices.
    ///
    /// Devices published for the first time get their properties generated and stored.
    pub fn refresh(&self) -> Result<usize> {
        let _refreshing = self
            .refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!("refreshing published device list");
        let mut devices = Vec::new();
        for listing in self.registry.published()? {
            let properties = match listing.properties {
                Some(properties) => properties,
                None => {
                    let properties = DeviceProperties::generate(listing.id);
                    info!(
                        "assigning address {} to newly published device {}",
                        properties.address, listing.id
                    );
                    if let Err(e) = self.registry.store_properties(listing.id, &properties) {
                        warn!("unable to store properties for device {}: {}", listing.id, e);
                    }
                    properties
                }
            };
            let label = match listing.alias.as_deref() {
                Some(alias) if !alias.is_empty() => alias,
                _ => listing.name.as_str(),
            };
            debug!(
                "found published device: {} - {} ({}) - {}",
                listing.id, listing.name, label, properties.address
            );
            devices.push(PublishedDevice {
                id: listing.id,
                label: LifxString::new(label),
                properties,
            });
        }
        devices.sort_by_key(|d| d.id);

        let count = devices.len();
        *self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner) = devices;
        debug!("{} devices published", count);
        Ok(count)
    }

    /// A copy of the current list, in device id order.
    pub fn snapshot(&self) -> Vec<PublishedDevice> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wall clock time in nanoseconds since the epoch.
pub(crate) fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |ns| ns.max(0) as u64)
}
