//! An in-process [DeviceRegistry], seeded from the `[[devices]]` tables of the settings file.
//!
//! It behaves like a host's dimmer and RGB modules: turning a dimmer off drops its brightness to
//! zero and turning it back on restores the last level. Opened with a state file, it keeps the
//! location and group identifiers handed to it across restarts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lifx_core::LifxIdent;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::registry::{
    now_nanos, Capabilities, DeviceId, DeviceProperties, DeviceRegistry, DeviceState,
    HardwareAddress, Listing, Mutation,
};
use crate::settings::DeviceSettings;

/// A device held by [MemoryRegistry].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDevice {
    pub name: String,
    pub alias: Option<String>,
    pub published: bool,
    pub capabilities: Capabilities,
    pub state: DeviceState,
    pub properties: Option<DeviceProperties>,
    /// Brightness to go back to when turned on
    restore_brightness: u8,
}

impl MemoryDevice {
    /// A published dimmer, switched off.
    pub fn dimmer(name: &str) -> MemoryDevice {
        MemoryDevice {
            name: name.to_owned(),
            alias: None,
            published: true,
            capabilities: Capabilities {
                dimmable: true,
                rgb: false,
            },
            state: DeviceState::default(),
            properties: None,
            restore_brightness: 100,
        }
    }

    /// A published relay that can only be switched on and off.
    pub fn relay(name: &str) -> MemoryDevice {
        MemoryDevice {
            capabilities: Capabilities::default(),
            ..MemoryDevice::dimmer(name)
        }
    }

    /// A published RGB module with a white channel, switched off.
    pub fn rgb(name: &str) -> MemoryDevice {
        MemoryDevice {
            capabilities: Capabilities {
                dimmable: true,
                rgb: true,
            },
            state: DeviceState {
                white_level: Some(0),
                ..DeviceState::default()
            },
            ..MemoryDevice::dimmer(name)
        }
    }

    pub fn with_alias(mut self, alias: &str) -> MemoryDevice {
        self.alias = Some(alias.to_owned());
        self
    }

    pub fn with_state(mut self, state: DeviceState) -> MemoryDevice {
        if state.brightness > 0 {
            self.restore_brightness = state.brightness;
        }
        self.state = state;
        self
    }

    /// `stored` is what an earlier run kept for this device, if anything.
    fn from_settings(settings: &DeviceSettings, stored: Option<DeviceProperties>) -> MemoryDevice {
        let capabilities = Capabilities {
            dimmable: settings.dimmable || settings.rgb,
            rgb: settings.rgb,
        };
        let brightness = settings.brightness.min(100);
        let state = DeviceState {
            on: settings.on,
            brightness: if settings.on { brightness } else { 0 },
            red: if settings.rgb && settings.on { brightness } else { 0 },
            green: if settings.rgb && settings.on { brightness } else { 0 },
            blue: if settings.rgb && settings.on { brightness } else { 0 },
            white_level: settings.white_temperature.map(|_| 0),
            white_temperature: settings.white_temperature,
        };
        let properties = pinned_properties(settings, stored);
        MemoryDevice {
            name: settings.name.clone(),
            alias: settings.alias.clone(),
            published: settings.published,
            capabilities,
            state,
            properties,
            restore_brightness: if brightness > 0 { brightness } else { 100 },
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        let caps = self.capabilities;
        let state = &mut self.state;
        match mutation {
            Mutation::TurnOn => {
                state.on = true;
                if caps.dimmable && state.brightness == 0 {
                    state.brightness = self.restore_brightness;
                }
                if caps.rgb && state.red == 0 && state.green == 0 && state.blue == 0 {
                    state.red = state.brightness;
                    state.green = state.brightness;
                    state.blue = state.brightness;
                }
            }
            Mutation::TurnOff => {
                state.on = false;
                if caps.dimmable {
                    if state.brightness > 0 {
                        self.restore_brightness = state.brightness;
                    }
                    state.brightness = 0;
                }
            }
            Mutation::Brightness(level) => {
                let level = level.min(100);
                if caps.rgb {
                    scale_rgb(state, level);
                }
                state.brightness = level;
                state.on = level > 0;
                if level > 0 {
                    self.restore_brightness = level;
                }
            }
            Mutation::Color { red, green, blue } => {
                state.red = red.min(100);
                state.green = green.min(100);
                state.blue = blue.min(100);
                state.brightness = state.red.max(state.green).max(state.blue);
                state.on = state.brightness > 0;
                if state.white_level.is_some() {
                    state.white_level = Some(0);
                }
                if state.brightness > 0 {
                    self.restore_brightness = state.brightness;
                }
            }
        }
    }
}

/// Identifiers pinned in the settings file win over stored ones. `updated_at` only moves when the
/// pinned values differ from what was stored.
fn pinned_properties(
    settings: &DeviceSettings,
    stored: Option<DeviceProperties>,
) -> Option<DeviceProperties> {
    if settings.location.is_none() && settings.group.is_none() {
        return stored;
    }
    let base = stored.unwrap_or_else(|| DeviceProperties::generate(settings.id));
    let pinned = DeviceProperties {
        address: HardwareAddress::for_device(settings.id),
        location: settings
            .location
            .map_or(base.location, |u| LifxIdent(*u.as_bytes())),
        group: settings
            .group
            .map_or(base.group, |u| LifxIdent(*u.as_bytes())),
        updated_at: base.updated_at,
    };
    if stored.is_some_and(|s| s.location != pinned.location || s.group != pinned.group) {
        return Some(DeviceProperties {
            updated_at: now_nanos(),
            ..pinned
        });
    }
    Some(pinned)
}

/// One device's entry in the state file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredProperties {
    location: Uuid,
    group: Uuid,
    updated_at: u64,
}

impl StoredProperties {
    fn new(properties: &DeviceProperties) -> StoredProperties {
        StoredProperties {
            location: Uuid::from_bytes(properties.location.0),
            group: Uuid::from_bytes(properties.group.0),
            updated_at: properties.updated_at,
        }
    }

    fn properties(&self, id: DeviceId) -> DeviceProperties {
        DeviceProperties {
            address: HardwareAddress::for_device(id),
            location: LifxIdent(*self.location.as_bytes()),
            group: LifxIdent(*self.group.as_bytes()),
            updated_at: self.updated_at,
        }
    }
}

/// The state file, keyed by device id. A missing file is an empty one.
fn load_state(path: &Path) -> Result<BTreeMap<u32, StoredProperties>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(Error::Registry(format!(
                "unable to read {}: {}",
                path.display(),
                e
            )));
        }
    };
    serde_json::from_str(&text)
        .map_err(|e| Error::Registry(format!("unable to parse {}: {}", path.display(), e)))
}

/// Scales the RGB channels so the brightest one sits at `level`.
fn scale_rgb(state: &mut DeviceState, level: u8) {
    let max = state.red.max(state.green).max(state.blue);
    if max == 0 {
        state.red = level;
        state.green = level;
        state.blue = level;
        return;
    }
    let (level, max) = (u16::from(level), u16::from(max));
    let scale = |c: u8| ((u16::from(c) * level + max / 2) / max) as u8;
    state.red = scale(state.red);
    state.green = scale(state.green);
    state.blue = scale(state.blue);
}

/// Devices kept in memory, keyed by identifier.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: Mutex<BTreeMap<DeviceId, MemoryDevice>>,
    /// Rewritten whenever properties are stored
    state_file: Option<PathBuf>,
}

impl MemoryRegistry {
    pub fn new() -> MemoryRegistry {
        MemoryRegistry::default()
    }

    /// A registry that forgets generated identifiers when dropped.
    pub fn from_settings(devices: &[DeviceSettings]) -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        for settings in devices {
            debug!("adding device {} ({}) from settings", settings.id, settings.name);
            registry.insert(settings.id, MemoryDevice::from_settings(settings, None));
        }
        registry
    }

    /// Like [MemoryRegistry::from_settings], but properties stored by an earlier run are read back
    /// from `state_file` and every later store is written to it.
    pub fn open(devices: &[DeviceSettings], state_file: &Path) -> Result<MemoryRegistry> {
        let stored = load_state(state_file)?;
        info!(
            "read identifiers for {} devices from {}",
            stored.len(),
            state_file.display()
        );
        let registry = MemoryRegistry {
            devices: Mutex::default(),
            state_file: Some(state_file.to_owned()),
        };
        {
            let mut map = registry.lock();
            for settings in devices {
                debug!("adding device {} ({}) from settings", settings.id, settings.name);
                let previous = stored.get(&settings.id.0).map(|s| s.properties(settings.id));
                map.insert(settings.id, MemoryDevice::from_settings(settings, previous));
            }
            registry.save(&map)?;
        }
        Ok(registry)
    }

    /// Adds or replaces a device.
    pub fn insert(&self, id: DeviceId, device: MemoryDevice) {
        self.lock().insert(id, device);
    }

    pub fn remove(&self, id: DeviceId) -> Option<MemoryDevice> {
        self.lock().remove(&id)
    }

    /// A copy of a device as currently held.
    pub fn device(&self, id: DeviceId) -> Option<MemoryDevice> {
        self.lock().get(&id).cloned()
    }

    pub fn set_published(&self, id: DeviceId, published: bool) {
        if let Some(device) = self.lock().get_mut(&id) {
            device.published = published;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DeviceId, MemoryDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, devices: &BTreeMap<DeviceId, MemoryDevice>) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let stored: BTreeMap<u32, StoredProperties> = devices
            .iter()
            .filter_map(|(id, device)| {
                let properties = device.properties.as_ref()?;
                Some((id.0, StoredProperties::new(properties)))
            })
            .collect();
        let text = serde_json::to_string_pretty(&stored)
            .map_err(|e| Error::Registry(format!("unable to encode device state: {}", e)))?;
        fs::write(path, text)
            .map_err(|e| Error::Registry(format!("unable to write {}: {}", path.display(), e)))
    }

    fn with_device<T>(&self, id: DeviceId, f: impl FnOnce(&mut MemoryDevice) -> T) -> Result<T> {
        self.lock()
            .get_mut(&id)
            .map(f)
            .ok_or(Error::DeviceNotFound(id))
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn published(&self) -> Result<Vec<Listing>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, device)| device.published)
            .map(|(&id, device)| Listing {
                id,
                name: device.name.clone(),
                alias: device.alias.clone(),
                properties: device.properties,
            })
            .collect())
    }

    fn capabilities(&self, id: DeviceId) -> Result<Capabilities> {
        self.with_device(id, |device| device.capabilities)
    }

    fn state(&self, id: DeviceId) -> Result<DeviceState> {
        self.with_device(id, |device| device.state)
    }

    fn apply(&self, id: DeviceId, mutation: Mutation) -> Result<()> {
        self.with_device(id, |device| device.apply(mutation))
    }

    fn store_properties(&self, id: DeviceId, properties: &DeviceProperties) -> Result<()> {
        let mut devices = self.lock();
        let device = devices.get_mut(&id).ok_or(Error::DeviceNotFound(id))?;
        device.properties = Some(*properties);
        self.save(&devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PublishedDevices;
    use std::sync::Arc;

    fn device_settings(id: u32, name: &str) -> DeviceSettings {
        DeviceSettings {
            id: DeviceId(id),
            name: name.to_owned(),
            alias: None,
            published: true,
            dimmable: true,
            rgb: false,
            on: false,
            brightness: 100,
            white_temperature: None,
            location: None,
            group: None,
        }
    }

    /// Opens the registry the way the daemon does at startup and returns the published properties.
    fn boot(devices: &[DeviceSettings], state_file: &Path) -> BTreeMap<DeviceId, DeviceProperties> {
        let registry = Arc::new(MemoryRegistry::open(devices, state_file).unwrap());
        let published = PublishedDevices::new(registry);
        assert_eq!(published.refresh().unwrap(), devices.len());
        published
            .snapshot()
            .into_iter()
            .map(|device| (device.id, device.properties))
            .collect()
    }

    #[test]
    fn test_identifiers_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let location = Uuid::parse_str("7f0b8f2e-3a51-4c4e-9b1f-6c0d2a6c9e11").unwrap();
        let group = Uuid::parse_str("0c5d1e8a-2b44-4f6a-8e3d-9a7b6c5d4e3f").unwrap();
        let devices = vec![
            device_settings(1234, "Hall Dimmer"),
            DeviceSettings {
                rgb: true,
                location: Some(location),
                group: Some(group),
                ..device_settings(99, "RGB Strip")
            },
        ];

        let first = boot(&devices, &state_file);
        assert!(state_file.exists());
        let second = boot(&devices, &state_file);
        assert_eq!(first, second);

        let strip = &second[&DeviceId(99)];
        assert_eq!(strip.location, LifxIdent(*location.as_bytes()));
        assert_eq!(strip.group, LifxIdent(*group.as_bytes()));
        assert_eq!(
            second[&DeviceId(1234)].address,
            HardwareAddress::for_device(DeviceId(1234))
        );
    }

    #[test]
    fn test_changed_pin_moves_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let mut devices = vec![DeviceSettings {
            location: Some(Uuid::new_v4()),
            ..device_settings(7, "Porch")
        }];
        let first = boot(&devices, &state_file)[&DeviceId(7)];

        let moved = Uuid::new_v4();
        devices[0].location = Some(moved);
        let second = boot(&devices, &state_file)[&DeviceId(7)];
        assert_eq!(second.location, LifxIdent(*moved.as_bytes()));
        // the unpinned group is the one generated on the first run
        assert_eq!(second.group, first.group);
        assert!(second.updated_at >= first.updated_at);
        assert_ne!(second.location, first.location);
    }

    #[test]
    fn test_unreadable_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        std::fs::write(&state_file, "not json").unwrap();
        assert!(matches!(
            MemoryRegistry::open(&[device_settings(1, "One")], &state_file),
            Err(Error::Registry(_))
        ));
    }

    #[test]
    fn test_store_without_state_file_stays_in_memory() {
        let registry = MemoryRegistry::from_settings(&[device_settings(5, "Five")]);
        let properties = DeviceProperties::generate(DeviceId(5));
        registry.store_properties(DeviceId(5), &properties).unwrap();
        assert_eq!(registry.device(DeviceId(5)).unwrap().properties, Some(properties));
        assert!(matches!(
            registry.store_properties(DeviceId(6), &properties),
            Err(Error::DeviceNotFound(DeviceId(6)))
        ));
    }

    #[test]
    fn test_dimmer_remembers_brightness() {
        let registry = MemoryRegistry::new();
        let id = DeviceId(1);
        registry.insert(id, MemoryDevice::dimmer("Hall"));

        registry.apply(id, Mutation::Brightness(40)).unwrap();
        assert_eq!(registry.state(id).unwrap().brightness, 40);
        assert!(registry.state(id).unwrap().on);

        registry.apply(id, Mutation::TurnOff).unwrap();
        let state = registry.state(id).unwrap();
        assert!(!state.on);
        assert_eq!(state.brightness, 0);

        registry.apply(id, Mutation::TurnOn).unwrap();
        assert_eq!(registry.state(id).unwrap().brightness, 40);
    }

    #[test]
    fn test_color_drives_white_to_zero() {
        let registry = MemoryRegistry::new();
        let id = DeviceId(2);
        registry.insert(
            id,
            MemoryDevice::rgb("Strip").with_state(DeviceState {
                on: true,
                brightness: 80,
                white_level: Some(80),
                white_temperature: Some(2700),
                ..DeviceState::default()
            }),
        );

        registry
            .apply(
                id,
                Mutation::Color {
                    red: 52,
                    green: 100,
                    blue: 0,
                },
            )
            .unwrap();
        let state = registry.state(id).unwrap();
        assert_eq!((state.red, state.green, state.blue), (52, 100, 0));
        assert_eq!(state.brightness, 100);
        assert_eq!(state.white_level, Some(0));
        assert_eq!(state.white_temperature, Some(2700));
        assert!(state.on);
    }

    #[test]
    fn test_rgb_brightness_scales_channels() {
        let mut state = DeviceState {
            red: 100,
            green: 50,
            blue: 0,
            ..DeviceState::default()
        };
        scale_rgb(&mut state, 50);
        assert_eq!((state.red, state.green, state.blue), (50, 25, 0));
    }

    #[test]
    fn test_missing_device() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.state(DeviceId(9)),
            Err(Error::DeviceNotFound(DeviceId(9)))
        ));
        assert!(matches!(
            registry.apply(DeviceId(9), Mutation::TurnOn),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_published_listing() {
        let registry = MemoryRegistry::new();
        registry.insert(DeviceId(3), MemoryDevice::relay("Fan"));
        registry.insert(
            DeviceId(1),
            MemoryDevice {
                published: false,
                ..MemoryDevice::dimmer("Hidden")
            },
        );
        let listing = registry.published().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, DeviceId(3));
        assert_eq!(listing[0].name, "Fan");
        assert_eq!(listing[0].properties, None);
    }
}
