use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::registry::DeviceId;

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct BridgeSettings {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Receive timeout while devices are published
    pub poll_timeout_ms: u64,
    /// Receive timeout while nothing is published
    pub idle_timeout_ms: u64,
    pub refresh_interval_secs: u64,
    pub default_kelvin: u16,
    pub location_label: String,
    pub group_label: String,
    /// Product ids reported in StateVersion
    pub white_product: u32,
    pub color_product: u32,
}

impl Default for BridgeSettings {
    fn default() -> BridgeSettings {
        BridgeSettings {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: lifx_core::DEFAULT_PORT,
            poll_timeout_ms: 1000,
            idle_timeout_ms: 2000,
            refresh_interval_secs: 60,
            default_kelvin: 3000,
            location_label: "Home".to_owned(),
            group_label: "LIFX Bridge".to_owned(),
            white_product: 10,
            color_product: 22,
        }
    }
}

impl BridgeSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// A device for the in-memory registry.
#[derive(Clone, Deserialize, Debug)]
pub struct DeviceSettings {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "enabled")]
    pub published: bool,
    #[serde(default = "enabled")]
    pub dimmable: bool,
    #[serde(default)]
    pub rgb: bool,
    #[serde(default)]
    pub on: bool,
    /// 0-100
    #[serde(default = "full_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub white_temperature: Option<u16>,
    #[serde(default)]
    pub location: Option<Uuid>,
    #[serde(default)]
    pub group: Option<Uuid>,
}

fn enabled() -> bool {
    true
}

fn full_brightness() -> u8 {
    100
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,
    /// Log filter used when RUST_LOG isn't set
    #[serde(default)]
    pub log_level: Option<String>,
    /// Where generated device identifiers are kept between runs
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

/// Reads settings from `path` (any format the config crate recognizes by extension, or
/// `path.toml` and friends when there is none), then applies `LIFX_BRIDGE__SECTION__KEY`
/// environment overrides.
pub fn read_settings(path: &str) -> Result<Settings, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(
            config::Environment::with_prefix("LIFX_BRIDGE")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?
        .try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
log_level = "debug"
state_file = "/var/lib/lifx-bridge/state.json"

[bridge]
port = 56701
default_kelvin = 2700

[[devices]]
id = 1234
name = "Hall Dimmer"
on = true
brightness = 40

[[devices]]
id = 99
name = "Strip"
alias = "Under Cabinet"
rgb = true
location = "7f0b8f2e-3a51-4c4e-9b1f-6c0d2a6c9e11"
"#
        )
        .unwrap();

        let settings = read_settings(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.log_level.as_deref(), Some("debug"));
        assert_eq!(
            settings.state_file,
            Some(PathBuf::from("/var/lib/lifx-bridge/state.json"))
        );
        assert_eq!(settings.bridge.port, 56701);
        assert_eq!(settings.bridge.default_kelvin, 2700);
        // untouched keys keep their defaults
        assert_eq!(settings.bridge.poll_timeout_ms, 1000);
        assert_eq!(settings.bridge.group_label, "LIFX Bridge");

        assert_eq!(settings.devices.len(), 2);
        let hall = &settings.devices[0];
        assert_eq!(hall.id, DeviceId(1234));
        assert!(hall.dimmable && hall.published && !hall.rgb);
        assert_eq!(hall.brightness, 40);
        let strip = &settings.devices[1];
        assert_eq!(strip.alias.as_deref(), Some("Under Cabinet"));
        assert!(strip.rgb);
        assert_eq!(
            strip.location,
            Some(Uuid::parse_str("7f0b8f2e-3a51-4c4e-9b1f-6c0d2a6c9e11").unwrap())
        );
        assert_eq!(strip.group, None);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_settings("/nonexistent/lifx-bridge-settings.toml").is_err());
    }

    #[test]
    fn test_timeouts_never_zero() {
        let settings = BridgeSettings {
            poll_timeout_ms: 0,
            ..BridgeSettings::default()
        };
        assert_eq!(settings.poll_timeout(), Duration::from_millis(1));
        assert_eq!(settings.idle_timeout(), Duration::from_millis(2000));
    }
}
