//! Translates between LIFX's view of a light and the host's devices.
//!
//! Every device looks like a LIFX bulb from the outside.  Relays only have power, dimmers add
//! brightness, and RGB devices add hue and saturation.  Requests a device can't carry out are
//! logged and otherwise ignored.

use std::sync::Arc;

use lifx_core::{PowerLevel, HSBK};
use log::info;

use crate::color::{hsbk_to_rgb, level_to_percent, percent_to_level, rgb_to_hsbk};
use crate::error::Result;
use crate::registry::{Capabilities, DeviceId, DeviceRegistry, Mutation};

pub struct DeviceAdapter {
    registry: Arc<dyn DeviceRegistry>,
    /// Reported for devices without a white temperature of their own
    default_kelvin: u16,
}

impl DeviceAdapter {
    pub fn new(registry: Arc<dyn DeviceRegistry>, default_kelvin: u16) -> DeviceAdapter {
        DeviceAdapter {
            registry,
            default_kelvin,
        }
    }

    pub fn capabilities(&self, id: DeviceId) -> Result<Capabilities> {
        self.registry.capabilities(id)
    }

    pub fn turn_on_off(&self, id: DeviceId, on: bool) -> Result<()> {
        info!("turning device {} {}", id, if on { "on" } else { "off" });
        let mutation = if on {
            Mutation::TurnOn
        } else {
            Mutation::TurnOff
        };
        self.registry.apply(id, mutation)
    }

    pub fn get_power(&self, id: DeviceId) -> Result<PowerLevel> {
        Ok(if self.registry.state(id)?.on {
            PowerLevel::Enabled
        } else {
            PowerLevel::Standby
        })
    }

    /// Brightness on the 0-65535 scale.  Devices that can't dim report full or nothing.
    pub fn get_brightness(&self, id: DeviceId) -> Result<u16> {
        let caps = self.registry.capabilities(id)?;
        let state = self.registry.state(id)?;
        Ok(match (caps.dimmable, state.on) {
            (true, _) => percent_to_level(state.brightness),
            (false, true) => 65535,
            (false, false) => 0,
        })
    }

    pub fn set_brightness(&self, id: DeviceId, level: u16) -> Result<()> {
        if !self.registry.capabilities(id)?.dimmable {
            info!("device {} doesn't support dimming, ignoring brightness {}", id, level);
            return Ok(());
        }
        let percent = level_to_percent(level);
        info!("setting brightness of device {} to {}%", id, percent);
        self.registry.apply(id, Mutation::Brightness(percent))
    }

    pub fn get_color(&self, id: DeviceId) -> Result<HSBK> {
        let caps = self.registry.capabilities(id)?;
        if caps.rgb {
            let state = self.registry.state(id)?;
            let kelvin = state.white_temperature.unwrap_or(self.default_kelvin);
            return Ok(rgb_to_hsbk(state.red, state.green, state.blue, kelvin));
        }
        Ok(HSBK {
            hue: 0,
            saturation: 0,
            brightness: self.get_brightness(id)?,
            kelvin: self.default_kelvin,
        })
    }

    /// RGB devices take the color.  Other dimmers only take its brightness.
    pub fn set_color(&self, id: DeviceId, color: HSBK) -> Result<()> {
        let caps = self.registry.capabilities(id)?;
        if caps.rgb {
            let (red, green, blue) = hsbk_to_rgb(color);
            info!(
                "setting color of device {} to {} (r={} g={} b={})",
                id,
                color.describe(true),
                red,
                green,
                blue
            );
            self.registry.apply(id, Mutation::Color { red, green, blue })
        } else if caps.dimmable {
            self.set_brightness(id, color.brightness)
        } else {
            info!("device {} doesn't support color, ignoring {}", id, color.describe(true));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDevice, MemoryRegistry};
    use crate::registry::DeviceState;

    fn setup() -> (Arc<MemoryRegistry>, DeviceAdapter) {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(DeviceId(1), MemoryDevice::relay("Fan"));
        registry.insert(
            DeviceId(2),
            MemoryDevice::dimmer("Hall").with_state(DeviceState {
                on: true,
                brightness: 50,
                ..DeviceState::default()
            }),
        );
        registry.insert(
            DeviceId(3),
            MemoryDevice::rgb("Strip").with_state(DeviceState {
                on: true,
                brightness: 100,
                red: 100,
                white_level: Some(0),
                white_temperature: Some(2700),
                ..DeviceState::default()
            }),
        );
        let adapter = DeviceAdapter::new(registry.clone(), 3000);
        (registry, adapter)
    }

    #[test]
    fn test_dimmer_color() {
        let (_, adapter) = setup();
        let color = adapter.get_color(DeviceId(2)).unwrap();
        assert_eq!(
            color,
            HSBK {
                hue: 0,
                saturation: 0,
                brightness: 32767,
                kelvin: 3000
            }
        );
        assert_eq!(adapter.get_power(DeviceId(2)).unwrap(), PowerLevel::Enabled);
    }

    #[test]
    fn test_rgb_color_uses_native_temperature() {
        let (_, adapter) = setup();
        let color = adapter.get_color(DeviceId(3)).unwrap();
        assert_eq!(color.hue, 0);
        assert_eq!(color.saturation, 65535);
        assert_eq!(color.brightness, 65535);
        assert_eq!(color.kelvin, 2700);
    }

    #[test]
    fn test_relay_brightness() {
        let (registry, adapter) = setup();
        assert_eq!(adapter.get_brightness(DeviceId(1)).unwrap(), 0);
        adapter.turn_on_off(DeviceId(1), true).unwrap();
        assert_eq!(adapter.get_brightness(DeviceId(1)).unwrap(), 65535);

        // ignored rather than an error
        adapter.set_brightness(DeviceId(1), 100).unwrap();
        assert!(registry.state(DeviceId(1)).unwrap().on);
    }

    #[test]
    fn test_set_color_on_dimmer_sets_brightness() {
        let (registry, adapter) = setup();
        adapter
            .set_color(
                DeviceId(2),
                HSBK {
                    hue: 1000,
                    saturation: 65535,
                    brightness: 16384,
                    kelvin: 3500,
                },
            )
            .unwrap();
        assert_eq!(registry.state(DeviceId(2)).unwrap().brightness, 25);
    }

    #[test]
    fn test_set_color_on_rgb() {
        let (registry, adapter) = setup();
        adapter
            .set_color(
                DeviceId(3),
                HSBK {
                    hue: 16200,
                    saturation: 65535,
                    brightness: 65535,
                    kelvin: 3500,
                },
            )
            .unwrap();
        let state = registry.state(DeviceId(3)).unwrap();
        assert!((51..=53).contains(&state.red));
        assert_eq!((state.green, state.blue), (100, 0));
        assert_eq!(state.white_level, Some(0));
    }

    #[test]
    fn test_missing_device_propagates() {
        let (_, adapter) = setup();
        assert!(adapter.get_color(DeviceId(99)).is_err());
        assert!(adapter.turn_on_off(DeviceId(99), true).is_err());
    }
}
