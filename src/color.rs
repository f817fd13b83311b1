//! Conversions between the host's 0-100 levels and LIFX's 16 bit HSBK.

use lifx_core::HSBK;
use palette::{FromColor, Hsv, Srgb};

const LEVEL_MAX: f32 = 65535.0;

/// Scales a 0-100 brightness to 0-65535, truncating.  50 maps to 32767.
pub fn percent_to_level(percent: u8) -> u16 {
    (u32::from(percent.min(100)) * 65535 / 100) as u16
}

/// Scales a 0-65535 level to 0-100, rounding to nearest.
pub fn level_to_percent(level: u16) -> u8 {
    (f32::from(level) * 100.0 / LEVEL_MAX).round() as u8
}

/// Converts red, green and blue levels (0-100 each) to HSBK with the given kelvin.
pub fn rgb_to_hsbk(red: u8, green: u8, blue: u8, kelvin: u16) -> HSBK {
    let rgb = Srgb::new(unit(red), unit(green), unit(blue));
    let hsv: Hsv = Hsv::from_color(rgb);
    HSBK {
        hue: unit_to_level(hsv.hue.into_positive_degrees() / 360.0),
        saturation: unit_to_level(hsv.saturation),
        brightness: unit_to_level(hsv.value),
        kelvin,
    }
}

/// Converts the hue, saturation and brightness of `color` to red, green and blue levels, 0-100
/// each.  Kelvin is ignored.
pub fn hsbk_to_rgb(color: HSBK) -> (u8, u8, u8) {
    let hsv: Hsv = Hsv::new(
        f32::from(color.hue) / LEVEL_MAX * 360.0,
        f32::from(color.saturation) / LEVEL_MAX,
        f32::from(color.brightness) / LEVEL_MAX,
    );
    let rgb: Srgb = Srgb::from_color(hsv);
    (
        unit_to_percent(rgb.red),
        unit_to_percent(rgb.green),
        unit_to_percent(rgb.blue),
    )
}

fn unit(percent: u8) -> f32 {
    f32::from(percent.min(100)) / 100.0
}

fn unit_to_level(x: f32) -> u16 {
    (x.clamp(0.0, 1.0) * LEVEL_MAX).round() as u16
}

fn unit_to_percent(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 100.0).round() as u8
}
