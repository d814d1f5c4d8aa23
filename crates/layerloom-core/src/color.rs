use serde::{Deserialize, Serialize};
use std::fmt;

/// Straight-alpha color with channels in `0.0..=1.0`.
///
/// Written as a hex string in configuration files, e.g. `placeholder = "#0000FF"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn from_rgba8([r, g, b, a]: [u8; 4]) -> Self {
        let unit = |c: u8| c as f32 / 255.0;
        Self {
            r: unit(r),
            g: unit(g),
            b: unit(b),
            a: unit(a),
        }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA`; the leading `#` is optional.
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let hex = hex.trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(ColorError::InvalidHex);
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::InvalidHex)
        };
        match hex.len() {
            6 => Ok(Self::from_rgba8([channel(0)?, channel(2)?, channel(4)?, 255])),
            8 => Ok(Self::from_rgba8([
                channel(0)?,
                channel(2)?,
                channel(4)?,
                channel(6)?,
            ])),
            _ => Err(ColorError::InvalidHex),
        }
    }

    /// Opaque color from a packed `0xRRGGBB` value, the form color keys are usually written in.
    pub fn from_rgb_u32(packed: u32) -> Self {
        Self::from_rgba8([
            ((packed >> 16) & 0xFF) as u8,
            ((packed >> 8) & 0xFF) as u8,
            (packed & 0xFF) as u8,
            255,
        ])
    }

    /// Quantize to 8-bit channels, the form layer textures and captures store.
    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            (self.r * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.g * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.b * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.a * 255.0).round().clamp(0.0, 255.0) as u8,
        ]
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        let [r, g, b, _] = self.to_rgba8();
        [r, g, b]
    }

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const RED: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const BLUE: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    };
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.to_rgba8();
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ColorError {
    #[error("invalid hex color string")]
    InvalidHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_forms() {
        assert_eq!(Color::from_hex("#FF8800").unwrap().to_rgba8(), [255, 136, 0, 255]);
        assert_eq!(Color::from_hex("#FF880080").unwrap().to_rgba8(), [255, 136, 0, 128]);
        assert_eq!(Color::from_hex("00FF00").unwrap(), Color::from_rgb_u32(0x00FF00));
        for bad in ["invalid", "#GG0000", "#ÿÿÿ", "#FFF"] {
            assert!(Color::from_hex(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_placeholder_round_trips_through_toml_string() {
        let text: String = Color::BLUE.into();
        assert_eq!(text, "#0000FF");
        assert_eq!(Color::try_from(text).unwrap(), Color::BLUE);
    }

    #[test]
    fn test_color_from_packed() {
        assert_eq!(Color::from_rgb_u32(0x00FF00).to_rgb8(), [0, 255, 0]);
    }

    #[test]
    fn test_color_display() {
        assert_eq!(format!("{}", Color::RED), "#FF0000");
        assert_eq!(format!("{}", Color::from_rgba8([255, 0, 0, 127])), "#FF00007F");
    }
}
