use anyhow::{anyhow, Result};
use std::fmt;

/// Fixed percentage domain of the choropleth scale.
pub const DOMAIN: (f64, f64) = (0.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("Expected a #rrggbb color, got '{}'", hex));
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
        Ok(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    fn mix(self, other: Color, t: f64) -> Color {
        let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color {
            r: lerp(self.r, other.r),
            g: lerp(self.g, other.g),
            b: lerp(self.b, other.b),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Sequential scale from the fixed [0, 100] domain onto a ramp of color stops.
///
/// The domain is never fitted to the data. Inputs outside it are clamped to
/// the ends of the ramp, so an amplified hover value of 104.5 renders like 100.
#[derive(Debug, Clone)]
pub struct ColorScale {
    stops: Vec<Color>,
}

impl ColorScale {
    pub fn new(stops: Vec<Color>) -> Result<Self> {
        if stops.len() < 2 {
            return Err(anyhow!("A color ramp needs at least two stops"));
        }
        Ok(Self { stops })
    }

    pub fn from_hex_stops(stops: &[String]) -> Result<Self> {
        let colors = stops
            .iter()
            .map(|s| Color::from_hex(s))
            .collect::<Result<Vec<_>>>()?;
        Self::new(colors)
    }

    pub fn color(&self, value: f64) -> Color {
        let t = ((value - DOMAIN.0) / (DOMAIN.1 - DOMAIN.0)).clamp(0.0, 1.0);
        if t.is_nan() {
            return Color::BLACK;
        }

        let segments = (self.stops.len() - 1) as f64;
        let position = t * segments;
        let index = (position.floor() as usize).min(self.stops.len() - 2);
        self.stops[index].mix(self.stops[index + 1], position - index as f64)
    }
}
