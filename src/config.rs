use crate::color::{Color, ColorScale};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub hover: HoverConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_csv: PathBuf,
    /// Directory holding `<region>.geojson`, or an http(s) base URL.
    pub region_source: String,
    #[serde(default = "default_join_column_csv")]
    pub join_column_csv: String,
    #[serde(default = "default_total_column")]
    pub total_column: String,
    #[serde(default = "default_dog_column")]
    pub dog_column: String,
    #[serde(default = "default_cat_column")]
    pub cat_column: String,
    #[serde(default = "default_join_property_shape")]
    pub join_property_shape: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub width: u32,
    pub height: u32,
    pub background: String,
    pub scale: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    pub ramp: Vec<String>, // Hex stops, light to dark
    pub fallback_fill: String,
    pub stroke: String,
    pub stroke_width: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HoverConfig {
    pub amplify: f64,
    pub scale: f64,
    pub stroke_width: f64,
    pub tooltip_offset_x: f64,
    pub tooltip_offset_y: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

fn default_join_column_csv() -> String {
    "state".to_string()
}

fn default_total_column() -> String {
    "total".to_string()
}

fn default_dog_column() -> String {
    "dog".to_string()
}

fn default_cat_column() -> String {
    "cat".to_string()
}

fn default_join_property_shape() -> String {
    "name".to_string()
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 600,
            background: "#b0e0e6".to_string(),
            scale: 1000.0,
            min_zoom: 1.0,
            max_zoom: 8.0,
        }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            ramp: [
                "#f7fbff", "#deebf7", "#c6dbef", "#9ecae1", "#6baed6", "#4292c6", "#2171b5",
                "#08519c", "#08306b",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fallback_fill: "#cfcd99".to_string(),
            stroke: "#000000".to_string(),
            stroke_width: 1.0,
        }
    }
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            amplify: 1.1,
            scale: 1.05,
            stroke_width: 2.5,
            tooltip_offset_x: 10.0,
            tooltip_offset_y: -28.0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects colors that would otherwise only fail at render time.
    fn validate(&self) -> Result<()> {
        ColorScale::from_hex_stops(&self.style.ramp).context("Invalid [style] ramp")?;
        for (key, value) in [
            ("map.background", &self.map.background),
            ("style.fallback_fill", &self.style.fallback_fill),
            ("style.stroke", &self.style.stroke),
        ] {
            Color::from_hex(value).with_context(|| format!("Invalid color for {}", key))?;
        }
        check_zoom_extent(self.map.min_zoom, self.map.max_zoom)
            .context("Invalid [map] zoom extent")?;
        Ok(())
    }
}

fn check_zoom_extent(min_zoom: f64, max_zoom: f64) -> Result<()> {
    if !min_zoom.is_finite() || !max_zoom.is_finite() {
        return Err(anyhow!("min_zoom and max_zoom must be finite"));
    }
    if min_zoom <= 0.0 || min_zoom > max_zoom {
        return Err(anyhow!(
            "expected 0 < min_zoom <= max_zoom, got {} and {}",
            min_zoom,
            max_zoom
        ));
    }
    Ok(())
}
