use crate::color::{Color, ColorScale};
use crate::config::{AppConfig, MapConfig, StyleConfig};
use crate::data::OwnershipTable;
use crate::interaction::HitIndex;
use crate::projection::{AlbersUsa, PathGenerator};
use crate::types::{OwnershipRecord, RegionFeature};
use anyhow::Result;
use geo::MultiPolygon;
use rayon::prelude::*;
use std::fmt::Write;
use tracing::debug;

/// Fill and label for one region, derived from its table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionStyle {
    pub fill: Color,
    pub label: String,
    pub record: Option<OwnershipRecord>,
}

/// Everything needed to turn a region name into colors.
#[derive(Debug, Clone)]
pub struct Palette {
    pub scale: ColorScale,
    pub fallback: Color,
    pub stroke: Color,
    pub stroke_width: f64,
}

impl Palette {
    pub fn from_config(style: &StyleConfig) -> Result<Self> {
        Ok(Self {
            scale: ColorScale::from_hex_stops(&style.ramp)?,
            fallback: Color::from_hex(&style.fallback_fill)?,
            stroke: Color::from_hex(&style.stroke)?,
            stroke_width: style.stroke_width,
        })
    }

    /// The single place a region's appearance is looked up. `amplify`
    /// multiplies the total before coloring (1.0 at rest, larger on hover).
    pub fn style_for(
        &self,
        region_name: &str,
        table: &OwnershipTable,
        amplify: f64,
    ) -> RegionStyle {
        match table.get(region_name) {
            Some(record) => RegionStyle {
                fill: self.scale.color(record.total * amplify),
                label: record.total.to_string(),
                record: Some(*record),
            },
            None => RegionStyle {
                fill: self.fallback,
                label: String::new(),
                record: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub background: Color,
}

/// Pan/zoom applied to the whole scene: screen = scene * k + (x, y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub k: f64,
    pub x: f64,
    pub y: f64,
    min_k: f64,
    max_k: f64,
}

impl ViewTransform {
    pub fn new(min_k: f64, max_k: f64) -> Self {
        Self {
            k: 1.0_f64.clamp(min_k, max_k),
            x: 0.0,
            y: 0.0,
            min_k,
            max_k,
        }
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }

    /// Zooms by `factor` keeping the screen point (px, py) fixed.
    pub fn zoom_at(&mut self, factor: f64, px: f64, py: f64) {
        let k = (self.k * factor).clamp(self.min_k, self.max_k);
        let (sx, sy) = self.invert(px, py);
        self.k = k;
        self.x = px - sx * k;
        self.y = py - sy * k;
    }

    pub fn invert(&self, px: f64, py: f64) -> (f64, f64) {
        ((px - self.x) / self.k, (py - self.y) / self.k)
    }

    pub fn to_attr(&self) -> String {
        format!("translate({},{}) scale({})", self.x, self.y, self.k)
    }
}

/// Scale about a point, used to pop a hovered shape out of the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeTransform {
    pub scale: f64,
    pub cx: f64,
    pub cy: f64,
}

impl ShapeTransform {
    pub fn to_attr(&self) -> String {
        format!(
            "translate({},{}) scale({}) translate({},{})",
            self.cx, self.cy, self.scale, -self.cx, -self.cy
        )
    }
}

#[derive(Debug, Clone)]
pub struct ShapeElement {
    pub name: String,
    pub path: String,
    pub geometry: MultiPolygon<f64>, // Projected
    pub centroid: Option<(f64, f64)>,
    pub fill: Color,
    pub stroke_width: f64,
    pub transform: Option<ShapeTransform>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelElement {
    pub position: Option<(f64, f64)>,
    pub text: String,
}

/// The live shapes and labels on the surface. Shape ids are indices.
#[derive(Default)]
pub struct Scene {
    pub shapes: Vec<ShapeElement>,
    pub labels: Vec<LabelElement>,
    pub hit_index: HitIndex,
    pub revision: u64,
}

impl Scene {
    pub fn clear(&mut self) {
        self.shapes.clear();
        self.labels.clear();
        self.hit_index = HitIndex::default();
    }

    pub fn locate(&self, x: f64, y: f64) -> Option<usize> {
        self.hit_index.locate(x, y, |id| &self.shapes[id].geometry)
    }
}

/// Drawing surface, projection and path generator shared by every redraw.
pub struct RenderContext {
    pub surface: Surface,
    pub path: PathGenerator,
    pub view: ViewTransform,
    pub scene: Scene,
}

impl RenderContext {
    pub fn new(map: &MapConfig) -> Result<Self> {
        let center = (map.width as f64 / 2.0, map.height as f64 / 2.0);
        Ok(Self {
            surface: Surface {
                width: map.width,
                height: map.height,
                background: Color::from_hex(&map.background)?,
            },
            path: PathGenerator::new(AlbersUsa::new(map.scale, center)),
            view: ViewTransform::new(map.min_zoom, map.max_zoom),
            scene: Scene::default(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.map)
    }

    /// Replaces whatever is on the surface with `features`.
    pub fn redraw(
        &mut self,
        features: &[RegionFeature],
        table: &OwnershipTable,
        palette: &Palette,
    ) {
        self.scene.clear();

        let path = &self.path;
        let (shapes, labels): (Vec<ShapeElement>, Vec<LabelElement>) = features
            .par_iter()
            .map(|feature| {
                let geometry = path.project(&feature.geometry);
                let style = palette.style_for(&feature.name, table, 1.0);
                let centroid = PathGenerator::centroid(&geometry);
                let shape = ShapeElement {
                    name: feature.name.clone(),
                    path: PathGenerator::path_data(&geometry),
                    centroid,
                    geometry,
                    fill: style.fill,
                    stroke_width: palette.stroke_width,
                    transform: None,
                };
                let label = LabelElement {
                    position: centroid,
                    text: style.label,
                };
                (shape, label)
            })
            .unzip();

        self.scene.labels = labels;
        self.scene.hit_index = HitIndex::build(shapes.iter().map(|s| &s.geometry));
        self.scene.shapes = shapes;
        self.scene.revision += 1;

        debug!(
            "Redraw {} placed {} shapes ({} hit-testable)",
            self.scene.revision,
            self.scene.shapes.len(),
            self.scene.hit_index.len()
        );
    }

    pub fn to_svg(&self, palette: &Palette) -> String {
        let mut svg = String::new();
        let _ = self.write_svg(&mut svg, palette);
        svg
    }

    fn write_svg(&self, out: &mut String, palette: &Palette) -> std::fmt::Result {
        let surface = &self.surface;
        writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" style="background-color: {bg}">"#,
            w = surface.width,
            h = surface.height,
            bg = surface.background
        )?;
        writeln!(out, r#"<g transform="{}">"#, self.view.to_attr())?;

        writeln!(out, r#"<g class="regions">"#)?;
        for (id, shape) in self.scene.shapes.iter().enumerate() {
            write!(
                out,
                r#"<path data-id="{}" data-region="{}" d="{}" fill="{}" stroke="{}" stroke-width="{}""#,
                id,
                escape_xml(&shape.name),
                shape.path,
                shape.fill,
                palette.stroke,
                shape.stroke_width
            )?;
            if let Some(transform) = &shape.transform {
                write!(out, r#" transform="{}""#, transform.to_attr())?;
            }
            writeln!(out, "/>")?;
        }
        writeln!(out, "</g>")?;

        writeln!(out, r#"<g class="labels">"#)?;
        for label in &self.scene.labels {
            match label.position {
                Some((x, y)) => write!(
                    out,
                    r#"<text x="{}" y="{}" text-anchor="middle" dominant-baseline="central">"#,
                    x, y
                )?,
                None => write!(out, r#"<text text-anchor="middle" visibility="hidden">"#)?,
            }
            writeln!(out, "{}</text>", escape_xml(&label.text))?;
        }
        writeln!(out, "</g>")?;

        writeln!(out, "</g>")?;
        writeln!(out, "</svg>")
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
