//! Composite conic equal-area projection for the United States, with Alaska
//! and Hawaii drawn as insets below the lower 48.

use geo::{BoundingRect, Centroid, Coord, LineString, MapCoords, MultiPolygon};
#[cfg(test)]
use geo::Polygon;
use std::f64::consts::PI;
use std::fmt::Write;

/// Albers (conic equal-area) projection with rotation, center, scale and
/// translation applied, producing screen coordinates (y grows downwards).
#[derive(Debug, Clone)]
pub struct ConicEqualArea {
    n: f64,
    c: f64,
    r0: f64,
    rotate: f64,
    k: f64,
    dx: f64,
    dy: f64,
}

impl ConicEqualArea {
    pub fn new(
        parallels: (f64, f64),
        rotate_deg: f64,
        center: (f64, f64),
        scale: f64,
        translate: (f64, f64),
    ) -> Self {
        let sy0 = parallels.0.to_radians().sin();
        let n = (sy0 + parallels.1.to_radians().sin()) / 2.0;
        let c = 1.0 + sy0 * (2.0 * n - sy0);
        let r0 = c.sqrt() / n;

        let mut projection = Self {
            n,
            c,
            r0,
            rotate: rotate_deg.to_radians(),
            k: scale,
            dx: 0.0,
            dy: 0.0,
        };
        let (cx, cy) = projection.raw(center.0.to_radians(), center.1.to_radians());
        projection.dx = translate.0 - scale * cx;
        projection.dy = translate.1 + scale * cy;
        projection
    }

    fn raw(&self, lambda: f64, phi: f64) -> (f64, f64) {
        let r = (self.c - 2.0 * self.n * phi.sin()).sqrt() / self.n;
        let a = lambda * self.n;
        (r * a.sin(), self.r0 - r * a.cos())
    }

    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let mut lambda = lon.to_radians() + self.rotate;
        if lambda > PI {
            lambda -= 2.0 * PI;
        } else if lambda < -PI {
            lambda += 2.0 * PI;
        }
        let (x, y) = self.raw(lambda, lat.to_radians());
        (self.dx + self.k * x, self.dy - self.k * y)
    }
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    min: (f64, f64),
    max: (f64, f64),
}

impl Extent {
    fn contains(&self, (x, y): (f64, f64)) -> bool {
        x >= self.min.0 && x <= self.max.0 && y >= self.min.1 && y <= self.max.1
    }
}

#[derive(Debug, Clone)]
struct Inset {
    projection: ConicEqualArea,
    extent: Extent,
}

#[derive(Debug, Clone)]
pub struct AlbersUsa {
    insets: [Inset; 3], // lower 48, Alaska, Hawaii
}

impl AlbersUsa {
    pub fn new(scale: f64, translate: (f64, f64)) -> Self {
        let k = scale;
        let (x, y) = translate;
        let extent = |x0: f64, y0: f64, x1: f64, y1: f64| Extent {
            min: (x + x0 * k, y + y0 * k),
            max: (x + x1 * k, y + y1 * k),
        };

        Self {
            insets: [
                Inset {
                    projection: ConicEqualArea::new((29.5, 45.5), 96.0, (-0.6, 38.7), k, (x, y)),
                    extent: extent(-0.455, -0.238, 0.455, 0.238),
                },
                Inset {
                    projection: ConicEqualArea::new(
                        (55.0, 65.0),
                        154.0,
                        (-2.0, 58.5),
                        k * 0.35,
                        (x - 0.307 * k, y + 0.201 * k),
                    ),
                    extent: extent(-0.425, 0.120, -0.214, 0.234),
                },
                Inset {
                    projection: ConicEqualArea::new(
                        (8.0, 18.0),
                        157.0,
                        (-3.0, 19.9),
                        k,
                        (x - 0.205 * k, y + 0.212 * k),
                    ),
                    extent: extent(-0.214, 0.166, -0.115, 0.234),
                },
            ],
        }
    }

    fn inset_for(&self, lon: f64, lat: f64) -> Option<&Inset> {
        self.insets
            .iter()
            .find(|inset| inset.extent.contains(inset.projection.project(lon, lat)))
    }

    /// Screen position of a point, or `None` when it falls outside every inset.
    pub fn project(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        self.inset_for(lon, lat)
            .map(|inset| inset.projection.project(lon, lat))
    }

    /// Projects whole polygons, each through the inset owning its center.
    pub fn project_polygons(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let polygons = geometry
            .iter()
            .filter_map(|polygon| {
                let bbox = polygon.bounding_rect()?;
                let center = bbox.center();
                let inset = self.inset_for(center.x, center.y)?;
                Some(polygon.map_coords(|Coord { x, y }| {
                    let (px, py) = inset.projection.project(x, y);
                    Coord { x: px, y: py }
                }))
            })
            .collect();
        MultiPolygon::new(polygons)
    }
}

/// Turns geographic features into SVG path data through a fixed projection.
#[derive(Debug, Clone)]
pub struct PathGenerator {
    projection: AlbersUsa,
}

impl PathGenerator {
    pub fn new(projection: AlbersUsa) -> Self {
        Self { projection }
    }

    pub fn project(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        self.projection.project_polygons(geometry)
    }

    /// Path data for already projected geometry.
    pub fn path_data(projected: &MultiPolygon<f64>) -> String {
        let mut d = String::new();
        for polygon in projected {
            write_ring(&mut d, polygon.exterior());
            for hole in polygon.interiors() {
                write_ring(&mut d, hole);
            }
        }
        d
    }

    /// Area-weighted planar centroid of already projected geometry.
    pub fn centroid(projected: &MultiPolygon<f64>) -> Option<(f64, f64)> {
        projected.centroid().map(|p| (p.x(), p.y()))
    }
}

fn write_ring(d: &mut String, ring: &LineString<f64>) {
    // Closing coordinate is implied by Z.
    let coords = &ring.0[..ring.0.len().saturating_sub(1)];
    for (i, c) in coords.iter().enumerate() {
        let command = if i == 0 { 'M' } else { 'L' };
        let _ = write!(d, "{}{},{}", command, round3(c.x), round3(c.y));
    }
    if !coords.is_empty() {
        d.push('Z');
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
pub(crate) fn rect_polygon(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
        vec![],
    )
}
