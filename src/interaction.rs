use crate::types::OwnershipRecord;
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoverState {
    #[default]
    Idle,
    Hovering(usize),
}

/// Floating detail box shown while a region is hovered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tooltip {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
    pub title: String,
    pub lines: Vec<String>,
}

impl Tooltip {
    pub fn show(&mut self, name: &str, record: Option<&OwnershipRecord>) {
        self.title = name.to_string();
        self.lines = tooltip_lines(record);
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }
}

pub fn tooltip_lines(record: Option<&OwnershipRecord>) -> Vec<String> {
    let rate = |value: Option<f64>| match value {
        Some(v) => format!("{}%", v),
        None => "N/A".to_string(),
    };
    vec![
        format!("Pet Ownership Rate: {}", rate(record.map(|r| r.total))),
        format!("Dog Ownership Rate: {}", rate(record.map(|r| r.dog))),
        format!("Cat Ownership Rate: {}", rate(record.map(|r| r.cat))),
    ]
}

// Wrapper for RTree indexing
struct ShapeEnvelope {
    id: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for ShapeEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Point-in-shape lookup over projected geometry.
pub struct HitIndex {
    tree: RTree<ShapeEnvelope>,
}

impl Default for HitIndex {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl HitIndex {
    /// Indexes shapes by position; shape ids are their positions in `shapes`.
    pub fn build<'a>(shapes: impl Iterator<Item = &'a MultiPolygon<f64>>) -> Self {
        let items: Vec<ShapeEnvelope> = shapes
            .enumerate()
            .filter_map(|(id, geometry)| {
                let rect = geometry.bounding_rect()?;
                Some(ShapeEnvelope {
                    id,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    /// The topmost (last drawn) shape containing the point.
    pub fn locate<'g, F>(&self, x: f64, y: f64, geometry_of: F) -> Option<usize>
    where
        F: Fn(usize) -> &'g MultiPolygon<f64>,
    {
        let point = Point::new(x, y);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter(|candidate| geometry_of(candidate.id).contains(&point))
            .map(|candidate| candidate.id)
            .max()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }
}
