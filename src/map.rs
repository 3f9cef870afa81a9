use crate::config::{AppConfig, HoverConfig};
use crate::data::{fetch_selection, OwnershipTable, RegionSource};
use crate::interaction::{HoverState, Tooltip};
use crate::render::{Palette, RenderContext, ShapeTransform};
use crate::types::{RegionFeature, Selection};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Issued when a selection starts; only the newest ticket may redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    pub generation: u64,
    pub selection: Selection,
}

/// Current look of one shape, as sent to clients after a hover change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapePatch {
    pub id: usize,
    pub fill: String,
    pub stroke_width: f64,
    pub transform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HoverChange {
    pub tooltip: Tooltip,
    pub changed: Vec<ShapePatch>,
}

/// A live map: render context, styling inputs and interaction state.
pub struct MapRenderer {
    ctx: RenderContext,
    palette: Palette,
    table: Arc<OwnershipTable>,
    hover_style: HoverConfig,
    hover: HoverState,
    tooltip: Tooltip,
    generation: u64,
    current: Option<Selection>,
}

impl MapRenderer {
    pub fn new(config: &AppConfig, table: Arc<OwnershipTable>) -> Result<Self> {
        Ok(Self {
            ctx: RenderContext::from_config(config)?,
            palette: Palette::from_config(&config.style)?,
            table,
            hover_style: config.hover.clone(),
            hover: HoverState::Idle,
            tooltip: Tooltip::default(),
            generation: 0,
            current: None,
        })
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn hover_state(&self) -> HoverState {
        self.hover
    }

    pub fn tooltip(&self) -> &Tooltip {
        &self.tooltip
    }

    pub fn current_selection(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    pub fn to_svg(&self) -> String {
        self.ctx.to_svg(&self.palette)
    }

    pub fn begin_selection(&mut self, selection: Selection) -> SelectionTicket {
        self.generation += 1;
        debug!("Selection '{}' started as generation {}", selection, self.generation);
        SelectionTicket {
            generation: self.generation,
            selection,
        }
    }

    /// Redraws with `features` unless a newer selection has started since
    /// `ticket` was issued. Returns whether the redraw happened.
    pub fn complete_selection(
        &mut self,
        ticket: SelectionTicket,
        features: Vec<RegionFeature>,
    ) -> bool {
        if ticket.generation != self.generation {
            debug!(
                "Dropping stale result for '{}' (generation {}, current {})",
                ticket.selection, ticket.generation, self.generation
            );
            return false;
        }

        self.hover = HoverState::Idle;
        self.tooltip.hide();
        self.ctx.redraw(&features, &self.table, &self.palette);
        info!("Rendered {} regions for '{}'", features.len(), ticket.selection);
        self.current = Some(ticket.selection);
        true
    }

    /// Loads `selection` from `source` and redraws once everything settled.
    pub async fn select(
        &mut self,
        source: &dyn RegionSource,
        selection: Selection,
        name_property: &str,
    ) -> bool {
        let ticket = self.begin_selection(selection);
        let features = fetch_selection(source, &ticket.selection, name_property).await;
        self.complete_selection(ticket, features)
    }

    pub fn pointer_enter(&mut self, id: usize, x: f64, y: f64) -> HoverChange {
        let mut changed = Vec::new();
        if let HoverState::Hovering(previous) = self.hover {
            if previous == id {
                return self.pointer_move(id, x, y);
            }
            changed.extend(self.leave(previous));
        }
        let Some(shape) = self.ctx.scene.shapes.get_mut(id) else {
            return self.hover_change(changed);
        };

        let style = self
            .palette
            .style_for(&shape.name, &self.table, self.hover_style.amplify);
        shape.fill = style.fill;
        shape.stroke_width = self.hover_style.stroke_width;
        shape.transform = shape.centroid.map(|(cx, cy)| ShapeTransform {
            scale: self.hover_style.scale,
            cx,
            cy,
        });

        self.tooltip.show(&shape.name, style.record.as_ref());
        self.tooltip.move_to(
            x + self.hover_style.tooltip_offset_x,
            y + self.hover_style.tooltip_offset_y,
        );
        self.hover = HoverState::Hovering(id);
        changed.push(self.patch(id));
        self.hover_change(changed)
    }

    pub fn pointer_move(&mut self, id: usize, x: f64, y: f64) -> HoverChange {
        if self.hover == HoverState::Hovering(id) {
            self.tooltip.move_to(
                x + self.hover_style.tooltip_offset_x,
                y + self.hover_style.tooltip_offset_y,
            );
        }
        self.hover_change(Vec::new())
    }

    pub fn pointer_leave(&mut self, id: usize) -> HoverChange {
        let changed = self.leave(id).into_iter().collect();
        self.hover_change(changed)
    }

    /// Pointer input in surface coordinates; works out which shape is under
    /// the pointer and fires the matching enter/move/leave transitions.
    pub fn pointer_at(&mut self, x: f64, y: f64) -> HoverChange {
        let (sx, sy) = self.ctx.view.invert(x, y);
        let target = self.ctx.scene.locate(sx, sy);
        match (self.hover, target) {
            (HoverState::Hovering(current), Some(id)) if current == id => {
                self.pointer_move(id, x, y)
            }
            (_, Some(id)) => self.pointer_enter(id, x, y),
            (HoverState::Hovering(current), None) => self.pointer_leave(current),
            (HoverState::Idle, None) => self.hover_change(Vec::new()),
        }
    }

    /// The pointer left the surface entirely.
    pub fn pointer_out(&mut self) -> HoverChange {
        match self.hover {
            HoverState::Hovering(current) => self.pointer_leave(current),
            HoverState::Idle => self.hover_change(Vec::new()),
        }
    }

    pub fn pan(&mut self, dx: f64, dy: f64) -> String {
        self.ctx.view.pan(dx, dy);
        self.ctx.view.to_attr()
    }

    pub fn zoom(&mut self, factor: f64, x: f64, y: f64) -> String {
        self.ctx.view.zoom_at(factor, x, y);
        self.ctx.view.to_attr()
    }

    fn leave(&mut self, id: usize) -> Option<ShapePatch> {
        if self.hover != HoverState::Hovering(id) {
            return None;
        }
        self.hover = HoverState::Idle;
        self.tooltip.hide();

        let shape = self.ctx.scene.shapes.get_mut(id)?;
        shape.fill = self.palette.style_for(&shape.name, &self.table, 1.0).fill;
        shape.stroke_width = self.palette.stroke_width;
        shape.transform = None;
        Some(self.patch(id))
    }

    fn patch(&self, id: usize) -> ShapePatch {
        let shape = &self.ctx.scene.shapes[id];
        ShapePatch {
            id,
            fill: shape.fill.to_string(),
            stroke_width: shape.stroke_width,
            transform: shape.transform.map(|t| t.to_attr()),
        }
    }

    fn hover_change(&self, changed: Vec<ShapePatch>) -> HoverChange {
        HoverChange {
            tooltip: self.tooltip.clone(),
            changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::{square_feature, FakeSource};
    use crate::render::tests::{feature, table};
    use crate::types::OwnershipRecord;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    fn config() -> AppConfig {
        AppConfig::from_toml(
            r#"
            [input]
            data_csv = "pets.csv"
            region_source = "states"
            "#,
        )
        .unwrap()
    }

    fn renderer() -> MapRenderer {
        MapRenderer::new(&config(), Arc::new(table())).unwrap()
    }

    fn draw(map: &mut MapRenderer, features: Vec<RegionFeature>) {
        let ticket = map.begin_selection(Selection::All);
        assert!(map.complete_selection(ticket, features));
    }

    fn west() -> Vec<RegionFeature> {
        vec![
            feature("California", -119.5, 37.0),
            feature("Nevada", -116.5, 39.0),
            feature("Oregon", -120.5, 44.0),
        ]
    }

    fn centroid(map: &MapRenderer, id: usize) -> (f64, f64) {
        map.context().scene.shapes[id].centroid.unwrap()
    }

    #[test]
    fn hovering_known_region_shows_rates() {
        let mut map = renderer();
        draw(&mut map, west());

        let change = map.pointer_enter(1, 100.0, 200.0);
        assert_eq!(map.hover_state(), HoverState::Hovering(1));
        assert!(change.tooltip.visible);
        assert_eq!(change.tooltip.title, "Nevada");
        assert!(change.tooltip.lines[0].contains("42%"));
        assert_eq!(change.tooltip.lines[1], "Dog Ownership Rate: 30%");
        assert_eq!(change.tooltip.lines[2], "Cat Ownership Rate: 12%");
        assert_eq!((change.tooltip.x, change.tooltip.y), (110.0, 172.0));

        let patch = &change.changed[0];
        assert_eq!(patch.id, 1);
        assert_eq!(patch.fill, map.palette().scale.color(42.0 * 1.1).to_string());
        assert_eq!(patch.stroke_width, 2.5);
        assert!(patch.transform.as_deref().unwrap().contains("scale(1.05)"));
    }

    #[test]
    fn hovering_unknown_region_shows_na() {
        let mut map = renderer();
        draw(&mut map, west());

        let change = map.pointer_enter(2, 0.0, 0.0);
        assert_eq!(change.tooltip.title, "Oregon");
        assert!(change.tooltip.lines.iter().all(|l| l.ends_with("N/A")));
        assert_eq!(change.changed[0].fill, "#cfcd99");
    }

    #[test]
    fn leaving_restores_unamplified_fill() {
        let mut map = renderer();
        draw(&mut map, west());
        let resting = map.context().scene.shapes[0].fill;

        map.pointer_enter(0, 5.0, 5.0);
        assert_ne!(map.context().scene.shapes[0].fill, resting);

        let change = map.pointer_leave(0);
        assert_eq!(map.hover_state(), HoverState::Idle);
        assert!(!change.tooltip.visible);
        let shape = &map.context().scene.shapes[0];
        assert_eq!(shape.fill, map.palette().scale.color(56.0));
        assert_eq!(shape.fill, resting);
        assert_eq!(shape.stroke_width, 1.0);
        assert!(shape.transform.is_none());
    }

    #[test]
    fn moving_only_tracks_the_pointer() {
        let mut map = renderer();
        draw(&mut map, west());
        map.pointer_enter(0, 0.0, 0.0);

        let change = map.pointer_move(0, 50.0, 60.0);
        assert!(change.changed.is_empty());
        assert_eq!((change.tooltip.x, change.tooltip.y), (60.0, 32.0));
        assert_eq!(map.hover_state(), HoverState::Hovering(0));

        // Moves and leaves for shapes that are not hovered are ignored.
        let change = map.pointer_move(1, 0.0, 0.0);
        assert_eq!((change.tooltip.x, change.tooltip.y), (60.0, 32.0));
        assert!(map.pointer_leave(1).changed.is_empty());
        assert_eq!(map.hover_state(), HoverState::Hovering(0));
    }

    #[test]
    fn entering_another_shape_leaves_the_first() {
        let mut map = renderer();
        draw(&mut map, west());
        map.pointer_enter(0, 0.0, 0.0);

        let change = map.pointer_enter(1, 0.0, 0.0);
        assert_eq!(change.changed.len(), 2);
        assert_eq!(change.changed[0].id, 0);
        assert!(change.changed[0].transform.is_none());
        assert_eq!(map.hover_state(), HoverState::Hovering(1));
    }

    #[test]
    fn pointer_at_dispatches_through_hit_testing() {
        let mut map = renderer();
        draw(&mut map, west());
        let (cx, cy) = centroid(&map, 0);

        let change = map.pointer_at(cx, cy);
        assert_eq!(map.hover_state(), HoverState::Hovering(0));
        assert_eq!(change.changed.len(), 1);

        let change = map.pointer_at(cx + 0.5, cy);
        assert!(change.changed.is_empty());
        assert_eq!(change.tooltip.x, cx + 0.5 + 10.0);

        let change = map.pointer_at(-1000.0, -1000.0);
        assert_eq!(map.hover_state(), HoverState::Idle);
        assert_eq!(change.changed.len(), 1);
        assert!(map.pointer_out().changed.is_empty());
    }

    #[test]
    fn pointer_at_follows_the_view_transform() {
        let mut map = renderer();
        draw(&mut map, west());
        let (cx, cy) = centroid(&map, 1);

        map.pan(40.0, -25.0);
        map.pointer_at(cx + 40.0, cy - 25.0);
        assert_eq!(map.hover_state(), HoverState::Hovering(1));

        map.pointer_out();
        map.zoom(2.0, 0.0, 0.0);
        map.pointer_at((cx + 40.0) * 2.0, (cy - 25.0) * 2.0);
        assert_eq!(map.hover_state(), HoverState::Hovering(1));
    }

    #[test]
    fn redraw_never_accumulates() {
        let mut map = renderer();
        draw(&mut map, west());
        draw(&mut map, west());
        assert_eq!(map.context().scene.shapes.len(), 3);

        draw(&mut map, vec![feature("Utah", -111.5, 39.5)]);
        assert_eq!(map.context().scene.shapes.len(), 1);
        assert_eq!(map.context().scene.labels.len(), 1);
        assert_eq!(map.context().scene.labels[0].text, "100");
    }

    #[test]
    fn redraw_resets_hover() {
        let mut map = renderer();
        draw(&mut map, west());
        map.pointer_enter(0, 0.0, 0.0);

        draw(&mut map, west());
        assert_eq!(map.hover_state(), HoverState::Idle);
        assert!(!map.tooltip().visible);
        assert!(map.context().scene.shapes[0].transform.is_none());
    }

    #[test]
    fn stale_selection_is_dropped() {
        let mut map = renderer();
        let slow = map.begin_selection(Selection::All);
        let fast = map.begin_selection(Selection::Region("utah".to_string()));

        assert!(map.complete_selection(fast, vec![feature("Utah", -111.5, 39.5)]));
        assert!(!map.complete_selection(slow, west()));

        assert_eq!(map.context().scene.shapes.len(), 1);
        assert_eq!(map.context().scene.revision, 1);
        assert_eq!(
            map.current_selection(),
            Some(&Selection::Region("utah".to_string()))
        );
    }

    #[tokio::test]
    async fn all_selection_redraws_once_after_every_fetch() {
        let mut map = renderer();
        let source = FakeSource::new(vec!["texas"]);

        assert!(map.select(&source, Selection::All, "name").await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 50);
        assert_eq!(map.context().scene.revision, 1);
        assert_eq!(map.context().scene.shapes.len(), 49);
        assert_eq!(map.context().scene.labels.len(), 49);
    }

    struct OneRegion;

    #[async_trait]
    impl RegionSource for OneRegion {
        async fn fetch(&self, region_id: &str) -> Result<String> {
            match region_id {
                "california" => Ok(square_feature("California", -119.5, 37.0)),
                other => Err(anyhow!("no document for {}", other)),
            }
        }
    }

    #[tokio::test]
    async fn california_scenario() {
        let table: OwnershipTable = [(
            "california".to_string(),
            OwnershipRecord {
                total: 56.0,
                dog: 40.0,
                cat: 16.0,
            },
        )]
        .into_iter()
        .collect();
        let mut map = MapRenderer::new(&config(), Arc::new(table)).unwrap();

        let selection: Selection = "california".parse().unwrap();
        assert!(map.select(&OneRegion, selection, "name").await);

        let scene = &map.context().scene;
        assert_eq!(scene.shapes.len(), 1);
        assert_eq!(scene.shapes[0].fill, map.palette().scale.color(56.0));
        assert_eq!(scene.labels[0].text, "56");

        let (cx, cy) = centroid(&map, 0);
        let change = map.pointer_at(cx, cy);
        assert_eq!(change.tooltip.lines[0], "Pet Ownership Rate: 56%");
        assert!(map.to_svg().contains(">56</text>"));
    }

    #[tokio::test]
    async fn failed_single_region_renders_nothing() {
        let mut map = renderer();
        draw(&mut map, west());

        assert!(map.select(&OneRegion, Selection::Region("ohio".to_string()), "name").await);
        assert!(map.context().scene.shapes.is_empty());
        assert!(map.context().scene.labels.is_empty());
    }
}
