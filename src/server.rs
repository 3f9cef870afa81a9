use crate::config::AppConfig;
use crate::data::{fetch_selection, RegionSource};
use crate::map::{HoverChange, MapRenderer};
use crate::types::Selection;
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct AppState {
    pub renderer: Mutex<MapRenderer>,
    pub source: Arc<dyn RegionSource>,
    pub config: AppConfig,
}

#[derive(Deserialize)]
pub struct SelectRequest {
    selection: String,
}

#[derive(Deserialize)]
pub struct PointerRequest {
    x: f64,
    y: f64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ViewRequest {
    pan_x: f64,
    pan_y: f64,
    zoom: Option<f64>,
    x: f64,
    y: f64,
}

#[derive(Serialize)]
pub struct ViewResponse {
    transform: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/regions", get(regions_handler))
        .route("/api/select", post(select_handler))
        .route("/api/map.svg", get(map_handler))
        .route("/api/pointer", post(pointer_handler))
        .route("/api/pointer/out", post(pointer_out_handler))
        .route("/api/view", post(view_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(
    config: AppConfig,
    renderer: MapRenderer,
    source: Arc<dyn RegionSource>,
) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState {
        renderer: Mutex::new(renderer),
        source,
        config,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn svg_response(svg: String) -> Response {
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()
}

async fn regions_handler() -> Json<Vec<String>> {
    Json(Selection::options())
}

async fn select_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectRequest>,
) -> Response {
    let selection: Selection = match request.selection.parse() {
        Ok(selection) => selection,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    // The lock is released while fetching; the ticket decides who redraws.
    let ticket = state.renderer.lock().await.begin_selection(selection);
    let features = fetch_selection(
        state.source.as_ref(),
        &ticket.selection,
        &state.config.input.join_property_shape,
    )
    .await;

    let mut renderer = state.renderer.lock().await;
    if renderer.complete_selection(ticket, features) {
        svg_response(renderer.to_svg())
    } else {
        warn!("Selection superseded before it finished loading");
        (StatusCode::CONFLICT, "superseded by a newer selection").into_response()
    }
}

async fn map_handler(State(state): State<Arc<AppState>>) -> Response {
    svg_response(state.renderer.lock().await.to_svg())
}

async fn pointer_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PointerRequest>,
) -> Json<HoverChange> {
    Json(state.renderer.lock().await.pointer_at(request.x, request.y))
}

async fn pointer_out_handler(State(state): State<Arc<AppState>>) -> Json<HoverChange> {
    Json(state.renderer.lock().await.pointer_out())
}

async fn view_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ViewRequest>,
) -> Json<ViewResponse> {
    let mut renderer = state.renderer.lock().await;
    let mut transform = renderer.pan(request.pan_x, request.pan_y);
    if let Some(factor) = request.zoom {
        transform = renderer.zoom(factor, request.x, request.y);
    }
    Json(ViewResponse { transform })
}
