// HTTP routes configuration

use super::handlers::{calendar_handler, health_handler, metrics_handler, next_photo_handler};
use super::middleware::{request_id_layers, track_metrics};
use crate::calendar::CalendarService;
use crate::credentials::TokenCacheManager;
use crate::photos::PhotoService;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub manager: TokenCacheManager,
    pub calendar: Arc<CalendarService>,
    pub photos: Arc<PhotoService>,
}

pub fn create_router(state: AppState) -> Router {
    let (set_request_id, propagate_request_id) = request_id_layers();

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/calendar", get(calendar_handler))
        .route("/api/photos/next", get(next_photo_handler))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}
