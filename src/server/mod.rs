//! HTTP surface of the dashboard backend.
//!
//! - `handlers`: health, metrics, calendar and photo endpoints.
//! - `middleware`: request id propagation and request metrics.
//! - `routes`: router assembly and shared state.

mod handlers;
mod middleware;
mod routes;

pub use routes::{create_router, AppState};
