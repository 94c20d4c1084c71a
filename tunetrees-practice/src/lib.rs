//! tunetrees-practice library - practice queue and staged review
//!
//! - [`bucket`]: review-urgency classification of due dates
//! - [`snapshot`]: deduplicated, copy-on-write queue snapshot cache
//! - [`review`]: staged evaluation lifecycle with optimistic updates
//! - [`session_state`]: debounced persistence of per-view table state
//! - [`session`]: explicit practice context, session lifecycle, registry
//! - [`db`]: SQLite implementation of the [`backend::PracticeBackend`] boundary
//! - [`api`]: axum HTTP surface

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod backend;
pub mod bucket;
pub mod db;
pub mod error;
pub mod model;
pub mod review;
pub mod scheduler;
pub mod session;
pub mod session_state;
pub mod snapshot;

pub use error::{Error, Result};
pub use session::{PracticeContext, PracticeSession, SessionRegistry};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::practice_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
