//! HTTP API handlers for tunetrees-practice

pub mod error;
pub mod evaluations;
pub mod health;
pub mod queue;
pub mod view_state;

pub use health::health_routes;

use crate::AppState;
use axum::routing::{get, post, put};
use axum::Router;

/// Practice routes, all scoped to `/api/practice/:user_id/:playlist_id`
pub fn practice_routes() -> Router<AppState> {
    Router::new()
        .route("/api/practice/:user_id/:playlist_id/queue", get(queue::get_queue))
        .route(
            "/api/practice/:user_id/:playlist_id/queue/refresh",
            post(queue::refresh_queue),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/queue/refill",
            post(queue::refill_queue),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/queue/items",
            post(queue::add_items),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/scroll/:item_id",
            post(queue::scroll_to_item),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/evaluations/submit",
            post(evaluations::submit_evaluations),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/evaluations/:item_id",
            put(evaluations::stage_evaluation),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/view-state/:purpose",
            get(view_state::get_view_state)
                .patch(view_state::patch_view_state)
                .delete(view_state::clear_view_state),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/view-state/:purpose/flush",
            post(view_state::flush_view_state),
        )
        .route(
            "/api/practice/:user_id/:playlist_id/visibility-hidden",
            post(view_state::visibility_hidden),
        )
}
