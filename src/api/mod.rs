//! HTTP and WebSocket surface for observers
//!
//! Every route works on the shared [`Session`]. Handlers never hold a
//! session lock across an `.await`; anything slow (content rendering,
//! replay) runs on data copied out of the store first.

mod extract;
mod handlers;
mod server;
mod ws;


use std::any::Any;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::session::Session;

pub use server::WebServer;

/// Build the full router for `session`
pub fn router(session: Arc<Session>) -> Router {
    with_layers(routes().with_state(session))
}

fn routes() -> Router<Arc<Session>> {
    Router::new()
        .route("/updates", get(ws::updates))
        .route("/commands", get(handlers::list_commands))
        .route("/commands/:name", post(handlers::execute_command))
        .route("/events", get(handlers::events))
        .route("/flows", get(handlers::flows))
        .route("/flows/resume", post(handlers::resume_all))
        .route("/flows/kill", post(handlers::kill_all))
        .route(
            "/flows/:id",
            axum::routing::put(handlers::update_flow).delete(handlers::delete_flow),
        )
        .route("/flows/:id/resume", post(handlers::resume_flow))
        .route("/flows/:id/kill", post(handlers::kill_flow))
        .route("/flows/:id/duplicate", post(handlers::duplicate_flow))
        .route("/flows/:id/replay", post(handlers::replay_flow))
        .route("/flows/:id/revert", post(handlers::revert_flow))
        .route(
            "/flows/:id/:part/content.data",
            get(handlers::content_data).post(handlers::replace_content_data),
        )
        .route("/flows/:id/messages/content/:view", get(handlers::messages_view))
        .route("/flows/:id/:part/content/:view", get(handlers::content_view))
        .route("/clear", post(handlers::clear))
        .route(
            "/options",
            get(handlers::options).put(handlers::set_options),
        )
        .route("/options/save", post(handlers::save_options))
}

/// Panic capture and request tracing, outermost last
fn with_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
