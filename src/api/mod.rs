//! Session Gateway: the local HTTP surface for the browser UI.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::lifecycle::Controller;

pub fn create_router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/plugin-settings", get(handlers::plugin_settings))
        .route("/phone-numbers", get(handlers::list_phone_numbers))
        .route("/choose-phone-number", post(handlers::choose_phone_number))
        .route("/send-sms", post(handlers::send_sms))
        .route("/client-token", get(handlers::client_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(controller)
}
