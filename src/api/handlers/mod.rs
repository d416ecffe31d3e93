use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use dev_phone_core::PluginSettings;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::lifecycle::Controller;
use crate::remote::OutboundMessage;

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

/// Map an error to `{error}` with the remote's status, or 400.
///
/// Handler failures never take the gateway down; they are logged here and
/// returned to the caller.
fn api_error(e: Error) -> (StatusCode, Json<Value>) {
    let status = e.status_code();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), "Request failed: {}", e);
    } else {
        tracing::warn!(status = status.as_u16(), "Request rejected: {}", e);
    }
    (status, Json(json!({ "error": e.to_string() })))
}

/// Malformed or incomplete request bodies get the same `{error}` shape.
fn bad_body(rejection: JsonRejection) -> (StatusCode, Json<Value>) {
    let message = rejection.body_text();
    tracing::warn!("Rejected request body: {}", message);
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "pong": true }))
}

pub async fn plugin_settings(State(controller): State<Arc<Controller>>) -> Json<PluginSettings> {
    Json(controller.plugin_settings().await)
}

pub async fn list_phone_numbers(State(controller): State<Arc<Controller>>) -> HandlerResult<Value> {
    let numbers = controller.phone_numbers().await.map_err(api_error)?;
    Ok(Json(json!({ "phone-numbers": numbers })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoosePhoneNumber {
    pub phone_number: String,
}

pub async fn choose_phone_number(
    State(controller): State<Arc<Controller>>,
    input: Result<Json<ChoosePhoneNumber>, JsonRejection>,
) -> HandlerResult<Value> {
    let Json(input) = input.map_err(bad_body)?;
    let binding = controller
        .choose_phone_number(&input.phone_number)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({
        "phoneNumber": binding.phone_number,
        "message": format!("Webhooks for {} now point at this session", binding.phone_number),
    })))
}

pub async fn send_sms(
    State(controller): State<Arc<Controller>>,
    message: Result<Json<OutboundMessage>, JsonRejection>,
) -> HandlerResult<Value> {
    let Json(message) = message.map_err(bad_body)?;
    let result = controller.send_sms(&message).await.map_err(api_error)?;
    Ok(Json(json!({ "result": result })))
}

pub async fn client_token(State(controller): State<Arc<Controller>>) -> HandlerResult<Value> {
    let token = controller.client_token().await.map_err(api_error)?;
    Ok(Json(json!({ "token": token.value })))
}
