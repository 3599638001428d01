//! Request extractors

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::error::ApiError;

/// JSON request body. Unlike `axum::Json`, every failure is a plain 400
/// carrying the reason, which is what the web UI shows to the operator.
pub(super) struct JsonBody(pub Value);

pub(super) fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

#[async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json(req.headers()) {
            return Err(ApiError::InvalidArgument(
                "Invalid Content-Type, expected application/json.".into(),
            ));
        }
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::InvalidArgument(e.body_text()))?;
        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| ApiError::InvalidArgument(format!("Malformed JSON: {}", e)))
    }
}

/// Arguments of a command call: `{"arguments": [...]}`
///
/// An empty body, or an object without `arguments`, means no arguments.
/// Anything else that is not that shape is rejected so a garbled call never
/// runs a command.
pub(super) fn command_arguments(headers: &HeaderMap, body: &[u8]) -> Result<Vec<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    if !is_json(headers) {
        return Err(ApiError::InvalidArgument(
            "Invalid Content-Type, expected application/json.".into(),
        ));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidArgument(format!("Malformed JSON: {}", e)))?;
    let Value::Object(mut map) = value else {
        return Err(ApiError::InvalidArgument("Expected a JSON object.".into()));
    };
    match map.remove("arguments") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args),
        Some(_) => Err(ApiError::InvalidArgument("arguments must be a list.".into())),
    }
}
