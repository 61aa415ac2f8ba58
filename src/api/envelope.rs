//! JSON envelope for the control API.
//!
//! Success bodies are `{ "data": ..., "meta": {...} }`, failures are
//! `{ "error": { "code", "message" }, "meta": {...} }`. Handlers return
//! [`ApiResult`] and let `?` turn supervisor errors into the right status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::background::SupervisorError;

const API_VERSION: &str = "1";

pub type ApiResult<T> = Result<Envelope<T>, ApiError>;

#[derive(Debug, Serialize)]
struct Meta {
    timestamp: DateTime<Utc>,
    version: &'static str,
}

impl Meta {
    fn now() -> Self {
        Self { timestamp: Utc::now(), version: API_VERSION }
    }
}

/// A 200 response carrying `data`.
#[derive(Debug)]
pub struct Envelope<T>(pub T);

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body<T> {
            data: T,
            meta: Meta,
        }
        Json(Body { data: self.0, meta: Meta::now() }).into_response()
    }
}

/// A non-2xx response with a machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SupervisorError> for ApiError {
    fn from(error: SupervisorError) -> Self {
        let (status, code) = match &error {
            SupervisorError::UnknownEndpoint(_) => (StatusCode::NOT_FOUND, "UNKNOWN_ENDPOINT"),
            SupervisorError::DuplicateEndpoint(_) => (StatusCode::CONFLICT, "DUPLICATE_ENDPOINT"),
            SupervisorError::Config(_) => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
            SupervisorError::HttpClient(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self::new(status, code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Detail<'a> {
            code: &'a str,
            message: &'a str,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            error: Detail<'a>,
            meta: Meta,
        }

        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "API request failed");
        }
        let body = Body {
            error: Detail { code: self.code, message: &self.message },
            meta: Meta::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn envelope_wraps_data_with_meta() {
        let resp = Envelope(serde_json::json!({ "monitoringActive": false })).into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let v = body_json(resp).await;
        assert_eq!(v["data"]["monitoringActive"], false);
        assert_eq!(v["meta"]["version"], "1");
        assert!(v["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn supervisor_errors_map_to_status_codes() {
        let err = ApiError::from(SupervisorError::DuplicateEndpoint("Ollama".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let v = body_json(err.into_response()).await;
        assert_eq!(v["error"]["code"], "DUPLICATE_ENDPOINT");
        assert_eq!(v["error"]["message"], "Endpoint already exists: Ollama");
        assert!(v.get("data").is_none());

        let err = ApiError::from(SupervisorError::UnknownEndpoint("x".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
