use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dealer_common::error::ReconcileError;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Enumeration of errors returned by the dealer endpoint.
#[derive(Error, Debug)]
pub enum DealerError {
    #[error("failed to parse request: {0}")]
    MalformedRequest(#[from] serde_json::Error),
    #[error("unknown trigger - {0}")]
    UnknownTrigger(String),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl IntoResponse for DealerError {
    /// Every dealer error is reported as a bad request, including reconciliation failures
    /// that happened inside the process.
    fn into_response(self) -> Response {
        warn!(error = %self, "rejecting dealer request");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
