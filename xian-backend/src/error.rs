use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use xian_store::StoreError;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Body of a failed `/api/clear-records`.
#[derive(Debug, Serialize)]
struct ClearFailure {
  success: bool,
  error: String,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Store(StoreError),
  ClearFailed(StoreError),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Store(store_err) => {
        tracing::error!(error = %store_err, "Store error occurred");
        let error_response = match &store_err {
          StoreError::Json(e) => ErrorResponse::with_details("Stored data is unreadable", e.to_string()),
          other => ErrorResponse::new(other.to_string()),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(error_response)).into_response()
      }
      AppError::ClearFailed(store_err) => {
        tracing::error!(error = %store_err, "Failed to clear records");
        let body = ClearFailure {
          success: false,
          error: store_err.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
      }
    }
  }
}

impl From<StoreError> for AppError {
  fn from(err: StoreError) -> Self {
    AppError::Store(err)
  }
}
