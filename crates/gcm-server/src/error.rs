use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gcm_core::GcmError;
use serde::Serialize;
use tracing::error;

/// HTTP-facing wrapper around [`GcmError`], following
/// `nest::http::error::Error`'s `status_code` + `IntoResponse` idiom.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
	#[error(transparent)]
	Gcm(#[from] GcmError),

	#[error("request body was not valid: {0}")]
	BadRequest(String),
}

impl ApiError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::Gcm(GcmError::NotFound { .. }) => StatusCode::NOT_FOUND,
			Self::Gcm(GcmError::ReentrantDenied { .. }) => StatusCode::CONFLICT,
			Self::Gcm(GcmError::TimeoutError { .. }) => StatusCode::REQUEST_TIMEOUT,
			Self::Gcm(GcmError::Cancelled { .. }) => StatusCode::CONFLICT,
			Self::Gcm(GcmError::InvalidStrategy(_) | GcmError::ManualStrategyRequiresVictim { .. }) => StatusCode::BAD_REQUEST,
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	error: String,
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if matches!(self, Self::Gcm(GcmError::TimeoutError { .. } | GcmError::Cancelled { .. })) {
			error!(error = %self, "acquire did not complete successfully");
		}
		(self.status_code(), Json(ErrorBody { error: self.to_string() })).into_response()
	}
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
