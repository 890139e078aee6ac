use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::orchestrator::SubmitError;
use crate::retry::RetryError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("job is running: {0}")]
    JobRunning(String),
    #[error("job already has a retry: {0}")]
    AlreadyRetried(String),
    #[error("retry not allowed: {0}")]
    RetryExhausted(String),
    #[error("download queue is at capacity")]
    AtCapacity,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::JobRunning(_) => StatusCode::CONFLICT,
            ApiError::AlreadyRetried(_) => StatusCode::CONFLICT,
            ApiError::RetryExhausted(_) => StatusCode::CONFLICT,
            ApiError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::JobRunning(_) => "JOB_RUNNING",
            ApiError::AlreadyRetried(_) => "ALREADY_RETRIED",
            ApiError::RetryExhausted(_) => "RETRY_EXHAUSTED",
            ApiError::AtCapacity => "AT_CAPACITY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(job_id) => ApiError::NotFound(format!("job {job_id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(value: RetryError) -> Self {
        match value {
            RetryError::NotFound(job_id) => ApiError::NotFound(format!("job {job_id}")),
            RetryError::AlreadyRetried(job_id) => ApiError::AlreadyRetried(job_id),
            RetryError::Exhausted(job_id) => ApiError::RetryExhausted(job_id),
            RetryError::Store(error) => error.into(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::AtCapacity => ApiError::AtCapacity,
            SubmitError::Store(error) => error.into(),
        }
    }
}
