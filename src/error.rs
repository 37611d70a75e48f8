// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Errors raised by the loan and valuation engines for bad caller input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("paid months {value} out of range 0..={max}")]
    OutOfRange { value: i64, max: u32 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned from HTTP handlers, rendered by [`handle_rejection`](crate::api::handle_rejection).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reject for ApiError {}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_bad_request() {
        let err: ApiError = EngineError::OutOfRange { value: 30, max: 24 }.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "paid months 30 out of range 0..=24");
    }

    #[test]
    fn test_store_errors_map_to_internal() {
        let err: ApiError = StoreError::Backend("node down".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_converts_into_rejection() {
        let rejection: warp::Rejection = ApiError::NotFound("Loan not found".into()).into();
        let err = rejection.find::<ApiError>().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Loan not found");
    }
}
