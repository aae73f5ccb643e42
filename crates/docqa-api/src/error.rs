//! API error type and JSON error response formatting.
//!
//! Every failure is returned as `{ "error", "message", "details"? }` with a
//! status code derived from the underlying `DocqaError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use docqa_core::error::DocqaError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "schema_violation").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 404 - document or index file does not exist.
    NotFound(String),
    /// 409 - vector dimensionality conflicts with the index.
    Conflict { message: String, details: Value },
    /// 422 - model output did not satisfy the requested schema.
    SchemaViolation { message: String, raw_output: String },
    /// 502 - the generation provider failed.
    BadGateway(String),
    /// 503 - the embedding provider is unreachable.
    ServiceUnavailable { message: String, service: String },
    /// 500 - anything else.
    Internal(String),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String, Option<Value>) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict { message, details } => {
                (StatusCode::CONFLICT, "dimension_mismatch", message, Some(details))
            }
            ApiError::SchemaViolation {
                message,
                raw_output,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "schema_violation",
                message,
                Some(json!({ "raw_output": raw_output })),
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "generation_failed", msg, None),
            ApiError::ServiceUnavailable { message, service } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                message,
                Some(json!({ "service": service })),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = self.parts();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = error_code, %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<DocqaError> for ApiError {
    fn from(err: DocqaError) -> Self {
        let message = err.to_string();
        match err {
            DocqaError::InvalidInput(_) => ApiError::BadRequest(message),
            DocqaError::NotFound(_) => ApiError::NotFound(message),
            DocqaError::DimensionMismatch { expected, actual } => ApiError::Conflict {
                message,
                details: json!({ "expected": expected, "actual": actual }),
            },
            DocqaError::SchemaViolation { raw_output, .. } => ApiError::SchemaViolation {
                message,
                raw_output,
            },
            DocqaError::GenerationFailed(_) => ApiError::BadGateway(message),
            DocqaError::ServiceUnavailable { service, .. } => {
                ApiError::ServiceUnavailable { message, service }
            }
            _ => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (DocqaError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (DocqaError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                DocqaError::DimensionMismatch {
                    expected: 384,
                    actual: 768,
                },
                StatusCode::CONFLICT,
            ),
            (
                DocqaError::SchemaViolation {
                    reason: "x".into(),
                    raw_output: "y".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DocqaError::GenerationFailed("x".into()), StatusCode::BAD_GATEWAY),
            (
                DocqaError::unavailable("embedding", "down"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (DocqaError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).parts().0, status);
        }
    }

    #[test]
    fn test_schema_violation_carries_raw_output() {
        let err = ApiError::from(DocqaError::SchemaViolation {
            reason: "no JSON".into(),
            raw_output: "plain prose".into(),
        });
        let (_, code, message, details) = err.parts();
        assert_eq!(code, "schema_violation");
        assert!(message.contains("no JSON"));
        assert_eq!(details.unwrap()["raw_output"], "plain prose");
    }
}
