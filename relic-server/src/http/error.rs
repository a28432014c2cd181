use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

/// Result of an HTTP handler.
pub type AppResult<T> = Result<T, AppError>;

/// JSON error body, `{"status": "404", "detail": "relic not found"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    #[serde(with = "serde_status_code")]
    status: StatusCode,
    detail: Option<String>,
}

impl AppError {
    /// Create a new [`AppError`].
    pub fn new(status_code: StatusCode, message: Option<impl ToString>) -> AppError {
        Self {
            status: status_code,
            detail: message.map(|m| m.to_string()),
        }
    }

    /// The HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let json = Json(self.clone());
        (self.status, json).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Gone => StatusCode::GONE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.is_internal() {
            warn!("request failed: {}", snafu::Report::from_error(&err));
            let detail = match status {
                StatusCode::SERVICE_UNAVAILABLE => "storage unavailable",
                _ => "internal server error",
            };
            return Self::new(status, Some(detail));
        }
        Self::new(status, Some(err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        warn!("request failed: {value:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some("internal server error"))
    }
}

impl From<QueryRejection> for AppError {
    fn from(value: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, Some(value.body_text()))
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        Self::new(value.status(), Some(value.body_text()))
    }
}

impl From<MultipartRejection> for AppError {
    fn from(value: MultipartRejection) -> Self {
        Self::new(value.status(), Some(value.body_text()))
    }
}

impl From<MultipartError> for AppError {
    fn from(value: MultipartError) -> Self {
        Self::new(value.status(), Some(value.body_text()))
    }
}

/// Status codes travel as strings, e.g. `"404"`.
mod serde_status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(status: &StatusCode, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(status.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<StatusCode, D::Error> {
        let code = String::deserialize(de)?;
        StatusCode::from_bytes(code.as_bytes())
            .map_err(|_| D::Error::custom(format!("invalid status code {code:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blobs::BlobError, error::Error};

    #[test]
    fn status_mapping() {
        let cases = [
            (
                Error::InvalidArgument {
                    message: "bad".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::Forbidden { reason: "no" }, StatusCode::FORBIDDEN),
            (Error::NotFound { what: "relic" }, StatusCode::NOT_FOUND),
            (Error::Conflict { message: "dup" }, StatusCode::CONFLICT),
            (Error::Gone, StatusCode::GONE),
            (
                Error::PayloadTooLarge { size: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                Error::StorageUnavailable {
                    source: BlobError::Unavailable,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::GenerationExhausted { attempts: 5 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = AppError::from(Error::GenerationExhausted { attempts: 5 });
        assert_eq!(err.detail.as_deref(), Some("internal server error"));
        let err = AppError::from(Error::NotFound { what: "relic" });
        assert_eq!(err.detail.as_deref(), Some("relic not found"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "404");
    }
}
