// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::auth::AuthError;
use crate::database::DatabaseError;
use crate::services::email::{EmailError, TemplateError};
use crate::services::ingest::IngestError;
use crate::services::pipeline::PipelineError;
use crate::types::UnknownVariant;

pub type FieldErrors = BTreeMap<String, String>;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 422 Unprocessable Entity (well-formed input that breaks a business rule)
    UnprocessableEntity {
        message: String,
        field_errors: FieldErrors,
    },

    // 429 Too Many Requests
    TooManyRequests(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (email provider issues)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::UnprocessableEntity { message, .. } => message,
            ApiError::TooManyRequests(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::BadGateway(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::UnprocessableEntity { .. } => "UNPROCESSABLE_ENTITY",
            ApiError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::UnprocessableEntity { message, field_errors } => {
                json!({
                    "error": true,
                    "message": message,
                    "code": "UNPROCESSABLE_ENTITY",
                    "field_errors": field_errors
                })
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn unprocessable(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        ApiError::UnprocessableEntity {
            message: message.into(),
            field_errors,
        }
    }

    /// 422 for a single offending field
    pub fn invalid_field(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut field_errors = FieldErrors::new();
        field_errors.insert(field.into(), problem.into());
        ApiError::unprocessable("Invalid field value", field_errors)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        ApiError::TooManyRequests(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::UniqueViolation { constraint } => {
                tracing::debug!("Unique violation on {:?}", constraint);
                ApiError::conflict("A record with the same unique value already exists")
            }
            DatabaseError::ForeignKeyViolation { constraint } => {
                let field = constraint.unwrap_or_else(|| "reference".to_string());
                ApiError::invalid_field(field, "Referenced record does not exist")
            }
            DatabaseError::CheckViolation(msg) => {
                ApiError::unprocessable(format!("Value rejected by database constraint: {}", msg), FieldErrors::new())
            }
            DatabaseError::InvalidInput(msg) => ApiError::bad_request(format!("Invalid input: {}", msg)),
            DatabaseError::Connection(msg) => {
                tracing::error!("Database connection error: {}", msg);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::ConfigMissing(name) => {
                tracing::error!("Database configuration missing: {}", name);
                ApiError::service_unavailable("Database is not configured")
            }
            DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("DATABASE_URL could not be parsed");
                ApiError::service_unavailable("Database is not configured")
            }
            DatabaseError::Query(msg) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Database query error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::unauthorized("Invalid email or password"),
            AuthError::SessionInvalid => ApiError::unauthorized("Session is invalid or has expired"),
            AuthError::MissingToken => ApiError::unauthorized("Authentication required"),
            AuthError::InsufficientRole { required } => {
                ApiError::forbidden(format!("Requires {} role", required))
            }
            AuthError::WeakPassword(msg) => ApiError::invalid_field("password", msg),
            AuthError::Hashing(msg) => {
                tracing::error!("Password hashing failed: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::MissingVariables(missing) => {
                let field_errors = missing
                    .into_iter()
                    .map(|k| (format!("vars.{}", k), "Missing template variable".to_string()))
                    .collect();
                ApiError::unprocessable("Template variables missing", field_errors)
            }
        }
    }
}

impl From<EmailError> for ApiError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::NotConfigured(what) => {
                tracing::error!("Email transport not configured: {}", what);
                ApiError::service_unavailable("Email sending is not configured")
            }
            other => {
                tracing::error!("Email provider error: {}", other);
                ApiError::bad_gateway("Email provider request failed")
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Database(e) => e.into(),
            other => ApiError::unprocessable(format!("Import failed: {}", other), FieldErrors::new()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Unknown { .. } => ApiError::not_found(err.to_string()),
            PipelineError::Ingest(e) => e.into(),
            PipelineError::Database(e) => e.into(),
        }
    }
}

impl From<UnknownVariant> for ApiError {
    fn from(err: UnknownVariant) -> Self {
        ApiError::invalid_field(err.kind.replace(' ', "_"), err.to_string())
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_map_to_statuses() {
        let cases = [
            (DatabaseError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (DatabaseError::UniqueViolation { constraint: None }, StatusCode::CONFLICT),
            (DatabaseError::ForeignKeyViolation { constraint: None }, StatusCode::UNPROCESSABLE_ENTITY),
            (DatabaseError::InvalidInput("bad uuid".into()), StatusCode::BAD_REQUEST),
            (DatabaseError::Connection("io".into()), StatusCode::SERVICE_UNAVAILABLE),
            (DatabaseError::Query("syntax".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn query_errors_hide_sql() {
        let err = ApiError::from(DatabaseError::Query("relation \"ops.secret\" does not exist".into()));
        assert!(!err.message().contains("ops.secret"));
    }

    #[test]
    fn unprocessable_carries_field_errors() {
        let body = ApiError::invalid_field("status", "bad").to_json();
        assert_eq!(body["code"], "UNPROCESSABLE_ENTITY");
        assert_eq!(body["field_errors"]["status"], "bad");
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(ApiError::from(AuthError::InvalidCredentials).status_code(), StatusCode::UNAUTHORIZED);
        let forbidden = ApiError::from(AuthError::InsufficientRole { required: crate::types::StaffRole::Admin });
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unknown_variant_becomes_field_error() {
        let err = "bogus".parse::<crate::types::RequestStatus>().unwrap_err();
        let body = ApiError::from(err).to_json();
        assert!(body["field_errors"]["request_status"].as_str().unwrap().contains("bogus"));
    }
}
