use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{
    access_control::AccessControlError, booking_rules::BookingError, password::PasswordError,
    qr_generator::QrGenerationError, sessions::SessionError, signature::SignatureError,
    tokens::TokenError,
};

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Database(e) => e.to_string(),
            Self::Validation(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Internal(msg) => msg.clone(),
        }
    }

    pub fn not_found(entity: &str) -> Self {
        Self::NotFound(format!("{} not found", entity))
    }

    /// A guarded status update matched no row because the status moved underneath it.
    pub fn status_changed(entity: &str) -> Self {
        Self::Conflict(format!("{} status changed, reload and retry", entity))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            match db_err.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => {
                    let message = match db_err.constraint() {
                        Some("users_email_key") => "Email is already registered".to_string(),
                        Some("idx_memberships_one_open_per_user") => {
                            "User already has an open membership".to_string()
                        }
                        Some("access_tiers_name_key") => "Tier name is already taken".to_string(),
                        Some("equipments_serial_number_key") => {
                            "Serial number is already registered".to_string()
                        }
                        Some(constraint) => format!("Duplicate value violates {}", constraint),
                        None => "Duplicate value".to_string(),
                    };
                    return Self::Conflict(message);
                }
                Some(PG_FOREIGN_KEY_VIOLATION) => {
                    return Self::Validation("Referenced record does not exist".to_string());
                }
                _ => {}
            }
        }

        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound("Record not found".to_string());
        }

        Self::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::DatabaseError(e) => e.into(),
            BookingError::SpaceNotFound | BookingError::EquipmentNotFound => {
                Self::NotFound(err.to_string())
            }
            BookingError::Overlap | BookingError::StatusChanged => Self::Conflict(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::DatabaseError(e) => e.into(),
            SessionError::TokenError(e) => e.into(),
            SessionError::UserInactive => Self::Forbidden(err.to_string()),
            SessionError::InvalidRefreshToken | SessionError::RefreshTokenReused => {
                Self::Unauthorized(err.to_string())
            }
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Generation(e) => Self::Internal(e.to_string()),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort => Self::Validation(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AccessControlError> for AppError {
    fn from(err: AccessControlError) -> Self {
        match err {
            AccessControlError::DatabaseError(e) => e.into(),
            AccessControlError::ReplayNotRecorded => Self::Internal(err.to_string()),
        }
    }
}

impl From<QrGenerationError> for AppError {
    fn from(err: QrGenerationError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(error = %self, code = code, "Request failed");
        } else {
            tracing::warn!(error = %self, code = code, "Request rejected");
        }

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct PgFailure {
        message: String,
        code: &'static str,
        constraint: Option<&'static str>,
    }

    impl PgFailure {
        fn into_sqlx(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
            sqlx::Error::Database(Box::new(PgFailure {
                message: format!("violation {}", code),
                code,
                constraint,
            }))
        }
    }

    impl DatabaseError for PgFailure {
        fn message(&self) -> &str {
            &self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.code {
                PG_UNIQUE_VIOLATION => ErrorKind::UniqueViolation,
                PG_FOREIGN_KEY_VIOLATION => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let err: AppError = PgFailure::into_sqlx(PG_UNIQUE_VIOLATION, Some("users_email_key")).into();

        assert!(matches!(&err, AppError::Conflict(msg) if msg == "Email is already registered"));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unique_violation_messages_follow_constraint() {
        let open: AppError =
            PgFailure::into_sqlx(PG_UNIQUE_VIOLATION, Some("idx_memberships_one_open_per_user")).into();
        assert_eq!(open.message(), "User already has an open membership");

        let other: AppError = PgFailure::into_sqlx(PG_UNIQUE_VIOLATION, Some("spaces_name_key")).into();
        assert_eq!(other.message(), "Duplicate value violates spaces_name_key");

        let unnamed: AppError = PgFailure::into_sqlx(PG_UNIQUE_VIOLATION, None).into();
        assert_eq!(unnamed.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_foreign_key_violation_is_validation_error() {
        let err: AppError =
            PgFailure::into_sqlx(PG_FOREIGN_KEY_VIOLATION, Some("bookings_space_fk")).into();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_other_database_codes_are_internal() {
        let err: AppError = PgFailure::into_sqlx("23514", Some("bookings_window_check")).into();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn test_status_race_is_conflict() {
        let err = AppError::status_changed("Booking");
        assert!(err.message().starts_with("Booking status changed"));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let reschedule: AppError = BookingError::StatusChanged.into();
        assert_eq!(reschedule.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unrecorded_replay_is_internal() {
        let err: AppError = AccessControlError::ReplayNotRecorded.into();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                AppError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_message_passes_through() {
        let err = AppError::Internal("scheduler stopped".into());
        assert_eq!(err.message(), "scheduler stopped");
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_pool_errors_stay_database_errors() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_booking_errors_map_to_status() {
        let overlap: AppError = BookingError::Overlap.into();
        assert_eq!(overlap.into_response().status(), StatusCode::CONFLICT);

        let window: AppError = BookingError::InvalidWindow("too short".into()).into();
        assert_eq!(window.into_response().status(), StatusCode::BAD_REQUEST);

        let missing: AppError = BookingError::SpaceNotFound.into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_session_errors_map_to_status() {
        let reused: AppError = SessionError::RefreshTokenReused.into();
        assert_eq!(reused.into_response().status(), StatusCode::UNAUTHORIZED);

        let inactive: AppError = SessionError::UserInactive.into();
        assert_eq!(inactive.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_short_password_is_validation_error() {
        let err: AppError = PasswordError::TooShort.into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_not_found_helper() {
        let err = AppError::not_found("Booking");
        assert_eq!(err.message(), "Booking not found");
    }
}
