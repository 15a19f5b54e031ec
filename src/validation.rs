use crate::error::AppError;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::instrument;
use validator::{Validate, ValidationError};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }
}

pub type ApiError = Custom<Json<ValidationResponse>>;

pub trait ToValidationResponse {
    fn to_validation_response(self) -> ApiError;
}

impl ToValidationResponse for AppError {
    #[instrument]
    fn to_validation_response(self) -> ApiError {
        self.log_and_record("API Validation Error");
        let status = self.status_code();

        let (field, message) = match &self {
            AppError::Database(_) => ("server", "Internal server error".to_string()),
            AppError::Authentication(msg) => {
                ("authentication", format!("Authentication error: {}", msg))
            }
            AppError::NotFound(msg) => ("resource", format!("Not found: {}", msg)),
            AppError::Validation(msg) => ("validation", msg.clone()),
            AppError::BadRequest(msg) => ("request", msg.clone()),
            AppError::Conflict(msg) => ("resource", msg.clone()),
            AppError::ExternalService(msg) => ("service", format!("Service error: {}", msg)),
            AppError::Internal(_) => ("server", "Internal server error".to_string()),
        };

        Custom(status, Json(ValidationResponse::with_error(field, &message)))
    }
}

impl ToValidationResponse for Status {
    #[instrument]
    fn to_validation_response(self) -> ApiError {
        let (field, message) = match self {
            s if s == Status::Forbidden => (
                "permission",
                "You don't have permission to perform this action",
            ),
            s if s == Status::Unauthorized => ("authentication", "Authentication required"),
            s if s == Status::NotFound => ("resource", "Resource not found"),
            s if s == Status::Conflict => ("resource", "Resource already exists"),
            s if s == Status::BadRequest => ("request", "Bad request"),
            s if s == Status::UnprocessableEntity => ("validation", "Validation failed"),
            s if s == Status::InternalServerError => ("server", "Internal server error"),
            s if s == Status::ServiceUnavailable => ("service", "Service unavailable"),
            _ => ("error", "An error occurred"),
        };

        Custom(self, Json(ValidationResponse::with_error(field, message)))
    }
}

impl From<validator::ValidationErrors> for ValidationResponse {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut error_map = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let error_messages: Vec<String> = field_errors
                .iter()
                .map(|error| {
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();

            error_map.insert(field.to_string(), error_messages);
        }

        ValidationResponse::new(error_map)
    }
}

/// Runs the `validator` rules on a JSON body, answering 422 with a per-field
/// error map on failure.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, ApiError> {
        let inner = self.into_inner();
        match inner.validate() {
            Ok(()) => Ok(inner),
            Err(errors) => {
                tracing::warn!(errors = %errors, "Request body failed validation");
                Err(Custom(
                    Status::UnprocessableEntity,
                    Json(ValidationResponse::from(errors)),
                ))
            }
        }
    }
}

pub trait AppErrorExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;

    /// Like `validate_custom`, but reports validation errors against `field`.
    fn validate_field(self, field: &str) -> Result<T, ApiError>;
}

impl<T> AppErrorExt<T> for Result<T, AppError> {
    fn validate_custom(self) -> Result<T, ApiError> {
        self.map_err(ToValidationResponse::to_validation_response)
    }

    fn validate_field(self, field: &str) -> Result<T, ApiError> {
        self.map_err(|err| {
            let field_message = match &err {
                AppError::Validation(msg) | AppError::Conflict(msg) => Some(msg.clone()),
                _ => None,
            };

            match field_message {
                Some(msg) => {
                    err.log_and_record(field);
                    Custom(
                        err.status_code(),
                        Json(ValidationResponse::with_error(field, &msg)),
                    )
                }
                None => err.to_validation_response(),
            }
        })
    }
}

pub trait PermissionCheckExt {
    fn validate_custom(self) -> Result<(), ApiError>;
}

impl PermissionCheckExt for Result<(), Status> {
    fn validate_custom(self) -> Result<(), ApiError> {
        self.map_err(ToValidationResponse::to_validation_response)
    }
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let valid = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        let mut error = ValidationError::new("username_characters");
        error.message = Some("Usernames may only contain letters, digits, '_', '.' and '-'".into());
        Err(error)
    }
}

pub const MAX_QUESTION_TAGS: usize = 3;
pub const MAX_TAG_NAME_CHARS: usize = 100;

/// Counts tags the way lookup matches them: trimmed and ASCII
/// case-insensitive, so repeats of one tag count once.
pub fn validate_tag_limit(tags: &[String]) -> Result<(), ValidationError> {
    let distinct: HashSet<String> = tags
        .iter()
        .map(|tag| tag.trim().to_ascii_lowercase())
        .collect();

    if distinct.len() > MAX_QUESTION_TAGS {
        let mut error = ValidationError::new("tag_limit");
        error.message = Some("You can choose 3 tags maximum".into());
        Err(error)
    } else {
        Ok(())
    }
}

pub fn validate_tag_name(name: &str) -> Result<(), ValidationError> {
    let chars = name.trim().chars().count();
    if (1..=MAX_TAG_NAME_CHARS).contains(&chars) {
        Ok(())
    } else {
        let mut error = ValidationError::new("tag_length");
        error.message = Some("Tag must be 1 to 100 characters".into());
        Err(error)
    }
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("This field cannot be blank".into());
        Err(error)
    } else {
        Ok(())
    }
}
