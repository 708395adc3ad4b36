use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failures surfaced by the enrollment, attendance and fee operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<String>,
    },
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: vec![field.to_string()],
        }
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        Self::Validation {
            message: format!("missing required fields: {}", fields.join(", ")),
            fields,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation { .. } => "bad_params",
            Self::Db(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { fields, .. } if !fields.is_empty() => {
                Some(json!({ "fields": fields }))
            }
            Self::Db(e) => Some(json!({ "sqlite": e.to_string() })),
            _ => None,
        }
    }
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && matches!(
                    err.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// Maps a unique violation on insert/update to a Conflict with the given message.
pub fn unique_or_db(e: rusqlite::Error, message: &str) -> CoreError {
    if is_unique_violation(&e) {
        CoreError::conflict(message)
    } else {
        CoreError::Db(e)
    }
}
