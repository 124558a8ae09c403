use thiserror::Error;

#[derive(Error, Debug)]
pub enum MealError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Backend request failed with status {status}: {message}")]
    ApiError {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error on {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFoundError { entity: String, id: String },

    #[error("{entity} '{name}' already exists")]
    DuplicateError { entity: String, name: String },

    #[error("Import error: {message}")]
    ImportError { message: String },
}

pub type Result<T> = std::result::Result<T, MealError>;

/// 面向使用者的錯誤分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Authentication,
    Permission,
    NotFound,
    Validation,
    Conflict,
    RateLimit,
    Server,
    Configuration,
    Storage,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 後端 (Postgres / PostgREST) 錯誤代碼對照表
const BACKEND_CODE_TABLE: &[(&str, ErrorCategory)] = &[
    ("23505", ErrorCategory::Conflict),
    ("23503", ErrorCategory::Validation),
    ("23502", ErrorCategory::Validation),
    ("23514", ErrorCategory::Validation),
    ("22P02", ErrorCategory::Validation),
    ("22007", ErrorCategory::Validation),
    ("42501", ErrorCategory::Permission),
    ("42P01", ErrorCategory::Configuration),
    ("PGRST116", ErrorCategory::NotFound),
    ("PGRST204", ErrorCategory::Validation),
    ("PGRST301", ErrorCategory::Authentication),
    ("PGRST302", ErrorCategory::Authentication),
];

/// 依後端錯誤代碼分類，未知代碼返回 None
pub fn category_for_code(code: &str) -> Option<ErrorCategory> {
    BACKEND_CODE_TABLE
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, category)| *category)
}

/// 依 HTTP 狀態碼分類
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        400 | 422 => ErrorCategory::Validation,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 | 406 => ErrorCategory::NotFound,
        408 => ErrorCategory::Network,
        409 => ErrorCategory::Conflict,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::Server,
        _ => ErrorCategory::Unknown,
    }
}

impl ErrorCategory {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ErrorCategory::Validation | ErrorCategory::NotFound | ErrorCategory::Conflict => {
                ErrorSeverity::Low
            }
            ErrorCategory::Network | ErrorCategory::RateLimit | ErrorCategory::Server => {
                ErrorSeverity::Medium
            }
            ErrorCategory::Authentication
            | ErrorCategory::Permission
            | ErrorCategory::Storage
            | ErrorCategory::Unknown => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// 只有暫時性錯誤值得重試
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::RateLimit | ErrorCategory::Server
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Unable to reach the server. Check your connection.",
            ErrorCategory::Authentication => "Your session has expired. Please sign in again.",
            ErrorCategory::Permission => "You don't have permission to do that.",
            ErrorCategory::NotFound => "The requested item could not be found.",
            ErrorCategory::Validation => "Some of the data you entered is invalid.",
            ErrorCategory::Conflict => "An item with the same details already exists.",
            ErrorCategory::RateLimit => "Too many requests. Please slow down.",
            ErrorCategory::Server => "The server ran into a problem. Please try again later.",
            ErrorCategory::Configuration => "The application is not configured correctly.",
            ErrorCategory::Storage => "Reading or writing a local file failed.",
            ErrorCategory::Unknown => "Something went wrong.",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Retry once your network connection is back",
            ErrorCategory::Authentication => "Refresh the access token and retry",
            ErrorCategory::Permission => "Check that the record belongs to the current user",
            ErrorCategory::NotFound => "Reload the list; the item may have been deleted",
            ErrorCategory::Validation => "Fix the highlighted field and submit again",
            ErrorCategory::Conflict => "Choose a different name or edit the existing item",
            ErrorCategory::RateLimit => "Wait a moment before retrying",
            ErrorCategory::Server => "Retry later; the backend may be temporarily unavailable",
            ErrorCategory::Configuration => "Check the backend url, keys and config values",
            ErrorCategory::Storage => "Check the file path and its permissions",
            ErrorCategory::Unknown => "Retry, and report the problem if it persists",
        }
    }
}

impl MealError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MealError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        MealError::NotFoundError {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// 錯誤分類：先查後端代碼，再看 HTTP 狀態，最後看錯誤類型
    pub fn category(&self) -> ErrorCategory {
        match self {
            MealError::HttpError(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else if let Some(status) = e.status() {
                    category_for_status(status.as_u16())
                } else if e.is_decode() {
                    ErrorCategory::Server
                } else {
                    ErrorCategory::Network
                }
            }
            MealError::ApiError { status, code, .. } => code
                .as_deref()
                .and_then(category_for_code)
                .unwrap_or_else(|| category_for_status(*status)),
            MealError::IoError(_) | MealError::CsvError(_) => ErrorCategory::Storage,
            MealError::SerializationError(_) | MealError::ImportError { .. } => {
                ErrorCategory::Validation
            }
            MealError::ConfigError { .. }
            | MealError::ConfigValidationError { .. }
            | MealError::InvalidConfigValueError { .. }
            | MealError::MissingConfigError { .. } => ErrorCategory::Configuration,
            MealError::ValidationError { .. } => ErrorCategory::Validation,
            MealError::NotFoundError { .. } => ErrorCategory::NotFound,
            MealError::DuplicateError { .. } => ErrorCategory::Conflict,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            MealError::ValidationError { field, message } => {
                format!("{} ({}: {})", ErrorCategory::Validation.user_message(), field, message)
            }
            MealError::NotFoundError { entity, .. } => {
                format!("The requested {} could not be found.", entity)
            }
            MealError::DuplicateError { entity, name } => {
                format!("A {} named '{}' already exists.", entity, name)
            }
            MealError::ImportError { message } => {
                format!("The import file could not be used: {}", message)
            }
            other => other.category().user_message().to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            MealError::ApiError {
                hint: Some(hint), ..
            } => hint.clone(),
            other => other.category().recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, code: Option<&str>) -> MealError {
        MealError::ApiError {
            status,
            code: code.map(str::to_string),
            message: "boom".to_string(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn test_backend_code_takes_precedence_over_status() {
        assert_eq!(api_error(409, Some("23505")).category(), ErrorCategory::Conflict);
        assert_eq!(api_error(400, Some("42501")).category(), ErrorCategory::Permission);
        assert_eq!(api_error(406, Some("PGRST116")).category(), ErrorCategory::NotFound);
        assert_eq!(
            api_error(401, Some("PGRST301")).category(),
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn test_unknown_code_falls_back_to_status() {
        assert_eq!(api_error(503, Some("XX000")).category(), ErrorCategory::Server);
        assert_eq!(api_error(429, None).category(), ErrorCategory::RateLimit);
        assert_eq!(api_error(403, None).category(), ErrorCategory::Permission);
        assert_eq!(api_error(418, None).category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_retryable_categories() {
        assert!(api_error(500, None).is_retryable());
        assert!(api_error(429, None).is_retryable());
        assert!(!api_error(400, None).is_retryable());
        assert!(!api_error(409, Some("23505")).is_retryable());
        assert!(!MealError::validation("name", "required").is_retryable());
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            MealError::validation("name", "required").severity(),
            ErrorSeverity::Low
        );
        assert_eq!(api_error(502, None).severity(), ErrorSeverity::Medium);
        assert_eq!(api_error(401, None).severity(), ErrorSeverity::High);
        assert_eq!(
            MealError::MissingConfigError {
                field: "backend.url".to_string()
            }
            .severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_user_friendly_messages() {
        let err = MealError::validation("name", "cannot be empty");
        assert!(err.user_friendly_message().contains("name: cannot be empty"));

        let err = MealError::not_found("dish", "42");
        assert_eq!(err.user_friendly_message(), "The requested dish could not be found.");

        let err = MealError::ApiError {
            status: 400,
            code: None,
            message: "bad".to_string(),
            details: None,
            hint: Some("Use a date column".to_string()),
        };
        assert_eq!(err.recovery_suggestion(), "Use a date column");
    }
}
