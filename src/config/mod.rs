use crate::utils::error::{MealError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_STALE_TIME_SECONDS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub retry: Option<RetryConfig>,
    pub cache: Option<CacheConfig>,
    pub transfer: Option<TransferConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub user_id: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: Option<bool>,
    pub stale_time_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    pub page_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn json(&self) -> bool {
        self.json.unwrap_or(false)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy::new(
            self.max_attempts.unwrap_or(defaults.max_attempts),
            self.base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            self.max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        )
    }
}

fn is_unresolved(value: &str) -> bool {
    ENV_VAR_RE.is_match(value)
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MealError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| MealError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${MEAL_TRACKER_ANON_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("backend.url", &self.backend.url)?;
        validation::validate_non_empty_string("backend.user_id", &self.backend.user_id)?;

        if self.backend.anon_key.trim().is_empty() || is_unresolved(&self.backend.anon_key) {
            return Err(MealError::MissingConfigError {
                field: "backend.anon_key".to_string(),
            });
        }

        if let Some(token) = &self.backend.access_token {
            if is_unresolved(token) {
                return Err(MealError::MissingConfigError {
                    field: "backend.access_token".to_string(),
                });
            }
        }

        if let Some(timeout) = self.backend.timeout_seconds {
            validation::validate_range("backend.timeout_seconds", timeout, 1, 300)?;
        }

        if let Some(retry) = &self.retry {
            if let Some(attempts) = retry.max_attempts {
                validation::validate_range("retry.max_attempts", attempts, 1, 10)?;
            }
            if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
                if base > max {
                    return Err(MealError::InvalidConfigValueError {
                        field: "retry.base_delay_ms".to_string(),
                        value: base.to_string(),
                        reason: format!("Must not exceed retry.max_delay_ms ({})", max),
                    });
                }
            }
        }

        if let Some(transfer) = &self.transfer {
            if let Some(page_size) = transfer.page_size {
                validation::validate_positive_number("transfer.page_size", page_size, 1)?;
            }
            if let Some(batch_size) = transfer.batch_size {
                validation::validate_positive_number("transfer.batch_size", batch_size, 1)?;
            }
            if let Some(path) = &transfer.output_path {
                validation::validate_path("transfer.output_path", path)?;
            }
        }

        if let Some(logging) = &self.logging {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&logging.level()) {
                return Err(MealError::InvalidConfigValueError {
                    field: "logging.level".to_string(),
                    value: logging.level().to_string(),
                    reason: format!("Valid levels: {}", valid_levels.join(", ")),
                });
            }
        }

        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.backend.url.trim_end_matches('/')
    }

    pub fn user_id(&self) -> &str {
        &self.backend.user_id
    }

    /// Authorization 使用的 token；未登入時退回 anon key
    pub fn bearer_token(&self) -> &str {
        self.backend
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.backend.anon_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().policy()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.as_ref().and_then(|c| c.enabled).unwrap_or(true)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(
            self.cache
                .as_ref()
                .and_then(|c| c.stale_time_seconds)
                .unwrap_or(DEFAULT_STALE_TIME_SECONDS),
        )
    }

    pub fn page_size(&self) -> usize {
        self.transfer
            .as_ref()
            .and_then(|t| t.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn batch_size(&self) -> usize {
        self.transfer
            .as_ref()
            .and_then(|t| t.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn output_path(&self) -> &str {
        self.transfer
            .as_ref()
            .and_then(|t| t.output_path.as_deref())
            .unwrap_or("./export")
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[backend]
url = "https://demo.example.co/"
anon_key = "anon-123"
user_id = "user-1"

[transfer]
page_size = 250
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = AppConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.base_url(), "https://demo.example.co");
        assert_eq!(config.bearer_token(), "anon-123");
        assert_eq!(config.page_size(), 250);
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.stale_time(), Duration::from_secs(300));
        assert!(config.cache_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("MEAL_TRACKER_TEST_TOKEN", "token-xyz");

        let toml_content = r#"
[backend]
url = "https://demo.example.co"
anon_key = "anon"
access_token = "${MEAL_TRACKER_TEST_TOKEN}"
user_id = "user-1"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.bearer_token(), "token-xyz");

        std::env::remove_var("MEAL_TRACKER_TEST_TOKEN");
    }

    #[test]
    fn test_unresolved_key_fails_validation() {
        let toml_content = r#"
[backend]
url = "https://demo.example.co"
anon_key = "${MEAL_TRACKER_SURELY_UNSET_KEY}"
user_id = "user-1"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MealError::MissingConfigError { .. }));
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[backend]
url = "invalid-url"
anon_key = "anon"
user_id = "user-1"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let toml_content = r#"
[backend]
url = "https://demo.example.co"
anon_key = "anon"
user_id = "user-1"

[retry]
max_attempts = 3
base_delay_ms = 5000
max_delay_ms = 1000
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.user_id(), "user-1");
    }
}
