use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn default_filter(level: &str, verbose: bool) -> EnvFilter {
    let directive = if verbose {
        "meal_tracker=debug,info".to_string()
    } else {
        format!("meal_tracker={}", level)
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// 依配置初始化日誌；`RUST_LOG` 優先於配置檔
pub fn init_logger(config: &LoggingConfig, verbose: bool) {
    let filter = default_filter(config.level(), verbose);

    if config.json() {
        // JSON 格式方便集中式日誌收集
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .json(),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice_does_not_panic() {
        let config = LoggingConfig::default();
        init_logger(&config, false);
        init_logger(&config, true);
    }
}
