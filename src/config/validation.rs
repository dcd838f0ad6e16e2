use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig};
use crate::ConfigError;
use url::Url;

/// GitHub's hourly GraphQL quota; a floor at or above it would never clear
const MAX_SAFETY_FLOOR: u32 = 5000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    // GitHub search caps `first` at 100
    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.target_count < 1 {
        return Err(ConfigError::Validation(
            "target_count must be >= 1".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.queries.is_empty() {
        return Err(ConfigError::Validation(
            "at least one search query is required".to_string(),
        ));
    }

    if let Some(blank) = config.queries.iter().position(|q| q.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "search query #{} is empty",
            blank + 1
        )));
    }

    Ok(())
}

/// Validates API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let endpoint = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.token_env.is_empty() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.safety_floor >= MAX_SAFETY_FLOOR {
        return Err(ConfigError::Validation(format!(
            "safety_floor must be below {}, got {}",
            MAX_SAFETY_FLOOR, config.safety_floor
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty (set output.database-path or DATABASE_PATH)"
                .to_string(),
        ));
    }

    if config.pool_size < 1 {
        return Err(ConfigError::Validation(
            "pool_size must be >= 1".to_string(),
        ));
    }

    if config.top_n < 1 {
        return Err(ConfigError::Validation("top_n must be >= 1".to_string()));
    }

    Ok(())
}
