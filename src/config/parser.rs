use crate::config::types::{ApiConfig, Config};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable that overrides `output.database-path`
pub const DATABASE_PATH_ENV: &str = "DATABASE_PATH";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied before validation, so a database path
/// supplied only through `DATABASE_PATH` is accepted.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate(&config)?;

    Ok(config)
}

/// Applies environment overrides using the given lookup function
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|p| !p.is_empty()) {
        tracing::debug!("Database path taken from {}", DATABASE_PATH_ENV);
        config.output.database_path = path;
    }
}

/// Resolves the API token from the config file or the process environment
pub fn resolve_token(api: &ApiConfig) -> Result<String, ConfigError> {
    resolve_token_with(api, |key| std::env::var(key).ok())
}

/// Resolves the API token using the given lookup function
///
/// An explicit `api.token` wins over the environment. A missing or blank
/// token is fatal.
pub fn resolve_token_with<F>(api: &ApiConfig, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    api.token
        .clone()
        .or_else(|| lookup(&api.token_env))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential(api.token_env.clone()))
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is recorded with every crawl run so runs can be matched to the
/// configuration that produced them.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
