use super::{types::Config, ConfigError};
use crate::distributor::MAX_SECOND_MS;

/// Validate configuration
/// Currently validates:
/// - Database path is not empty
/// - Distributor second length is within 1..=MAX_SECOND_MS
/// - History limit, when set, is positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "database.path cannot be empty".to_string(),
        ));
    }

    let second_ms = config.distributor.second_ms;
    if second_ms == 0 || second_ms > MAX_SECOND_MS {
        return Err(ConfigError::ValidationError(format!(
            "distributor.second_ms must be between 1 and {}",
            MAX_SECOND_MS
        )));
    }

    if matches!(config.distributor.history_limit, Some(limit) if limit <= 0) {
        return Err(ConfigError::ValidationError(
            "distributor.history_limit must be greater than 0".to_string(),
        ));
    }

    Ok(())
}
