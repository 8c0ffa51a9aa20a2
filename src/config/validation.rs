use crate::config::types::{
    ApiConfig, CategoryEntry, Config, CrawlerConfig, RateConfig, StorageConfig, SupervisorConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_crawler_config(&config.crawler)?;
    validate_rate_config(&config.rate)?;
    validate_supervisor_config(&config.supervisor)?;
    validate_storage_config(&config.storage)?;
    validate_categories(&config.categories)?;
    Ok(())
}

/// Validates source API endpoints
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must be http or https, got '{}'",
            url.scheme()
        )));
    }

    for (name, template, placeholders) in [
        ("listing-path", &config.listing_path, &["{page}"][..]),
        ("detail-path", &config.detail_path, &["{slug}"][..]),
        ("sub-record-path", &config.sub_record_path, &["{parent}", "{sub}"][..]),
    ] {
        if !template.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "{} must start with '/', got '{}'",
                name, template
            )));
        }
        for placeholder in placeholders {
            if !template.contains(placeholder) {
                return Err(ConfigError::Validation(format!(
                    "{} must contain the {} placeholder",
                    name, placeholder
                )));
            }
        }
    }

    if config.request_timeout == 0 || config.request_timeout > 120 {
        return Err(ConfigError::Validation(format!(
            "request-timeout must be between 1 and 120 seconds, got {}",
            config.request_timeout
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    Ok(())
}

/// Validates pipeline configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > 200 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 1 and 200, got {}",
            config.batch_size
        )));
    }

    if config.sub_record_batch_size < 1 {
        return Err(ConfigError::Validation(
            "sub-record-batch-size must be >= 1".to_string(),
        ));
    }

    if config.sub_record_concurrency < 1 || config.sub_record_concurrency > 16 {
        return Err(ConfigError::Validation(format!(
            "sub-record-concurrency must be between 1 and 16, got {}",
            config.sub_record_concurrency
        )));
    }

    if config.max_empty_pages < 1 {
        return Err(ConfigError::Validation(
            "max-empty-pages must be >= 1".to_string(),
        ));
    }

    if config.page_attempts < 1 {
        return Err(ConfigError::Validation(
            "page-attempts must be >= 1".to_string(),
        ));
    }

    if config.queue_limit < config.batch_size {
        return Err(ConfigError::Validation(format!(
            "queue-limit ({}) must be at least batch-size ({})",
            config.queue_limit, config.batch_size
        )));
    }

    if !(0.1..=1.0).contains(&config.detail_delay_factor) {
        return Err(ConfigError::Validation(format!(
            "detail-delay-factor must be between 0.1 and 1.0, got {}",
            config.detail_delay_factor
        )));
    }

    Ok(())
}

/// Validates rate adaptation thresholds
fn validate_rate_config(config: &RateConfig) -> Result<(), ConfigError> {
    if config.base_delay < 100 {
        return Err(ConfigError::Validation(format!(
            "base-delay must be >= 100ms, got {}ms",
            config.base_delay
        )));
    }

    if config.max_delay < 500 || config.max_delay < config.base_delay {
        return Err(ConfigError::Validation(format!(
            "max-delay must be >= 500ms and >= base-delay, got {}ms",
            config.max_delay
        )));
    }

    if config.slow_threshold >= config.very_slow_threshold {
        return Err(ConfigError::Validation(format!(
            "slow-threshold ({}ms) must be below very-slow-threshold ({}ms)",
            config.slow_threshold, config.very_slow_threshold
        )));
    }

    Ok(())
}

/// Validates worker lifecycle configuration
fn validate_supervisor_config(config: &SupervisorConfig) -> Result<(), ConfigError> {
    if config.restart_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "restart-multiplier must be >= 1.0, got {}",
            config.restart_multiplier
        )));
    }

    if config.max_restart_delay < config.restart_base_delay {
        return Err(ConfigError::Validation(format!(
            "max-restart-delay ({}s) must be >= restart-base-delay ({}s)",
            config.max_restart_delay, config.restart_base_delay
        )));
    }

    if config.health_interval == 0 {
        return Err(ConfigError::Validation(
            "health-interval must be >= 1 second".to_string(),
        ));
    }

    if config.worker_stack_size == 0 {
        return Err(ConfigError::Validation(
            "worker-stack-size must be >= 1 MiB".to_string(),
        ));
    }

    Ok(())
}

/// Validates persistence configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.cache_path.is_empty() {
        return Err(ConfigError::Validation(
            "cache-path cannot be empty".to_string(),
        ));
    }

    if config.progress_ttl_days == 0 || config.error_ttl_days == 0 || config.stats_ttl_days == 0 {
        return Err(ConfigError::Validation(
            "cache expiries must be at least one day".to_string(),
        ));
    }

    Ok(())
}

/// Validates category entries
fn validate_categories(categories: &[CategoryEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in categories {
        validate_category_name(&entry.name)?;

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Category '{}' is listed more than once",
                entry.name
            )));
        }
    }

    Ok(())
}

/// Category names become URL path segments and cache key parts
fn validate_category_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "Category name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Category '{}' may only contain ASCII letters, digits, '-' and '_'",
            name
        )));
    }

    Ok(())
}
