use std::collections::HashSet;

use url::Url;

use crate::config::{CheckConfig, Config};
use crate::environments::Environment;
use crate::error::ConfigError;
use crate::monitoring::CheckKind;

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn to_result(&self) -> Result<(), ConfigError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }
}

/// Validate HTTP/HTTPS base URL
pub fn validate_http_endpoint(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            // If it fails to parse, check if it's missing a scheme
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate SLA threshold
pub fn validate_threshold(threshold_seconds: u64) -> ValidationResult {
    if threshold_seconds == 0 {
        return ValidationResult::err("Threshold must be at least 1 second");
    }

    if threshold_seconds > 86400 {
        return ValidationResult::err("Threshold too long (max 24 hours)");
    }

    ValidationResult::ok()
}

/// Granularity must leave at least one second between polls
pub fn validate_granularity(granularity: u32, threshold_seconds: u64) -> ValidationResult {
    if granularity == 0 {
        return ValidationResult::err("Granularity must be at least 1");
    }

    if u64::from(granularity) > threshold_seconds {
        return ValidationResult::err(format!(
            "Granularity {granularity} exceeds the {threshold_seconds}s threshold"
        ));
    }

    ValidationResult::ok()
}

/// Validate one check definition
pub fn validate_check(check: &CheckConfig, threshold_seconds: u64) -> ValidationResult {
    if check.alias.trim().is_empty() {
        return ValidationResult::err("Check alias cannot be empty");
    }

    let granularity = validate_granularity(check.granularity, threshold_seconds);
    if !granularity.is_valid {
        return ValidationResult::err(format!(
            "Check '{}': {}",
            check.alias,
            granularity.error.unwrap_or_default()
        ));
    }

    if check.content_types.is_empty() {
        return ValidationResult::err(format!("Check '{}' has no content types", check.alias));
    }

    if check.feed.is_some() && check.kind != CheckKind::Notifications {
        return ValidationResult::err(format!(
            "Check '{}' sets a feed but is not a notifications check",
            check.alias
        ));
    }

    if check.kind != CheckKind::Storage && check.endpoint.trim().is_empty() {
        return ValidationResult::err(format!("Check '{}' has no endpoint", check.alias));
    }

    ValidationResult::ok()
}

/// Validate one environment definition
pub fn validate_environment(environment: &Environment) -> ValidationResult {
    if environment.name.trim().is_empty() {
        return ValidationResult::err("Environment name cannot be empty");
    }

    let read = validate_http_endpoint(&environment.read_url);
    if !read.is_valid {
        return ValidationResult::err(format!(
            "Environment '{}' read URL: {}",
            environment.name,
            read.error.unwrap_or_default()
        ));
    }

    if let Some(storage_url) = &environment.storage_url {
        let storage = validate_http_endpoint(storage_url);
        if !storage.is_valid {
            return ValidationResult::err(format!(
                "Environment '{}' storage URL: {}",
                environment.name,
                storage.error.unwrap_or_default()
            ));
        }
    }

    ValidationResult::ok()
}

/// Validate a whole configuration before anything is started
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_threshold(config.threshold_seconds).to_result()?;

    let mut aliases = HashSet::new();
    for check in &config.checks {
        validate_check(check, config.threshold_seconds).to_result()?;
        if !aliases.insert(check.alias.as_str()) {
            return Err(ConfigError::Invalid(format!("Duplicate check alias '{}'", check.alias)));
        }
    }

    let mut names = HashSet::new();
    for environment in &config.environments {
        validate_environment(environment).to_result()?;
        if !names.insert(environment.name.as_str()) {
            return Err(ConfigError::Invalid(format!("Duplicate environment '{}'", environment.name)));
        }
    }

    if config.feeds.poll_interval_seconds == 0 {
        return Err(ConfigError::Invalid("Feed poll interval must be at least 1 second".into()));
    }

    Ok(())
}
