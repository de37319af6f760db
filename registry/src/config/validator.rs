use crate::config::error::{ConfigError, Result};
use crate::config::loader::AppConfig;

/// Validate an [`AppConfig`] after all layers are merged
///
/// Returns Ok(()) if validation passes, or a single
/// [`ConfigError::Validation`] listing every failure.
///
/// # Examples
///
/// ```
/// use branchport_registry::config::{AppConfig, validate_config};
///
/// validate_config(&AppConfig::default())?;
/// # Ok::<(), branchport_registry::config::ConfigError>(())
/// ```
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.environments.is_empty() {
        errors.push("at least one environment must be configured".to_string());
    }

    for (name, range) in &config.environments {
        if range.start > range.end {
            errors.push(format!(
                "environments.{name}: start {} is greater than end {}",
                range.start, range.end
            ));
        }
    }

    // The config crate lowercases table keys, so `[environments.Prod]` is
    // only reachable as `prod`
    for name in config.environments.keys() {
        if *name != name.to_lowercase() {
            errors.push(format!("environments.{name}: names must be lowercase"));
        }
    }

    let classification = &config.classification;
    for (field, target) in [
        ("production_environment", &classification.production_environment),
        ("staging_environment", &classification.staging_environment),
        ("default_environment", &classification.default_environment),
    ] {
        if config.environments.contains_key(target) {
            continue;
        }
        let lowered = target.to_lowercase();
        if lowered != *target && config.environments.contains_key(&lowered) {
            errors.push(format!(
                "classification.{field}: environment '{target}' is not configured \
                 (environment names are lowercased; use '{lowered}')"
            ));
        } else {
            errors.push(format!(
                "classification.{field}: environment '{target}' is not configured"
            ));
        }
    }

    let ranges: Vec<_> = config
        .environments
        .iter()
        .filter(|(_, range)| range.start <= range.end)
        .collect();
    for (i, (name, range)) in ranges.iter().enumerate() {
        for (other_name, other) in &ranges[i + 1..] {
            if range.overlaps(other) {
                errors.push(format!(
                    "environments.{name} ({}-{}) overlaps environments.{other_name} ({}-{})",
                    range.start, range.end, other.start, other.end
                ));
            }
        }
    }

    if config.retry.max_retries == 0 {
        errors.push("retry.max_retries must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_factor) {
        errors.push(format!(
            "retry.jitter_factor must be within 0.0-1.0, got {}",
            config.retry.jitter_factor
        ));
    }
    if config.lock.poll_interval_ms == 0 {
        errors.push("lock.poll_interval_ms must be at least 1".to_string());
    }
    if config.backup.retention == 0 {
        errors.push("backup.retention must be at least 1".to_string());
    }

    if errors.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "Configuration validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )))
}
