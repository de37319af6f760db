//! Default environment for a client when the caller names none.
//!
//! A convention for callers only; the store never enforces it.

use crate::config::ClassificationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientClassifier {
    primary_clients: Vec<String>,
    prerelease_clients: Vec<String>,
    production_env: String,
    staging_env: String,
    default_env: String,
}

impl ClientClassifier {
    pub fn from_config(config: &ClassificationConfig) -> Self {
        Self {
            primary_clients: config.primary_clients.clone(),
            prerelease_clients: config.prerelease_clients.clone(),
            production_env: config.production_environment.clone(),
            staging_env: config.staging_environment.clone(),
            default_env: config.default_environment.clone(),
        }
    }

    /// `master` → production, `staging` → staging, anything else →
    /// development (with the default configuration).
    pub fn environment_for(&self, client_id: &str) -> &str {
        if self.primary_clients.iter().any(|c| c == client_id) {
            &self.production_env
        } else if self.prerelease_clients.iter().any(|c| c == client_id) {
            &self.staging_env
        } else {
            &self.default_env
        }
    }
}

impl Default for ClientClassifier {
    fn default() -> Self {
        Self::from_config(&ClassificationConfig::default())
    }
}
