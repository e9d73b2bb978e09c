//! Transaction configuration.
//!
//! Load order: `.converge/config.toml` → environment variables → defaults.
//! The engine receives the resulting struct explicitly at construction and
//! never reads process-wide state itself.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime options recognized by a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Comma-separated tag filter. When non-empty, a resource is evaluated
    /// only if it carries at least one listed tag (its kind counts).
    pub tags: String,
    /// Bypass tag filtering entirely.
    pub ignoretags: bool,
    /// Bypass schedule filtering entirely.
    pub ignoreschedules: bool,
    /// Log the debug representation of caught errors.
    pub trace: bool,
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl TransactionConfig {
    /// Load config from `.converge/config.toml` under the given root, with
    /// env var overrides. Falls back to defaults if no config file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(".converge").join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        env_override("CONVERGE_TAGS", &mut config.tags);
        env_override("CONVERGE_IGNORETAGS", &mut config.ignoretags);
        env_override("CONVERGE_IGNORESCHEDULES", &mut config.ignoreschedules);
        env_override("CONVERGE_TRACE", &mut config.trace);

        Ok(config)
    }

    /// The configured tags, split and trimmed. Empty means no filtering.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}
