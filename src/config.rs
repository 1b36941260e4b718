//! Optional `runbook.toml` defaults, layered under CLI flags.

use crate::runner::{AskMode, RunOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parsed `runbook.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunbookToml {
    /// Baseline run options a document directory carries with it
    #[serde(default)]
    pub defaults: DefaultsSection,
}

/// The `[defaults]` section. CLI flags override every field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Prompting level
    #[serde(default)]
    pub ask: AskMode,
    /// Automatic retries per step
    #[serde(default)]
    pub retry: u32,
    /// Seconds before each automatic retry
    #[serde(default = "default_retry_pause")]
    pub retry_pause: f64,
    /// Seconds between steps
    #[serde(default)]
    pub pause: f64,
    /// Let the system environment override declared values
    #[serde(default)]
    pub inherit_env: bool,
}

fn default_retry_pause() -> f64 {
    1.0
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            ask: AskMode::default(),
            retry: 0,
            retry_pause: default_retry_pause(),
            pause: 0.0,
            inherit_env: false,
        }
    }
}

impl DefaultsSection {
    /// Build run options from these defaults, letting explicitly given CLI
    /// values win. `inherit_env` is a presence flag, so either side can
    /// turn it on.
    pub fn run_options(
        &self,
        ask: Option<AskMode>,
        retry: Option<u32>,
        retry_pause: Option<f64>,
        pause: Option<f64>,
        inherit_env: bool,
    ) -> RunOptions {
        RunOptions {
            ask: ask.unwrap_or(self.ask),
            retry: retry.unwrap_or(self.retry),
            retry_pause: retry_pause.unwrap_or(self.retry_pause),
            pause: pause.unwrap_or(self.pause),
            inherit_env: inherit_env || self.inherit_env,
            ..RunOptions::default()
        }
    }
}

impl RunbookToml {
    /// Load a specific config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse runbook.toml")
    }

    /// Look for `runbook.toml` next to the document, then in the current
    /// directory. An absent file means defaults.
    pub fn load_or_default(document: &Path) -> Result<Self> {
        let mut candidates = Vec::new();
        if let Some(dir) = document.parent() {
            candidates.push(dir.join("runbook.toml"));
        }
        candidates.push(PathBuf::from("runbook.toml"));
        for path in candidates {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = RunbookToml::load_or_default(&dir.path().join("doc.md")).unwrap();
        assert_eq!(config.defaults.retry, 0);
        assert_eq!(config.defaults.ask, AskMode::Never);
        assert_eq!(config.defaults.retry_pause, 1.0);
    }

    #[test]
    fn test_load_or_default_reads_document_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("runbook.toml"),
            "[defaults]\nask = \"always\"\nretry = 3\ninherit_env = true\n",
        )
        .unwrap();
        let config = RunbookToml::load_or_default(&dir.path().join("doc.md")).unwrap();
        assert_eq!(config.defaults.ask, AskMode::Always);
        assert_eq!(config.defaults.retry, 3);
        assert!(config.defaults.inherit_env);
        // Unset keys keep their defaults
        assert_eq!(config.defaults.retry_pause, 1.0);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("runbook.toml"), "[defaults\nretry = x").unwrap();
        assert!(RunbookToml::load_or_default(&dir.path().join("doc.md")).is_err());
    }

    #[test]
    fn test_cli_values_override_file_defaults() {
        let defaults = DefaultsSection {
            ask: AskMode::OnFailure,
            retry: 5,
            retry_pause: 2.0,
            pause: 1.0,
            inherit_env: false,
        };
        let options = defaults.run_options(Some(AskMode::Never), None, Some(0.0), None, true);
        assert_eq!(options.ask, AskMode::Never);
        assert_eq!(options.retry, 5);
        assert_eq!(options.retry_pause, 0.0);
        assert_eq!(options.pause, 1.0);
        assert!(options.inherit_env);
    }

    #[test]
    fn test_file_inherit_env_survives_cli_false() {
        let defaults = DefaultsSection {
            inherit_env: true,
            ..DefaultsSection::default()
        };
        let options = defaults.run_options(None, None, None, None, false);
        assert!(options.inherit_env);
    }
}
