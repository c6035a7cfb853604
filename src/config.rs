//! Project settings
//!
//! Read from `.ddd/settings.yaml` under the project root. Every field has a
//! default, so a missing file or a partial file is fine. Two environment
//! variables override the commands after the file is read.

use crate::data::DriftPrecedence;
use crate::mapping_store::STATE_DIR;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const SETTINGS_FILE: &str = "settings.yaml";
pub const IMPLEMENT_COMMAND_ENV: &str = "FLOWSYNC_IMPLEMENT_COMMAND";
pub const TEST_COMMAND_ENV: &str = "FLOWSYNC_TEST_COMMAND";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// External implementation command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Run the test command after every successful implementation run
    pub run_tests_after: bool,
}

impl Default for ImplementSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            run_tests_after: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingSettings {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for TestingSettings {
    fn default() -> Self {
        Self {
            command: "npm".to_string(),
            args: vec!["test".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    pub precedence: DriftPrecedence,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub implement: ImplementSettings,
    pub testing: TestingSettings,
    pub reconciliation: ReconciliationSettings,
}

impl Settings {
    pub fn path(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR).join(SETTINGS_FILE)
    }

    /// Load settings for a project and apply environment overrides
    pub fn load(project_root: &Path) -> Result<Self, SettingsError> {
        let mut settings = Self::from_file(&Self::path(project_root))?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the commands with non-empty values from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup(IMPLEMENT_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
            self.implement.command = command;
        }
        if let Some(command) = lookup(TEST_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
            self.testing.command = command;
        }
    }
}
