use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationAction {
    /// Take the current content as the new synchronization point
    Accept,
    /// Queue a fresh implementation run for the unit
    #[serde(rename = "reimpl")]
    Reimplement,
    /// Hide the drift for the rest of the session
    Ignore,
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconciliationAction::Accept => write!(f, "accept"),
            ReconciliationAction::Reimplement => write!(f, "reimplement"),
            ReconciliationAction::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for ReconciliationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(ReconciliationAction::Accept),
            "reimplement" | "reimpl" => Ok(ReconciliationAction::Reimplement),
            "ignore" => Ok(ReconciliationAction::Ignore),
            other => Err(format!(
                "unknown action '{}' (expected accept, reimplement or ignore)",
                other
            )),
        }
    }
}

/// One resolved drift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEntry {
    pub flow_key: String,
    pub action: ReconciliationAction,
    pub previous_hash: String,
    pub new_hash: String,
    pub resolved_at: String,
}

/// A batch of resolutions written once to the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub id: String,
    pub timestamp: String,
    pub entries: Vec<ReconciliationEntry>,
    pub sync_score_before: u32,
    pub sync_score_after: u32,
}
