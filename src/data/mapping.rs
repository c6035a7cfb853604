use super::TestSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a record was the first one for its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    New,
    Update,
}

/// Correspondence between one flow and the files implemented from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMapping {
    /// Project-relative path of the flow specification
    #[serde(rename = "spec")]
    pub spec_path: String,
    /// Hash of the spec at the last synchronization
    pub spec_hash: String,
    /// Implementation files attributed to the flow, in recording order
    #[serde(default)]
    pub files: Vec<String>,
    /// Hash per file at the last synchronization. Files that could not be
    /// hashed when recorded are absent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_hashes: BTreeMap<String, String>,
    /// RFC 3339 timestamp
    pub implemented_at: String,
    pub mode: MappingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestSummary>,
}

impl FlowMapping {
    /// Recorded file hashes in the order the files were attributed
    pub fn tracked_files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().filter_map(|f| {
            self.file_hashes
                .get(f)
                .map(|h| (f.as_str(), h.as_str()))
        })
    }
}
