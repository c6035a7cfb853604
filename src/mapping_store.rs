//! Mapping store for flow-to-implementation correspondence
//!
//! Stores, per flow, the hash of its specification and of every
//! implementation file produced from it in `.ddd/mapping.yaml`. The in-memory
//! map is authoritative; every mutation replaces the entry first and then
//! writes the whole document.

use crate::content_hash::HashError;
use crate::data::{ContentProvider, FlowMapping, MappingMode, ProviderError, TestSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const STATE_DIR: &str = ".ddd";
const MAPPING_FILE: &str = "mapping.yaml";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to hash spec for {key}: {source}")]
    Hash {
        key: String,
        #[source]
        source: HashError,
    },

    #[error("failed to read mapping document: {0}")]
    Read(#[source] ProviderError),

    #[error("failed to parse mapping document: {0}")]
    Load(#[source] serde_yaml::Error),

    /// The in-memory state was updated but could not be written out
    #[error("failed to persist mapping document: {reason}")]
    Persist { reason: String },

    #[error("no mapping recorded for {0}")]
    UnknownUnit(String),
}

impl MappingError {
    /// True when only the write failed and the in-memory state is current
    pub fn is_persistence(&self) -> bool {
        matches!(self, MappingError::Persist { .. })
    }
}

/// On-disk shape of the mapping document
#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingDocument {
    #[serde(default)]
    flows: BTreeMap<String, FlowMapping>,
}

/// Persisted map of flow key -> correspondence record
pub struct MappingStore {
    provider: Arc<dyn ContentProvider>,
    flows: BTreeMap<String, FlowMapping>,
}

impl MappingStore {
    /// Path of the mapping document relative to the project root
    pub fn document_path() -> String {
        format!("{}/{}", STATE_DIR, MAPPING_FILE)
    }

    /// Load the mapping document through the provider, or start empty if
    /// none exists yet
    pub fn load(provider: Arc<dyn ContentProvider>) -> Result<Self, MappingError> {
        let path = Self::document_path();

        let flows = if provider.exists(&path) {
            let content = provider.read(&path).map_err(MappingError::Read)?;
            let doc: MappingDocument = if content.trim().is_empty() {
                MappingDocument::default()
            } else {
                serde_yaml::from_str(&content).map_err(MappingError::Load)?
            };
            debug!(flows = doc.flows.len(), "Loaded mapping document");
            doc.flows
        } else {
            BTreeMap::new()
        };

        Ok(Self { provider, flows })
    }

    /// Write the whole document
    pub fn save(&self) -> Result<(), MappingError> {
        let doc = MappingDocument {
            flows: self.flows.clone(),
        };
        let content = serde_yaml::to_string(&doc).map_err(|e| MappingError::Persist {
            reason: e.to_string(),
        })?;

        self.provider
            .write(&Self::document_path(), &content)
            .map_err(|e| {
                warn!(error = %e, "Mapping document write failed; keeping in-memory state");
                MappingError::Persist {
                    reason: e.to_string(),
                }
            })
    }

    /// Record a successful implementation of a flow
    ///
    /// The spec must be hashable; the implementation files are hashed on a
    /// best-effort basis and any file that cannot be hashed is left out of
    /// `file_hashes`. Replaces any previous record for the key.
    pub fn record(
        &mut self,
        key: &str,
        spec_path: &str,
        files: &[String],
    ) -> Result<(), MappingError> {
        let spec_hash = self
            .provider
            .hash(spec_path)
            .map_err(|source| MappingError::Hash {
                key: key.to_string(),
                source,
            })?;

        let mut ordered: Vec<String> = Vec::with_capacity(files.len());
        for file in files {
            if !ordered.contains(file) {
                ordered.push(file.clone());
            }
        }

        let mut file_hashes = BTreeMap::new();
        for file in &ordered {
            match self.provider.hash(file) {
                Ok(hash) => {
                    file_hashes.insert(file.clone(), hash);
                }
                Err(e) => {
                    debug!(
                        key,
                        file = %file,
                        error = %e,
                        "Skipping unhashable implementation file"
                    );
                }
            }
        }

        let mode = if self.flows.contains_key(key) {
            MappingMode::Update
        } else {
            MappingMode::New
        };

        self.flows.insert(
            key.to_string(),
            FlowMapping {
                spec_path: spec_path.to_string(),
                spec_hash,
                files: ordered,
                file_hashes,
                implemented_at: chrono::Utc::now().to_rfc3339(),
                mode,
                test_results: None,
            },
        );

        self.save()
    }

    pub fn get(&self, key: &str) -> Option<&FlowMapping> {
        self.flows.get(key)
    }

    pub fn all(&self) -> &BTreeMap<String, FlowMapping> {
        &self.flows
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flows.contains_key(key)
    }

    /// Replace the record for a key wholesale
    pub fn put(&mut self, key: &str, mapping: FlowMapping) -> Result<(), MappingError> {
        self.flows.insert(key.to_string(), mapping);
        self.save()
    }

    /// Mark a forward-drifted flow as synchronized with its current spec.
    /// `files` and `file_hashes` are left untouched.
    pub fn update_spec_hash(&mut self, key: &str, new_hash: &str) -> Result<(), MappingError> {
        let mapping = self
            .flows
            .get_mut(key)
            .ok_or_else(|| MappingError::UnknownUnit(key.to_string()))?;
        mapping.spec_hash = new_hash.to_string();
        self.save()
    }

    /// Take the current content of one implementation file as its new
    /// synchronization point
    pub fn update_file_hash(
        &mut self,
        key: &str,
        file: &str,
        new_hash: &str,
    ) -> Result<(), MappingError> {
        self.update_file_hashes(key, &[(file.to_string(), new_hash.to_string())])
    }

    /// Same as `update_file_hash` for several files, written once
    pub fn update_file_hashes(
        &mut self,
        key: &str,
        updates: &[(String, String)],
    ) -> Result<(), MappingError> {
        let mapping = self
            .flows
            .get_mut(key)
            .ok_or_else(|| MappingError::UnknownUnit(key.to_string()))?;
        for (file, new_hash) in updates {
            if !mapping.files.contains(file) {
                mapping.files.push(file.clone());
            }
            mapping.file_hashes.insert(file.clone(), new_hash.clone());
        }
        self.save()
    }

    pub fn attach_test_results(
        &mut self,
        key: &str,
        summary: TestSummary,
    ) -> Result<(), MappingError> {
        let mapping = self
            .flows
            .get_mut(key)
            .ok_or_else(|| MappingError::UnknownUnit(key.to_string()))?;
        mapping.test_results = Some(summary);
        self.save()
    }
}
