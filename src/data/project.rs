use std::fmt;
use thiserror::Error;

/// Identifies a flow within a project as `<domain>/<flow>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    pub domain_id: String,
    pub flow_id: String,
}

impl UnitKey {
    pub fn new(domain_id: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            flow_id: flow_id.into(),
        }
    }

    /// Parses `"domain/flow"`. Both parts must be non-empty.
    pub fn parse(key: &str) -> Option<Self> {
        let (domain, flow) = key.split_once('/')?;
        if domain.is_empty() || flow.is_empty() || flow.contains('/') {
            return None;
        }
        Some(Self::new(domain, flow))
    }

    /// Conventional location of the flow specification
    pub fn spec_path(&self) -> String {
        format!("specs/domains/{}/flows/{}.yaml", self.domain_id, self.flow_id)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.domain_id, self.flow_id)
    }
}

/// A flow known to the project, whether or not it was implemented yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectUnit {
    pub key: UnitKey,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read project definition {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid project definition {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Trait for enumerating every logical unit of the current project
pub trait UnitEnumerator: Send + Sync {
    fn units(&self) -> Result<Vec<ProjectUnit>, RegistryError>;
}

/// Trait for producing the instruction text handed to the implementation
/// command. The text is opaque to this crate.
pub trait PromptSource: Send + Sync {
    fn build(&self, unit: &UnitKey) -> Result<String, RegistryError>;
}
