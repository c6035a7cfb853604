use crate::data::{ProjectUnit, RegistryError, UnitEnumerator, UnitKey};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const PROJECT_FILE: &str = "ddd-project.json";

#[derive(Debug, Default, Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    domains: Vec<DomainEntry>,
}

#[derive(Debug, Deserialize)]
struct DomainEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct DomainDocument {
    #[serde(default)]
    flows: Vec<FlowEntry>,
}

#[derive(Debug, Deserialize)]
struct FlowEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Directory id for a domain display name: lowercased, whitespace runs
/// replaced by `-`
pub fn domain_id(name: &str) -> String {
    whitespace_re()
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

/// File-based implementation of UnitEnumerator
/// Reads the domain list from `ddd-project.json` and each domain's flows from
/// `specs/domains/<id>/domain.yaml`
#[derive(Debug, Clone)]
pub struct FileProjectRegistry {
    root: PathBuf,
}

impl FileProjectRegistry {
    /// Creates a new FileProjectRegistry
    ///
    /// # Arguments
    /// * `root` - Optional project root (defaults to the current directory)
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    fn load_project(&self) -> Result<ProjectDocument, RegistryError> {
        let path = self.root.join(PROJECT_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No project definition; project is empty");
            return Ok(ProjectDocument::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| RegistryError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Flows of one domain. A missing or unreadable domain file means the
    /// domain has no flows yet.
    fn load_flows(&self, domain_id: &str) -> Vec<FlowEntry> {
        let path = domain_file(&self.root, domain_id);
        if !path.exists() {
            return Vec::new();
        }

        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                if content.trim().is_empty() {
                    Ok(DomainDocument::default())
                } else {
                    serde_yaml::from_str::<DomainDocument>(&content).map_err(|e| e.to_string())
                }
            });

        match parsed {
            Ok(doc) => doc.flows,
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Ignoring unreadable domain file");
                Vec::new()
            }
        }
    }
}

fn domain_file(root: &Path, domain_id: &str) -> PathBuf {
    root.join("specs")
        .join("domains")
        .join(domain_id)
        .join("domain.yaml")
}

impl UnitEnumerator for FileProjectRegistry {
    fn units(&self) -> Result<Vec<ProjectUnit>, RegistryError> {
        let project = self.load_project()?;
        let mut units = Vec::new();

        for domain in &project.domains {
            let id = domain_id(&domain.name);
            for flow in self.load_flows(&id) {
                let name = flow.name.unwrap_or_else(|| flow.id.clone());
                units.push(ProjectUnit {
                    key: UnitKey::new(id.clone(), flow.id),
                    name,
                });
            }
        }

        debug!(units = units.len(), domains = project.domains.len(), "Enumerated project units");
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_domain_id_normalizes_whitespace() {
        assert_eq!(domain_id("Order  Management"), "order-management");
        assert_eq!(domain_id("Users"), "users");
    }

    #[test]
    fn test_missing_project_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileProjectRegistry::new(Some(dir.path().to_path_buf()));
        assert!(registry.units().unwrap().is_empty());
    }

    #[test]
    fn test_enumerates_flows_per_domain() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            PROJECT_FILE,
            r#"{"name": "shop", "domains": [{"name": "Order Management"}, {"name": "Users", "description": "accounts"}, {"name": "Empty"}]}"#,
        );
        write(
            dir.path(),
            "specs/domains/order-management/domain.yaml",
            "name: Order Management\nflows:\n  - id: place-order\n    name: Place Order\n  - id: cancel-order\n",
        );
        write(
            dir.path(),
            "specs/domains/users/domain.yaml",
            "flows:\n  - id: signup\n    name: Sign Up\n",
        );

        let units = FileProjectRegistry::new(Some(dir.path().to_path_buf()))
            .units()
            .unwrap();
        let keys: Vec<String> = units.iter().map(|u| u.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "order-management/place-order",
                "order-management/cancel-order",
                "users/signup"
            ]
        );
        assert_eq!(units[0].name, "Place Order");
        assert_eq!(units[1].name, "cancel-order");
    }

    #[test]
    fn test_broken_domain_file_has_no_flows() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), PROJECT_FILE, r#"{"domains": [{"name": "Users"}]}"#);
        write(dir.path(), "specs/domains/users/domain.yaml", "flows: [unclosed");

        let units = FileProjectRegistry::new(Some(dir.path().to_path_buf()))
            .units()
            .unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_invalid_project_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), PROJECT_FILE, "{ not json");
        let err = FileProjectRegistry::new(Some(dir.path().to_path_buf()))
            .units()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }
}
