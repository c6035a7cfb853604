use crate::data::{PromptSource, RegistryError, UnitKey};
use std::fs;
use std::path::PathBuf;

/// Builds an implementation prompt from a flow's spec file
#[derive(Debug, Clone)]
pub struct SpecFilePromptSource {
    root: PathBuf,
}

impl SpecFilePromptSource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl PromptSource for SpecFilePromptSource {
    fn build(&self, unit: &UnitKey) -> Result<String, RegistryError> {
        let spec_path = unit.spec_path();
        let full_path = self.root.join(&spec_path);
        let spec = fs::read_to_string(&full_path).map_err(|e| RegistryError::Read {
            path: full_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let domain_file = format!("specs/domains/{}/domain.yaml", unit.domain_id);
        let mut prompt = String::new();
        prompt.push_str(&format!("# Implement Flow: {}\n", unit.flow_id));
        prompt.push_str(&format!("Domain: {}\n\n", unit.domain_id));
        prompt.push_str("## Spec Files\n");
        prompt.push_str("Read these specification files for context:\n");
        prompt.push_str(&format!("- `{}`\n", domain_file));
        prompt.push_str(&format!("- `{}`\n\n", spec_path));
        prompt.push_str("## Flow Specification\n```yaml\n");
        prompt.push_str(spec.trim_end());
        prompt.push_str("\n```\n\n");
        prompt.push_str("## Instructions\n");
        prompt.push_str("Implement this flow so that the code matches the specification. ");
        prompt.push_str("List every file you create or modify.\n");

        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_spec() {
        let dir = tempfile::tempdir().unwrap();
        let key = UnitKey::new("users", "signup");
        let spec = dir.path().join(key.spec_path());
        fs::create_dir_all(spec.parent().unwrap()).unwrap();
        fs::write(&spec, "flow:\n  id: signup\n").unwrap();

        let prompt = SpecFilePromptSource::new(Some(dir.path().to_path_buf()))
            .build(&key)
            .unwrap();
        assert!(prompt.starts_with("# Implement Flow: signup\n"));
        assert!(prompt.contains("specs/domains/users/flows/signup.yaml"));
        assert!(prompt.contains("flow:\n  id: signup\n```"));
    }

    #[test]
    fn test_missing_spec_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpecFilePromptSource::new(Some(dir.path().to_path_buf()))
            .build(&UnitKey::new("users", "ghost"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
    }
}
