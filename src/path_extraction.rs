//! Finding the files an implementation run touched
//!
//! The implementation command reports its work as free text, so the default
//! strategy is a heuristic. Missed files only reduce reverse-drift coverage
//! for the flow; they never fail a run.

use regex::Regex;
use std::sync::OnceLock;

/// Strategy for turning run output into candidate project-relative paths
pub trait PathExtractor: Send + Sync {
    /// Candidate paths in order of first mention, without duplicates
    fn extract(&self, output: &str) -> Vec<String>;
}

/// Source file extensions worth tracking
const TRACKED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "py", "rs", "go", "java", "rb", "css", "scss", "html", "json",
    "yaml", "yml", "sql", "graphql", "proto", "md",
];

/// Paths under these prefixes are tracked elsewhere
const EXCLUDED_PREFIXES: &[&str] = &["specs/", ".ddd/"];

fn write_verb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:creat|modif|writ|wrote|updat|add|edit|generat)\w*\s+(?:to\s+)?[`"']?([^\s`"']+\.\w+)[`"']?"#)
            .expect("valid regex")
    })
}

fn bullet_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-+*>●]\s+`?([^\s`]+\.\w+)`?").expect("valid regex"))
}

/// Recognises paths in phrases like "Created src/foo.ts", bullet lists of
/// files, and absolute paths inside the project root.
#[derive(Debug, Clone)]
pub struct OutputPathExtractor {
    absolute_re: Option<Regex>,
    project_prefix: Option<String>,
}

impl OutputPathExtractor {
    /// # Arguments
    /// * `project_root` - Absolute project root, used to turn absolute paths
    ///   in the output back into project-relative ones
    pub fn new(project_root: Option<&str>) -> Self {
        let project_prefix = project_root
            .map(|root| root.trim_end_matches('/').to_string())
            .filter(|root| !root.is_empty());
        let absolute_re = project_prefix.as_ref().and_then(|root| {
            Regex::new(&format!(r#"{}/([^\s`"']+\.[A-Za-z]+)"#, regex::escape(root))).ok()
        });

        Self {
            absolute_re,
            project_prefix,
        }
    }

    fn candidate(&self, line: &str) -> Option<String> {
        if let Some(c) = write_verb_re().captures(line) {
            if let Some(m) = c.get(1) {
                let path = self.relativize(m.as_str());
                if has_tracked_extension(&path) {
                    return Some(path);
                }
            }
        }

        if let Some(c) = bullet_path_re().captures(line) {
            if let Some(m) = c.get(1) {
                let path = self.relativize(m.as_str());
                if has_tracked_extension(&path) {
                    return Some(path);
                }
            }
        }

        let re = self.absolute_re.as_ref()?;
        let path = re.captures(line)?.get(1)?.as_str().to_string();
        has_tracked_extension(&path).then_some(path)
    }

    fn relativize(&self, path: &str) -> String {
        let trimmed = path.trim_end_matches([',', '.', ':', ';', ')']);
        if let Some(root) = &self.project_prefix {
            if let Some(rest) = trimmed.strip_prefix(root.as_str()) {
                return rest.trim_start_matches('/').to_string();
            }
        }
        trimmed.trim_start_matches("./").to_string()
    }
}

impl PathExtractor for OutputPathExtractor {
    fn extract(&self, output: &str) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();

        for line in output.lines() {
            if let Some(path) = self.candidate(line) {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }

        files.retain(|f| !EXCLUDED_PREFIXES.iter().any(|p| f.starts_with(p)));
        files
    }
}

fn has_tracked_extension(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| TRACKED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
