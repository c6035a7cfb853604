mod project_registry;
mod prompt_source;

pub use project_registry::{FileProjectRegistry, PROJECT_FILE, domain_id};
pub use prompt_source::SpecFilePromptSource;
