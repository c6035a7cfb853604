mod content_provider;
mod drift;
mod mapping;
mod project;
mod reconciliation;
mod test_summary;

pub use content_provider::{ContentProvider, ProviderError};
pub use drift::{DriftDirection, DriftEntry, DriftPrecedence, DriftSnapshot, SyncScore};
pub use mapping::{FlowMapping, MappingMode};
pub use project::{ProjectUnit, PromptSource, RegistryError, UnitEnumerator, UnitKey};
pub use reconciliation::{ReconciliationAction, ReconciliationEntry, ReconciliationReport};
pub use test_summary::{TestCase, TestStatus, TestSummary};
