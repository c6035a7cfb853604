use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// One test as recognised in runner output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub status: TestStatus,
    /// Seconds
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated outcome of a test run.
///
/// `cases` keeps the order in which the cases first appeared in the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Seconds
    pub duration: f64,
    pub cases: Vec<TestCase>,
}

impl TestSummary {
    pub fn failed_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter().filter(|c| c.status == TestStatus::Failed)
    }
}
