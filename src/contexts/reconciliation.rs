//! Session-level orchestration of implementation runs and drift resolution
//!
//! The controller owns one `Session` per open project. A session moves
//! through `Idle -> PromptReady -> Running -> {Done | Failed}`; from `Done`
//! or `Failed` it goes back to `Idle` (implement another unit) or to
//! `PromptReady` (edit the prompt and retry).

use crate::audit::{AuditError, AuditLog};
use crate::config::Settings;
use crate::contexts::drift_detector::DriftDetector;
use crate::contexts::fs_provider::FsContentProvider;
use crate::contexts::process_runner::{
    CancelHandle, ProcessRunner, RunHandle, RunRequest, RunStatus,
};
use crate::data::{
    ContentProvider, DriftDirection, DriftEntry, DriftSnapshot, FlowMapping, PromptSource,
    ReconciliationAction, ReconciliationEntry, RegistryError, TestCase, TestSummary,
    UnitEnumerator, UnitKey,
};
use crate::mapping_store::{MappingError, MappingStore};
use crate::path_extraction::{OutputPathExtractor, PathExtractor};
use crate::registries::{FileProjectRegistry, SpecFilePromptSource};
use crate::test_output;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TEST_SEPARATOR: &str = "\n--- Running tests ---\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PanelState {
    #[default]
    Idle,
    PromptReady,
    Running,
    Done,
    Failed,
}

impl fmt::Display for PanelState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PanelState::Idle => "idle",
            PanelState::PromptReady => "prompt_ready",
            PanelState::Running => "running",
            PanelState::Done => "done",
            PanelState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("cannot {operation} while {from}")]
    InvalidTransition {
        from: PanelState,
        operation: &'static str,
    },

    #[error("no prompt prepared")]
    NoPrompt,

    #[error("no drift listed for {0}")]
    NoDrift(String),

    #[error("'{0}' cannot be applied to all drifted flows")]
    BulkActionNotAllowed(ReconciliationAction),

    #[error("invalid flow key '{0}' (expected <domain>/<flow>)")]
    InvalidKey(String),

    #[error("test command failed: {0}")]
    TestCommand(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Instruction text for one run, bound to the unit it implements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub unit: UnitKey,
    pub title: String,
    pub content: String,
}

/// Everything that lives only as long as the project is open
#[derive(Default)]
pub struct Session {
    state: PanelState,
    prompt: Option<Prompt>,
    output: String,
    exit_code: Option<i32>,
    error: Option<String>,
    test_results: Option<TestSummary>,
    drift: DriftSnapshot,
    ignored: HashSet<String>,
    active: Option<CancelHandle>,
}

impl Session {
    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    /// Captured output of the last run, plus any test output appended to it
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn test_results(&self) -> Option<&TestSummary> {
        self.test_results.as_ref()
    }

    pub fn drift(&self) -> &DriftSnapshot {
        &self.drift
    }

    pub fn is_ignored(&self, flow_key: &str) -> bool {
        self.ignored.contains(flow_key)
    }

    fn clear_run(&mut self) {
        self.output.clear();
        self.exit_code = None;
        self.error = None;
    }
}

/// Result of a finished implementation run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Files recorded for the unit, empty unless the run succeeded
    pub files: Vec<String>,
    pub test_results: Option<TestSummary>,
    /// Non-fatal problems, such as a mapping write that failed
    pub warnings: Vec<String>,
}

/// Result of a resolution
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Audit report written for this resolution, if any
    pub report: Option<PathBuf>,
    pub sync_score_before: u32,
    pub sync_score_after: u32,
    pub warnings: Vec<String>,
}

pub struct ReconciliationController {
    root: PathBuf,
    settings: Settings,
    provider: Arc<dyn ContentProvider>,
    store: MappingStore,
    units: Arc<dyn UnitEnumerator>,
    prompts: Arc<dyn PromptSource>,
    extractor: Box<dyn PathExtractor>,
    runner: ProcessRunner,
    audit: AuditLog,
    session: Session,
}

impl ReconciliationController {
    /// Open a project with the file-backed collaborators
    pub fn open(root: &Path, settings: Settings) -> Result<Self, ControllerError> {
        let root = root.to_path_buf();
        let provider: Arc<dyn ContentProvider> =
            Arc::new(FsContentProvider::new(Some(root.clone())));
        let absolute_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        let extractor = OutputPathExtractor::new(absolute_root.to_str());

        Self::with_collaborators(
            root.clone(),
            settings,
            provider,
            Arc::new(FileProjectRegistry::new(Some(root.clone()))),
            Arc::new(SpecFilePromptSource::new(Some(root))),
            Box::new(extractor),
        )
    }

    pub fn with_collaborators(
        root: PathBuf,
        settings: Settings,
        provider: Arc<dyn ContentProvider>,
        units: Arc<dyn UnitEnumerator>,
        prompts: Arc<dyn PromptSource>,
        extractor: Box<dyn PathExtractor>,
    ) -> Result<Self, ControllerError> {
        let store = MappingStore::load(provider.clone())?;
        let audit = AuditLog::new(&root);
        info!(root = %root.display(), flows = store.all().len(), "Project opened");

        Ok(Self {
            root,
            settings,
            provider,
            store,
            units,
            prompts,
            extractor,
            runner: ProcessRunner::new(),
            audit,
            session: Session::default(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn mapping(&self, key: &str) -> Option<&FlowMapping> {
        self.store.get(key)
    }

    pub fn put_mapping(&mut self, key: &str, mapping: FlowMapping) -> Result<(), ControllerError> {
        self.store.put(key, mapping)?;
        Ok(())
    }

    fn ensure_not_running(&self, operation: &'static str) -> Result<(), ControllerError> {
        if self.session.state == PanelState::Running {
            return Err(ControllerError::InvalidTransition {
                from: PanelState::Running,
                operation,
            });
        }
        Ok(())
    }

    fn set_prompt(&mut self, prompt: Prompt) {
        debug!(unit = %prompt.unit, title = %prompt.title, "Prompt ready");
        self.session.prompt = Some(prompt);
        self.session.state = PanelState::PromptReady;
        self.session.clear_run();
        self.session.test_results = None;
    }

    /// Build the implementation prompt for a unit
    pub fn prepare_prompt(&mut self, unit: &UnitKey) -> Result<(), ControllerError> {
        self.ensure_not_running("prepare a prompt")?;
        let content = self.prompts.build(unit)?;
        self.set_prompt(Prompt {
            unit: unit.clone(),
            title: format!("Implement {}", unit),
            content,
        });
        Ok(())
    }

    /// Use caller-supplied prompt text for a unit
    pub fn load_prompt(&mut self, unit: &UnitKey, content: String) -> Result<(), ControllerError> {
        self.ensure_not_running("load a prompt")?;
        self.set_prompt(Prompt {
            unit: unit.clone(),
            title: format!("Implement {}", unit),
            content,
        });
        Ok(())
    }

    /// Replace the prompt text and return to `PromptReady`
    pub fn edit_prompt(&mut self, content: String) -> Result<(), ControllerError> {
        self.ensure_not_running("edit the prompt")?;
        let prompt = self.session.prompt.as_mut().ok_or(ControllerError::NoPrompt)?;
        prompt.content = content;
        self.session.state = PanelState::PromptReady;
        Ok(())
    }

    /// Leave a finished run and drop the prompt
    pub fn reset_to_idle(&mut self) -> Result<(), ControllerError> {
        self.ensure_not_running("return to idle")?;
        self.session.state = PanelState::Idle;
        self.session.prompt = None;
        self.session.clear_run();
        self.session.test_results = None;
        Ok(())
    }

    /// Start the implementation command with the current prompt on stdin.
    /// Must be called from within a tokio runtime.
    pub fn start_run(&mut self) -> Result<RunHandle, ControllerError> {
        let from = self.session.state;
        if !matches!(from, PanelState::PromptReady | PanelState::Failed) {
            return Err(ControllerError::InvalidTransition {
                from,
                operation: "start a run",
            });
        }
        let prompt = self.session.prompt.as_ref().ok_or(ControllerError::NoPrompt)?;

        let request = RunRequest::new(
            self.settings.implement.command.clone(),
            self.settings.implement.args.clone(),
            self.root.clone(),
        )
        .with_input(prompt.content.clone());
        info!(unit = %prompt.unit, command = %request.command, "Starting implementation run");

        let handle = self.runner.start(request);
        self.session.active = Some(handle.cancel_handle());
        self.session.state = PanelState::Running;
        self.session.clear_run();
        Ok(handle)
    }

    /// Cancel the active run. Returns false if nothing was cancelled.
    pub fn cancel_run(&self) -> bool {
        self.session
            .active
            .as_ref()
            .map(|handle| handle.cancel())
            .unwrap_or(false)
    }

    /// Drain a run started by `start_run`, feeding each output chunk to
    /// `sink` in arrival order, then settle the session on its outcome
    pub async fn finish_run<F: FnMut(&str)>(
        &mut self,
        mut handle: RunHandle,
        mut sink: F,
    ) -> Result<RunOutcome, ControllerError> {
        while let Some(chunk) = handle.next_chunk().await {
            self.session.output.push_str(&chunk);
            sink(&chunk);
        }
        let status = handle.wait().await;
        self.session.active = None;
        self.session.exit_code = status.exit_code();

        let mut outcome = RunOutcome {
            status: status.clone(),
            files: Vec::new(),
            test_results: None,
            warnings: Vec::new(),
        };

        match status {
            RunStatus::Exited(0) => {
                self.session.state = PanelState::Done;
                self.session.error = None;
                self.record_success(&mut outcome).await;
            }
            RunStatus::Exited(code) => {
                self.fail(format!("Process exited with code {}", code));
            }
            RunStatus::Signaled(signal) => {
                self.fail(format!("Process terminated by signal {}", signal));
            }
            RunStatus::Cancelled => {
                self.fail("Implementation cancelled".to_string());
            }
            RunStatus::Failed(message) => {
                self.fail(message);
            }
            RunStatus::Running => {
                self.fail("Run ended without a status".to_string());
            }
        }

        Ok(outcome)
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "Implementation run failed");
        self.session.state = PanelState::Failed;
        self.session.error = Some(message);
    }

    async fn record_success(&mut self, outcome: &mut RunOutcome) {
        let Some(unit) = self.session.prompt.as_ref().map(|p| p.unit.clone()) else {
            return;
        };
        let key = unit.to_string();
        let files = self.extractor.extract(&self.session.output);
        debug!(unit = %key, files = ?files, "Extracted implementation files");

        match self.store.record(&key, &unit.spec_path(), &files) {
            Ok(()) => {}
            Err(e) if e.is_persistence() => outcome.warnings.push(e.to_string()),
            Err(e) => {
                warn!(unit = %key, error = %e, "Implementation not recorded");
                outcome.warnings.push(format!("implementation not recorded: {}", e));
                return;
            }
        }
        info!(unit = %key, files = files.len(), "Implementation recorded");
        outcome.files = files;

        if !self.settings.implement.run_tests_after {
            return;
        }
        match self.run_tests().await {
            Ok(summary) => {
                if let Err(e) = self.store.attach_test_results(&key, summary.clone()) {
                    outcome.warnings.push(e.to_string());
                }
                outcome.test_results = Some(summary);
            }
            Err(e) => outcome.warnings.push(e.to_string()),
        }
    }

    /// Run the configured test command, append its output to the session
    /// buffer and keep the parsed summary
    pub async fn run_tests(&mut self) -> Result<TestSummary, ControllerError> {
        self.ensure_not_running("run tests")?;
        let request = RunRequest::new(
            self.settings.testing.command.clone(),
            self.settings.testing.args.clone(),
            self.root.clone(),
        );
        info!(command = %request.command, "Running tests");

        self.session.output.push_str(TEST_SEPARATOR);
        let (output, status) = self.runner.run_captured(request).await;
        self.session.output.push_str(&output);

        if let RunStatus::Failed(message) = status {
            self.session
                .output
                .push_str(&format!("\nTest execution failed: {}\n", message));
            return Err(ControllerError::TestCommand(message));
        }

        let summary = test_output::parse(&output);
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "Tests finished"
        );
        self.session.test_results = Some(summary.clone());
        Ok(summary)
    }

    /// Turn a failed test case into a fix prompt for the current unit
    pub fn fix_failing_test(&mut self, case: &TestCase) -> Result<(), ControllerError> {
        self.ensure_not_running("prepare a fix")?;
        let unit = self
            .session
            .prompt
            .as_ref()
            .map(|p| p.unit.clone())
            .ok_or(ControllerError::NoPrompt)?;

        let content = [
            format!("# Fix Failing Test: {}", case.name),
            String::new(),
            "Test error:".to_string(),
            "```".to_string(),
            case.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
            "```".to_string(),
            String::new(),
            format!(
                "Fix this failing test. The test is part of the implementation for flow \"{}\" in domain \"{}\".",
                unit.flow_id, unit.domain_id
            ),
            String::new(),
            "Do not change the test expectations unless the spec has changed. Fix the implementation to match the test.".to_string(),
        ]
        .join("\n");

        let test_results = self.session.test_results.take();
        self.set_prompt(Prompt {
            unit,
            title: format!("Fix: {}", case.name),
            content,
        });
        // Remaining failures stay visible while the fix is prepared
        self.session.test_results = test_results;
        Ok(())
    }

    /// Turn a runtime error description into a fix prompt for the current unit
    pub fn fix_runtime_error(&mut self, description: &str) -> Result<(), ControllerError> {
        self.ensure_not_running("prepare a fix")?;
        let unit = self
            .session
            .prompt
            .as_ref()
            .map(|p| p.unit.clone())
            .ok_or(ControllerError::NoPrompt)?;

        let content = [
            "# Fix Runtime Error".to_string(),
            String::new(),
            format!("Flow: \"{}\" in domain \"{}\"", unit.flow_id, unit.domain_id),
            String::new(),
            "## Error".to_string(),
            "```".to_string(),
            description.to_string(),
            "```".to_string(),
            String::new(),
            "## Instructions".to_string(),
            "The implementation for this flow has a runtime error. Read the existing code, identify the root cause, and fix it.".to_string(),
            "- Do not rewrite from scratch; fix the existing implementation".to_string(),
            "- Make sure the fix handles edge cases".to_string(),
            "- Run the existing tests after fixing to ensure nothing breaks".to_string(),
        ]
        .join("\n");

        self.set_prompt(Prompt {
            title: format!("Fix runtime error: {}", unit.flow_id),
            unit,
            content,
        });
        Ok(())
    }

    /// Recompute drift for every project unit and publish the list and score
    /// together. Units ignored this session are left out.
    pub fn detect_drift(&mut self) -> Result<&DriftSnapshot, ControllerError> {
        let units = self.units.units()?;
        let detector = DriftDetector::new(
            self.provider.clone(),
            self.settings.reconciliation.precedence,
        );
        let mut snapshot = detector.detect(&units, &self.store);

        let ignored = &self.session.ignored;
        if !ignored.is_empty() {
            snapshot.retain(|entry| !ignored.contains(&entry.flow_key));
        }

        self.session.drift = snapshot;
        Ok(&self.session.drift)
    }

    /// Resolve the listed drift for one unit
    pub fn resolve(
        &mut self,
        flow_key: &str,
        action: ReconciliationAction,
    ) -> Result<Resolution, ControllerError> {
        let entry = self
            .session
            .drift
            .entry(flow_key)
            .cloned()
            .ok_or_else(|| ControllerError::NoDrift(flow_key.to_string()))?;

        if action == ReconciliationAction::Reimplement {
            let unit = UnitKey::parse(flow_key)
                .ok_or_else(|| ControllerError::InvalidKey(flow_key.to_string()))?;
            self.prepare_prompt(&unit)?;
            info!(flow = flow_key, "Reimplementation prepared");
            let score = self.session.drift.score.score;
            return Ok(Resolution {
                report: None,
                sync_score_before: score,
                sync_score_after: score,
                warnings: Vec::new(),
            });
        }

        self.resolve_entries(vec![entry], action)
    }

    /// Apply accept or ignore to every listed drift, with one audit report
    pub fn resolve_all(
        &mut self,
        action: ReconciliationAction,
    ) -> Result<Resolution, ControllerError> {
        if action == ReconciliationAction::Reimplement {
            return Err(ControllerError::BulkActionNotAllowed(action));
        }
        let entries = self.session.drift.entries.clone();
        if entries.is_empty() {
            let score = self.session.drift.score.score;
            return Ok(Resolution {
                report: None,
                sync_score_before: score,
                sync_score_after: score,
                warnings: Vec::new(),
            });
        }
        self.resolve_entries(entries, action)
    }

    fn resolve_entries(
        &mut self,
        entries: Vec<DriftEntry>,
        action: ReconciliationAction,
    ) -> Result<Resolution, ControllerError> {
        let before = self.session.drift.score.score;
        let mut warnings = Vec::new();
        let mut resolved = Vec::with_capacity(entries.len());
        let mut keys = HashSet::new();

        for entry in entries {
            match action {
                ReconciliationAction::Accept => {
                    if let Some(warning) = self.accept(&entry)? {
                        warnings.push(warning);
                    }
                }
                ReconciliationAction::Ignore => {
                    self.session.ignored.insert(entry.flow_key.clone());
                }
                ReconciliationAction::Reimplement => {
                    return Err(ControllerError::BulkActionNotAllowed(action));
                }
            }
            info!(flow = %entry.flow_key, %action, direction = ?entry.direction, "Drift resolved");

            keys.insert(entry.flow_key.clone());
            resolved.push(ReconciliationEntry {
                flow_key: entry.flow_key,
                action,
                previous_hash: entry.previous_hash,
                new_hash: entry.current_hash,
                resolved_at: chrono::Utc::now().to_rfc3339(),
            });
        }

        self.session
            .drift
            .retain(|entry| !keys.contains(&entry.flow_key));
        let after = self.session.drift.score.score;

        let report = AuditLog::report(resolved, before, after);
        let path = match self.audit.write(&report) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Reconciliation report not written");
                warnings.push(e.to_string());
                None
            }
        };

        Ok(Resolution {
            report: path,
            sync_score_before: before,
            sync_score_after: after,
            warnings,
        })
    }

    /// Take the current content as the new synchronization point.
    /// Returns a warning when only the mapping write failed.
    fn accept(&mut self, entry: &DriftEntry) -> Result<Option<String>, ControllerError> {
        let result = match entry.direction {
            DriftDirection::Forward => self
                .store
                .update_spec_hash(&entry.flow_key, &entry.current_hash),
            DriftDirection::Reverse => {
                let updates = self.changed_files(entry);
                self.store.update_file_hashes(&entry.flow_key, &updates)
            }
        };

        match result {
            Ok(()) => Ok(None),
            Err(e) if e.is_persistence() => Ok(Some(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Every tracked file of the entry's unit whose content changed, starting
    /// with the reported one
    fn changed_files(&self, entry: &DriftEntry) -> Vec<(String, String)> {
        let mut updates = vec![(entry.changed_path.clone(), entry.current_hash.clone())];
        let Some(mapping) = self.store.get(&entry.flow_key) else {
            return updates;
        };

        for (path, stored) in mapping.tracked_files() {
            if path == entry.changed_path {
                continue;
            }
            if let Ok(current) = self.provider.hash(path) {
                if current != stored {
                    updates.push((path.to_string(), current));
                }
            }
        }
        updates
    }

    /// Drop all session state, cancelling the active run if there is one
    pub fn reset_session(&mut self) {
        if self.cancel_run() {
            debug!("Active run cancelled by session reset");
        }
        self.session = Session::default();
    }
}
