pub mod drift_detector;
pub mod fs_provider;
pub mod process_runner;
pub mod reconciliation;

pub use drift_detector::DriftDetector;
pub use fs_provider::FsContentProvider;
pub use process_runner::{CancelHandle, ProcessRunner, RunHandle, RunRequest, RunStatus};
pub use reconciliation::{
    ControllerError, PanelState, Prompt, ReconciliationController, Resolution, RunOutcome,
    Session,
};
