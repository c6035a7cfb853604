use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code reported when the process never ran
pub const SPAWN_FAILURE_CODE: i32 = -1;

/// Location of the transient prompt file, relative to the working directory
pub const PROMPT_FILE: &str = ".ddd/.impl-prompt.md";

/// A command to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Text piped to the command's stdin through a temporary file
    pub input: Option<String>,
}

impl RunRequest {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            input: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Lifecycle of one run. Leaves `Running` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Exited(i32),
    /// Terminated by the given signal without an exit code
    Signaled(i32),
    Cancelled,
    /// The process could not be started or awaited
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunStatus::Exited(code) => Some(*code),
            RunStatus::Failed(_) => Some(SPAWN_FAILURE_CODE),
            RunStatus::Running | RunStatus::Signaled(_) | RunStatus::Cancelled => None,
        }
    }
}

struct RunState {
    status: RunStatus,
    kill: Option<oneshot::Sender<()>>,
}

/// Shared, clonable way to stop a run
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<Mutex<RunState>>,
}

impl CancelHandle {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request termination of the child.
    ///
    /// Returns true if this call moved the run to `Cancelled`. Calling it
    /// after the run ended, or a second time, changes nothing.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = RunStatus::Cancelled;
        if let Some(kill) = state.kill.take() {
            let _ = kill.send(());
        }
        info!("Run cancelled");
        true
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status.clone()
    }

    /// Settle the run on `candidate` unless it already settled
    fn settle(&self, candidate: RunStatus) -> RunStatus {
        let mut state = self.lock();
        if !state.status.is_terminal() {
            state.status = candidate;
        }
        state.kill = None;
        state.status.clone()
    }
}

/// A started run: its output stream, its cancel handle and its final status
pub struct RunHandle {
    output: mpsc::UnboundedReceiver<String>,
    cancel: CancelHandle,
    task: JoinHandle<RunStatus>,
}

impl RunHandle {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Next output chunk in arrival order, or None once the run ended and
    /// all output was delivered
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.output.recv().await
    }

    /// Wait for the terminal status, discarding undelivered output
    pub async fn wait(self) -> RunStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => self
                .cancel
                .settle(RunStatus::Failed(format!("run task failed: {}", e))),
        }
    }

    /// Feed every chunk to `sink`, then return the terminal status
    pub async fn stream_to<F: FnMut(&str)>(mut self, mut sink: F) -> RunStatus {
        while let Some(chunk) = self.next_chunk().await {
            sink(&chunk);
        }
        self.wait().await
    }
}

/// Temporary stdin file, removed when dropped
struct PromptFile {
    path: PathBuf,
}

impl PromptFile {
    fn create(working_dir: &Path, content: &str) -> io::Result<(Self, fs::File)> {
        let path = working_dir.join(PROMPT_FILE);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, content)?;
        // Guard first so the file is removed even if reopening fails
        let guard = Self { path };
        let file = fs::File::open(&guard.path)?;
        Ok((guard, file))
    }
}

impl Drop for PromptFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove prompt file"
                );
            }
        }
    }
}

/// Runs external commands with streamed, combined output
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// Spawn failures are not returned here; they arrive as the run's
    /// terminal status so every caller handles one path.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let (kill_tx, kill_rx) = oneshot::channel();
        let cancel = CancelHandle {
            state: Arc::new(Mutex::new(RunState {
                status: RunStatus::Running,
                kill: Some(kill_tx),
            })),
        };
        let (tx, rx) = mpsc::unbounded_channel();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let status = execute(request, kill_rx, tx).await;
            task_cancel.settle(status)
        });

        RunHandle {
            output: rx,
            cancel,
            task,
        }
    }

    /// Run to completion and return the captured output with the status
    pub async fn run_captured(&self, request: RunRequest) -> (String, RunStatus) {
        let mut output = String::new();
        let status = self
            .start(request)
            .stream_to(|chunk| output.push_str(chunk))
            .await;
        (output, status)
    }
}

async fn execute(
    request: RunRequest,
    mut kill_rx: oneshot::Receiver<()>,
    tx: mpsc::UnboundedSender<String>,
) -> RunStatus {
    let (prompt_file, stdin) = match &request.input {
        Some(content) => match PromptFile::create(&request.working_dir, content) {
            Ok((guard, file)) => (Some(guard), Stdio::from(file)),
            Err(e) => {
                return RunStatus::Failed(format!("Failed to write prompt file: {}", e));
            }
        },
        None => (None, Stdio::null()),
    };

    debug!(
        command = %request.command,
        args = ?request.args,
        cwd = %request.working_dir.display(),
        "Spawning process"
    );

    let mut child = match Command::new(&request.command)
        .args(&request.args)
        .current_dir(&request.working_dir)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            drop(prompt_file);
            return RunStatus::Failed(format!("Failed to spawn {}: {}", request.command, e));
        }
    };

    let mut stdout = child.stdout.take().map(BufReader::new);
    let mut stderr = child.stderr.take().map(BufReader::new);
    let mut out_line: Vec<u8> = Vec::new();
    let mut err_line: Vec<u8> = Vec::new();
    let mut kill_armed = true;

    loop {
        if stdout.is_none() && stderr.is_none() {
            break;
        }

        tokio::select! {
            read = read_line(&mut stdout, &mut out_line) => {
                if !forward(read, &mut out_line, &tx) {
                    stdout = None;
                }
            }
            read = read_line(&mut stderr, &mut err_line) => {
                if !forward(read, &mut err_line, &tx) {
                    stderr = None;
                }
            }
            signal = &mut kill_rx, if kill_armed => {
                kill_armed = false;
                if signal.is_ok() {
                    stop(&mut child);
                    break;
                }
            }
        }
    }

    // The process can outlive its output streams; a cancel still has to reach it
    let waited = if kill_armed {
        tokio::select! {
            waited = child.wait() => waited,
            signal = &mut kill_rx => {
                if signal.is_ok() {
                    stop(&mut child);
                }
                child.wait().await
            }
        }
    } else {
        child.wait().await
    };

    let status = match waited {
        Ok(status) => exit_status(status),
        Err(e) => RunStatus::Failed(format!("Failed to wait for {}: {}", request.command, e)),
    };
    drop(prompt_file);

    debug!(?status, "Process finished");
    status
}

fn stop(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Kill after cancel failed; process likely exited");
    }
}

fn exit_status(status: std::process::ExitStatus) -> RunStatus {
    if let Some(code) = status.code() {
        return RunStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return RunStatus::Signaled(signal);
        }
    }
    RunStatus::Failed(format!("Process ended without an exit code: {}", status))
}

/// Reads one line from an open stream; pending forever once the stream closed
async fn read_line<R>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader {
        Some(r) => r.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

/// Sends a completed line. Returns false when the stream is finished.
fn forward(
    read: io::Result<usize>,
    buf: &mut Vec<u8>,
    tx: &mpsc::UnboundedSender<String>,
) -> bool {
    match read {
        Ok(0) => false,
        Ok(_) => {
            let chunk = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            let _ = tx.send(chunk);
            true
        }
        Err(e) => {
            debug!(error = %e, "Output stream closed with error");
            if !buf.is_empty() {
                let _ = tx.send(String::from_utf8_lossy(buf).into_owned());
                buf.clear();
            }
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, dir: &Path) -> RunRequest {
        RunRequest::new("sh", vec!["-c".to_string(), script.to_string()], dir)
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();

        let handle = runner.start(sh(
            "echo one; sleep 0.1; echo two >&2; sleep 0.1; echo three",
            dir.path(),
        ));
        let mut chunks = Vec::new();
        let status = handle.stream_to(|c| chunks.push(c.to_string())).await;

        assert_eq!(status, RunStatus::Exited(0));
        assert_eq!(chunks, vec!["one\n", "two\n", "three\n"]);
    }

    #[tokio::test]
    async fn test_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (output, status) = ProcessRunner::new()
            .run_captured(sh("echo failing; exit 3", dir.path()))
            .await;
        assert_eq!(output, "failing\n");
        assert_eq!(status, RunStatus::Exited(3));
        assert_eq!(status.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let request = RunRequest::new("definitely-not-a-real-binary-xyz", vec![], dir.path());
        let (output, status) = ProcessRunner::new().run_captured(request).await;
        assert!(output.is_empty());
        assert!(matches!(status, RunStatus::Failed(_)));
        assert_eq!(status.exit_code(), Some(SPAWN_FAILURE_CODE));
    }

    #[tokio::test]
    async fn test_prompt_file_piped_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let request = RunRequest::new("cat", vec![], dir.path()).with_input("implement the flow\n");
        let (output, status) = ProcessRunner::new().run_captured(request).await;

        assert_eq!(status, RunStatus::Exited(0));
        assert_eq!(output, "implement the flow\n");
        assert!(!dir.path().join(PROMPT_FILE).exists());
    }

    #[tokio::test]
    async fn test_prompt_file_removed_on_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = RunRequest::new("definitely-not-a-real-binary-xyz", vec![], dir.path())
            .with_input("prompt");
        let (_, status) = ProcessRunner::new().run_captured(request).await;
        assert!(matches!(status, RunStatus::Failed(_)));
        assert!(!dir.path().join(PROMPT_FILE).exists());
    }

    #[tokio::test]
    async fn test_cancel_stops_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ProcessRunner::new().start(sh("echo started; exec sleep 30", dir.path()));

        assert_eq!(handle.next_chunk().await.as_deref(), Some("started\n"));
        assert!(handle.cancel());
        // Second cancel is a no-op
        assert!(!handle.cancel());

        let status = handle.wait().await;
        assert_eq!(status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_stops_process_that_closed_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ProcessRunner::new().start(sh(
            "echo started; exec >/dev/null 2>&1; exec sleep 5",
            dir.path(),
        ));

        assert_eq!(handle.next_chunk().await.as_deref(), Some("started\n"));
        // Give the child time to close both pipes before cancelling
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(handle.cancel());

        let started = std::time::Instant::now();
        let status = handle.wait().await;
        assert_eq!(status, RunStatus::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_signal_death_is_not_a_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (_, status) = ProcessRunner::new()
            .run_captured(sh("kill -9 $$", dir.path()))
            .await;
        assert_eq!(status, RunStatus::Signaled(9));
        assert!(status.is_terminal());
        assert!(!status.is_success());
        assert_eq!(status.exit_code(), None);
    }

    #[tokio::test]
    async fn test_cancel_after_exit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ProcessRunner::new().start(sh("echo done", dir.path()));
        let cancel = handle.cancel_handle();

        let status = handle.stream_to(|_| {}).await;
        assert_eq!(status, RunStatus::Exited(0));

        assert!(!cancel.cancel());
        assert_eq!(cancel.status(), RunStatus::Exited(0));
    }
}
