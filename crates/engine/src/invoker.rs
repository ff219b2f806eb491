//! Calculation engine subprocess management.
//!
//! [`CalculationInvoker`] runs the engine in batch mode
//! (`<engine> <input-file> -b`) inside the job workspace, enforces a
//! wall-clock timeout and classifies what happened into a
//! [`CalculationOutcome`]. The staged input file is removed after every
//! attempt.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use sofi_core::error::CoreError;
use sofi_core::workspace::find_output;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Default wall-clock limit for one calculation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Extension of the engine's result database.
pub const OUTPUT_EXTENSION: &str = "cdb";

/// Command-line flag that runs the engine without its UI.
pub const BATCH_FLAG: &str = "-b";

/// Maximum stdout or stderr bytes kept for logging (64 KiB).
const MAX_OUTPUT_BYTES: u64 = 64 * 1024;

/// Static configuration of the calculation engine.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Path to the engine executable.
    pub engine_path: PathBuf,
    /// Timeout used by [`CalculationInvoker::run_default`].
    pub timeout: Duration,
    /// Extension of the artifact the engine writes on success.
    pub output_extension: String,
}

impl InvokerConfig {
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            timeout: DEFAULT_TIMEOUT,
            output_extension: OUTPUT_EXTENSION.to_string(),
        }
    }
}

/// How one engine invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalculationOutcome {
    /// The engine exited and left an output artifact in the workspace.
    Success,
    /// The engine exited without producing an artifact.
    NoOutput { exit_code: Option<i32> },
    /// The engine did not finish in time and was killed.
    Timeout { after: Duration },
    /// The engine could not be started at all.
    EngineUnavailable { reason: String },
}

impl CalculationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert every non-success outcome into an [`EngineError`].
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Self::Success => Ok(()),
            Self::NoOutput { exit_code } => Err(EngineError::NoOutput { exit_code }),
            Self::Timeout { after } => Err(EngineError::Timeout {
                secs: after.as_secs(),
            }),
            Self::EngineUnavailable { reason } => Err(EngineError::Unavailable(reason)),
        }
    }
}

/// Failed calculation, as surfaced to callers that need an error value.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Calculation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Calculation engine is not available: {0}")]
    Unavailable(String),

    #[error("Calculation finished without output (exit code {exit_code:?})")]
    NoOutput { exit_code: Option<i32> },
}

/// Runs the external engine against staged model files.
pub struct CalculationInvoker {
    config: InvokerConfig,
}

impl CalculationInvoker {
    /// Relative engine paths are anchored at the current directory, since
    /// the child runs with the workspace as its working directory.
    pub fn new(mut config: InvokerConfig) -> Self {
        if config.engine_path.is_relative() && config.engine_path.components().count() > 1 {
            if let Ok(absolute) = std::path::absolute(&config.engine_path) {
                config.engine_path = absolute;
            }
        }
        Self { config }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Whether the configured engine executable exists on disk.
    pub async fn engine_installed(&self) -> bool {
        tokio::fs::metadata(&self.config.engine_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// [`run`](Self::run) with the configured timeout.
    pub async fn run_default(&self, input_file: &Path) -> CalculationOutcome {
        self.run(input_file, self.config.timeout).await
    }

    /// Run the engine against `input_file` and wait at most `timeout`.
    ///
    /// The exit code is not inspected: the engine signals a failed
    /// calculation by not writing its output artifact. The input file is
    /// deleted afterwards regardless of the outcome.
    pub async fn run(&self, input_file: &Path, timeout: Duration) -> CalculationOutcome {
        let workdir = input_file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let invocation = self.invoke(input_file, &workdir, timeout).await;
        remove_input(input_file).await;

        let outcome = match invocation {
            Invocation::Exited { exit_code } => {
                if has_output(&workdir, &self.config.output_extension).await {
                    CalculationOutcome::Success
                } else {
                    CalculationOutcome::NoOutput { exit_code }
                }
            }
            Invocation::TimedOut => CalculationOutcome::Timeout { after: timeout },
            Invocation::SpawnFailed(reason) => CalculationOutcome::EngineUnavailable { reason },
        };

        match &outcome {
            CalculationOutcome::Success => {
                tracing::info!(input = %input_file.display(), "Calculation succeeded");
            }
            CalculationOutcome::NoOutput { exit_code } => {
                tracing::warn!(input = %input_file.display(), ?exit_code, "Calculation produced no output");
            }
            CalculationOutcome::Timeout { after } => {
                tracing::warn!(input = %input_file.display(), timeout_secs = after.as_secs(), "Calculation timed out");
            }
            CalculationOutcome::EngineUnavailable { reason } => {
                tracing::error!(
                    engine = %self.config.engine_path.display(),
                    error = %reason,
                    "Calculation engine is not installed or not executable",
                );
            }
        }

        outcome
    }

    async fn invoke(&self, input_file: &Path, workdir: &Path, timeout: Duration) -> Invocation {
        let input_arg = input_file.file_name().unwrap_or(input_file.as_os_str());

        let mut cmd = Command::new(&self.config.engine_path);
        cmd.arg(input_arg)
            .arg(BATCH_FLAG)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Invocation::SpawnFailed(e.to_string()),
        };
        tracing::debug!(input = %input_file.display(), pid = ?child.id(), "Engine started");

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(wait_result) => {
                let exit_code = match wait_result {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to wait for engine process");
                        None
                    }
                };
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                tracing::debug!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    ?exit_code,
                    stdout = %String::from_utf8_lossy(&stdout),
                    stderr = %String::from_utf8_lossy(&stderr),
                    "Engine exited",
                );
                Invocation::Exited { exit_code }
            }
            Err(_elapsed) => {
                // Reap the child so no handle keeps the workspace busy.
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed-out engine process");
                }
                stdout_task.abort();
                stderr_task.abort();
                Invocation::TimedOut
            }
        }
    }
}

enum Invocation {
    Exited { exit_code: Option<i32> },
    TimedOut,
    SpawnFailed(String),
}

async fn has_output(workdir: &Path, extension: &str) -> bool {
    matches!(
        find_output(workdir, extension).await,
        Ok(_) | Err(CoreError::AmbiguousOutput { .. })
    )
}

async fn remove_input(input_file: &Path) {
    if let Err(e) = tokio::fs::remove_file(input_file).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(input = %input_file.display(), error = %e, "Failed to remove staged input");
        }
    }
}

/// Read an entire output stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use assert_matches::assert_matches;

    use super::*;

    /// Write an executable shell script standing in for the engine.
    fn fake_engine(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("wps");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake engine");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake engine");
        path
    }

    fn stage_input(dir: &Path) -> PathBuf {
        let workspace = dir.join("job1");
        std::fs::create_dir(&workspace).unwrap();
        let input = workspace.join("job1.dat");
        std::fs::write(&input, b"+prog aqua\nend\n").unwrap();
        input
    }

    fn invoker(engine: PathBuf) -> CalculationInvoker {
        CalculationInvoker::new(InvokerConfig::new(engine))
    }

    const WRITES_CDB: &str = r#"[ "$2" = "-b" ] || exit 3
printf 'CDB' > "${1%.*}.cdb""#;

    #[tokio::test]
    async fn success_when_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), WRITES_CDB);
        let input = stage_input(dir.path());

        let outcome = invoker(engine).run_default(&input).await;

        assert_eq!(outcome, CalculationOutcome::Success);
        assert!(!input.exists(), "input file must be removed");
        assert!(input.with_extension("cdb").exists());
    }

    #[tokio::test]
    async fn exit_code_is_ignored_when_output_exists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), &format!("{WRITES_CDB}\nexit 2"));
        let input = stage_input(dir.path());

        let outcome = invoker(engine).run_default(&input).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn no_output_is_reported_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "exit 1");
        let input = stage_input(dir.path());

        let outcome = invoker(engine).run_default(&input).await;

        assert_eq!(outcome, CalculationOutcome::NoOutput { exit_code: Some(1) });
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn timeout_kills_engine_and_removes_input() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "sleep 5");
        let input = stage_input(dir.path());

        let started = Instant::now();
        let outcome = invoker(engine)
            .run(&input, Duration::from_millis(200))
            .await;

        assert_matches!(outcome, CalculationOutcome::Timeout { .. });
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!input.exists(), "input file must be removed on timeout");
    }

    #[tokio::test]
    async fn missing_engine_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let input = stage_input(dir.path());

        let invoker = invoker(dir.path().join("not-installed").join("wps.exe"));
        assert!(!invoker.engine_installed().await);

        let outcome = invoker.run_default(&input).await;

        assert_matches!(outcome, CalculationOutcome::EngineUnavailable { .. });
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn non_executable_engine_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("wps");
        std::fs::write(&engine, "#!/bin/sh\nexit 0\n").unwrap();
        let input = stage_input(dir.path());

        let outcome = invoker(engine).run_default(&input).await;
        assert_matches!(outcome, CalculationOutcome::EngineUnavailable { .. });
    }

    #[test]
    fn outcomes_map_to_errors() {
        assert!(CalculationOutcome::Success.into_result().is_ok());
        assert_matches!(
            CalculationOutcome::Timeout {
                after: Duration::from_secs(60)
            }
            .into_result(),
            Err(EngineError::Timeout { secs: 60 })
        );
        assert_matches!(
            CalculationOutcome::EngineUnavailable {
                reason: "gone".into()
            }
            .into_result(),
            Err(EngineError::Unavailable(_))
        );
    }
}
