use crate::result::{MatrixError, Result};
use std::path::PathBuf;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use which::which;

/** Runs external tools on behalf of the orchestrator
 *
 * # Guarantees
 * - Children run in their own process group (unix) and are killed on drop
 * - Cancellation or timeout kills the whole group and reaps the child, so
 *   compiler subprocesses spawned by the build driver do not outlive a run
 * - stdout and stderr are captured in full
 */
#[derive(Clone, Default)]
pub struct ProcessManager {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

impl ProcessManager {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self { cancel, timeout }
    }

    pub fn find_executable(name: &str) -> Result<PathBuf> {
        which(name).map_err(|_| {
            MatrixError::toolchain_unavailable(format!("Executable not found: {}", name))
        })
    }

    /** Spawns `command` and waits for it, honouring cancellation and the timeout
     *
     * # Returns
     * - The captured output for any exit status; callers decide what a
     *   non-zero status means
     *
     * # Errors
     * - `MatrixError::Io` if the process cannot be spawned
     * - `MatrixError::Cancelled` if the cancellation token fired first
     * - `MatrixError::TimedOut` if the timeout elapsed first
     */
    pub async fn run(&self, mut command: Command) -> Result<Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        log::debug!("spawning {:?}", command.as_std());
        let mut child = command.spawn()?;

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            elapsed = deadline(self.timeout) => Outcome::TimedOut(elapsed),
        };

        let status = match outcome {
            Outcome::Exited(status) => status?,
            Outcome::Cancelled => {
                terminate(&mut child).await;
                return Err(MatrixError::cancelled(format!(
                    "{:?} was cancelled",
                    command.as_std().get_program()
                )));
            }
            Outcome::TimedOut(elapsed) => {
                terminate(&mut child).await;
                return Err(MatrixError::TimedOut(elapsed));
            }
        };

        Ok(Output {
            status,
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        })
    }

    /// Like `run`, but a non-zero exit becomes an error carrying stderr verbatim.
    pub async fn run_checked(&self, command: Command) -> std::result::Result<Output, CommandFailure> {
        let output = self.run(command).await.map_err(CommandFailure::Spawn)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(CommandFailure::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Why `run_checked` did not produce a successful output.
#[derive(Debug)]
pub enum CommandFailure {
    Spawn(MatrixError),
    Exit { code: Option<i32>, stderr: String },
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::Spawn(e) => write!(f, "{}", e),
            CommandFailure::Exit { code, stderr } => write!(
                f,
                "exited with status {}: {}",
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            ),
        }
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buffer).await {
        log::warn!("failed to read child output: {}", e);
    }
    buffer
}

async fn collect(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("killpg({}) failed: {}", pid, e);
        }
    }

    if let Err(e) = child.kill().await {
        log::debug!("kill after cancellation failed: {}", e);
    }
}
