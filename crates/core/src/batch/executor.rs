//! Execution of expanded commands as child processes.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::types::{CapturedOutput, Task, TaskOutcome};

/// How long to keep draining pipes after the child has exited.
///
/// A background process the tool left behind can hold the pipes open.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Runs one task to a terminal outcome.
///
/// Implementations never return an error: failures are outcomes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Returns the name of this executor implementation.
    fn name(&self) -> &str;

    /// Runs the task's command, waiting at most `timeout` if one is given.
    async fn execute(&self, task: &Task, timeout: Option<Duration>) -> TaskOutcome;
}

/// Executor that spawns each command as an independent child process.
///
/// Standard input is closed; standard output and error are captured into
/// per-task buffers. Children are killed if their task is dropped and are
/// always reaped before `execute` returns. On unix every command leads its
/// own process group, and a timeout kills the whole group, so tools started
/// by a shell template die with it.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every command from the given directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(&self, task: &Task, timeout: Option<Duration>) -> TaskOutcome {
        let mut command = Command::new(&task.command.program);
        command
            .args(&task.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let cause = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("Program not found: {}", task.command.program)
                } else {
                    format!("Failed to start {}: {}", task.command.program, e)
                };
                return TaskOutcome::execution_error(cause);
            }
        };

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_pipe(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_pipe(pipe)));

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    terminate(&mut child, &task.item).await;
                    None
                }
            },
            None => Some(child.wait().await),
        };

        let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));
        let output = CapturedOutput::new(stdout, stderr);

        match status {
            None => TaskOutcome::timed_out(output),
            Some(Ok(status)) if status.success() => {
                TaskOutcome::succeeded(status.code().unwrap_or(0), output)
            }
            Some(Ok(status)) => TaskOutcome::failed(status.code(), output),
            Some(Err(e)) => TaskOutcome::execution_error(format!(
                "Failed waiting for {}: {}",
                task.command.program, e
            )),
        }
    }
}

/// Kills a timed-out child together with everything it started, then reaps it.
async fn terminate(child: &mut Child, item: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            if let Err(e) = kill_group(pid) {
                tracing::warn!(item = %item, pid, "Failed to kill process group: {}", e);
            }
        }
    }
    // kill() also waits, so the child is reaped here
    if let Err(e) = child.kill().await {
        tracing::warn!(item = %item, "Failed to kill timed-out process: {}", e);
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // spawned with process_group(0), so the group id is the child's pid
    killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(std::io::Error::from)
}

async fn read_pipe<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    // Keep whatever was read before an error.
    let _ = pipe.read_to_end(&mut buf).await;
    buf
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            tracing::warn!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::batch::template::ConcreteCommand;

    fn task(program: &str, args: &[&str]) -> Task {
        Task {
            index: 0,
            item: "item".to_string(),
            command: ConcreteCommand::new(program, args.iter().map(|a| a.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let outcome = ProcessExecutor::new()
            .execute(&task("echo", &["hello page"]), None)
            .await;
        match outcome {
            TaskOutcome::Succeeded { exit_code, output } => {
                assert_eq!(exit_code, 0);
                assert_eq!(output.stdout, "hello page\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_not_execution_error() {
        let outcome = ProcessExecutor::new()
            .execute(&task("sh", &["-c", "echo broken >&2; exit 3"]), None)
            .await;
        match outcome {
            TaskOutcome::Failed {
                exit_code,
                timed_out,
                output,
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(!timed_out);
                assert_eq!(output.stderr.trim(), "broken");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_error() {
        let outcome = ProcessExecutor::new()
            .execute(&task("/nonexistent/pagebatch-tool", &[]), None)
            .await;
        match outcome {
            TaskOutcome::ExecutionError { cause } => assert!(cause.contains("not found")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let started = std::time::Instant::now();
        let outcome = ProcessExecutor::new()
            .execute(&task("sleep", &["30"]), Some(Duration::from_millis(200)))
            .await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                timed_out: true,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Whether `pid` is alive; a zombie waiting for its reaper counts as dead.
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(false, |(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => {
                nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
            }
        }
    }

    #[tokio::test]
    async fn test_shell_timeout_kills_background_tools() {
        let started = std::time::Instant::now();
        let outcome = ProcessExecutor::new()
            .execute(
                &task("/bin/sh", &["-c", "sleep 37 & echo $!; wait"]),
                Some(Duration::from_millis(200)),
            )
            .await;

        // the pipes close with the group, so no output grace is spent
        assert!(started.elapsed() < Duration::from_secs(2));
        let output = match outcome {
            TaskOutcome::Failed {
                timed_out: true,
                output,
                ..
            } => output,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let tool: i32 = output.stdout.trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(tool), "sleep {tool} outlived its timed-out shell");
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ProcessExecutor::new()
            .with_working_dir(dir.path())
            .execute(&task("touch", &["marker"]), None)
            .await;
        assert!(outcome.is_success());
        assert!(dir.path().join("marker").exists());
    }
}
