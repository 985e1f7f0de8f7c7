//! Builder for executing external tool commands with timeout support.
//!
//! Every child is spawned with `kill_on_drop`, so dropping an in-flight
//! execution (sibling rung failure, shutdown, timeout) terminates the process.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use vf_core::Error;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error messages when streaming.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). When streamed through a
    /// callback only the last few lines are kept.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use vf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> vf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-print_format", "json", "-show_format"])
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`vf_core::Error::Tool`] if spawning fails, the process exits
    /// with a non-zero status (message includes stderr) or the timeout
    /// expires.
    pub async fn execute(&self) -> vf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool(
                    program_name,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            // The child future was dropped; kill_on_drop reaps the process.
            Err(_) => {
                return Err(Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(Error::tool(
                program_name,
                format!(
                    "exited with status {}: {}",
                    output.status,
                    tool_output.stderr.trim()
                ),
            ));
        }

        Ok(tool_output)
    }

    /// Execute the command, handing every stderr line to `on_line` as it is
    /// produced.
    ///
    /// Used for ffmpeg `-progress pipe:2` parsing. Stdout is drained in the
    /// background. If the timeout expires the child is killed and a
    /// [`vf_core::Error::Tool`] is returned.
    pub async fn execute_with_stderr_callback<F>(&self, mut on_line: F) -> vf_core::Result<ToolOutput>
    where
        F: FnMut(&str),
    {
        let program_name = self.program_name();

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stderr was not captured"))?;
        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let run = async {
            while let Some(line) = lines.next_line().await? {
                on_line(&line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            child.wait().await
        };
        let finished: Option<std::io::Result<ExitStatus>> =
            tokio::time::timeout(self.timeout, run).await.ok();

        let status = match finished {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                let _ = child.kill().await;
                return Err(Error::tool(
                    program_name,
                    format!("I/O error waiting for process: {e}"),
                ));
            }
            None => {
                let _ = child.kill().await;
                return Err(Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");

        if !status.success() {
            return Err(Error::tool(
                program_name,
                format!("exited with status {status}: {}", stderr.trim()),
            ));
        }

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
        })
    }
}
