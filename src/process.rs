use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for output pipes after the process is gone. A grandchild
/// that inherited the pipes can keep them open indefinitely.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    /// Build a command from a whitespace-separated template. `{name}` placeholders
    /// are substituted from `vars` before splitting.
    pub fn from_template(template: &str, vars: &[(&str, String)], cwd: &Path) -> Option<Self> {
        let mut expanded = template.to_string();
        for (name, value) in vars {
            expanded = expanded.replace(&format!("{{{name}}}"), value);
        }
        let (program, args) = parse_test_cmd(&expanded);
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: resolve_program(&program, cwd),
            args,
            cwd: cwd.to_path_buf(),
        })
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn parse_test_cmd(cmd: &str) -> (String, Vec<String>) {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    match parts.split_first() {
        Some((program, rest)) => (program.to_string(), rest.iter().map(|s| s.to_string()).collect()),
        None => (String::new(), vec![]),
    }
}

/// A relative program path like `node_modules/.bin/mocha` is resolved against
/// the working directory; bare names are left for PATH lookup.
fn resolve_program(program: &str, cwd: &Path) -> String {
    let p = Path::new(program);
    if p.is_absolute() || !program.contains('/') {
        return program.to_string();
    }
    let candidate = cwd.join(p);
    if candidate.exists() {
        candidate.to_string_lossy().to_string()
    } else {
        program.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with failure code {code:?}")]
    Failed {
        command: String,
        /// `None` when the process was terminated by a signal.
        code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    #[error("`{command}` timed out after {timeout_ms}ms and was killed")]
    Timeout {
        command: String,
        timeout_ms: u64,
        /// Pid of the killed process.
        pid: Option<u32>,
        stdout: String,
        stderr: String,
    },
    #[error("i/o error while waiting for `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn stdout(&self) -> &str {
        match self {
            ProcessError::Failed { stdout, .. } | ProcessError::Timeout { stdout, .. } => stdout,
            ProcessError::Spawn { .. } | ProcessError::Io { .. } => "",
        }
    }

    pub fn stderr(&self) -> String {
        match self {
            ProcessError::Failed { stderr, .. } | ProcessError::Timeout { stderr, .. } => {
                stderr.clone()
            }
            ProcessError::Spawn { .. } | ProcessError::Io { .. } => self.to_string(),
        }
    }
}

/// Runs one external command per call. All state of a call (pipes, buffers,
/// child handle) is local to it, so calls can run concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    /// Mirror the child's output to our own stdout/stderr while capturing it.
    pub echo: bool,
}

impl ProcessRunner {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    /// Run `spec` to completion. A process still running after `timeout` is
    /// killed with SIGKILL and reaped before `ProcessError::Timeout` is returned.
    /// Dropping the returned future also kills the process.
    pub async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        let command = spec.display();
        debug!(%command, cwd = %spec.cwd.display(), "spawning");

        let start = Instant::now();
        let mut child = group_leader(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn { command: command.clone(), source })?;

        let stdout = Capture::start(child.stdout.take(), self.echo.then(tokio::io::stdout));
        let stderr = Capture::start(child.stderr.take(), self.echo.then(tokio::io::stderr));

        let waited = tokio::time::timeout(timeout, child.wait()).await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(ProcessError::Io { command, source }),
            Err(_) => {
                let pid = child.id();
                warn!(%command, ?pid, timeout_ms = timeout.as_millis() as u64, "timed out, killing");
                kill_process_group(&child);
                if let Err(err) = child.kill().await {
                    warn!(%command, error = %err, "failed to kill timed-out process");
                }
                let (stdout, stderr) = tokio::join!(stdout.finish(), stderr.finish());
                return Err(ProcessError::Timeout {
                    command,
                    timeout_ms: timeout.as_millis() as u64,
                    pid,
                    stdout,
                    stderr,
                });
            }
        };

        let (stdout, stderr) = tokio::join!(stdout.finish(), stderr.finish());
        let duration_ms = start.elapsed().as_millis() as u64;

        match status.code() {
            Some(0) => Ok(ProcessOutput { exit_code: 0, stdout, stderr, duration_ms }),
            code => Err(ProcessError::Failed { command, code, stdout, stderr, duration_ms }),
        }
    }
}

/// A command that becomes the leader of a new process group, so the whole
/// tree it starts can be signalled at once.
pub(crate) fn group_leader(program: &str) -> Command {
    let mut command = Command::new(program);
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// SIGKILL every process in the group led by `child`. The child itself still
/// has to be reaped by the caller.
pub(crate) fn kill_process_group(child: &Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %err, "process group already gone");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Output of one pipe, accumulated by a background task. What has been read
/// stays available even if the pipe never closes.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl Capture {
    fn start<R, W>(pipe: Option<R>, echo: Option<W>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::with_capacity(8192)));
        let task = pipe.map(|reader| tokio::spawn(pump(reader, echo, buffer.clone())));
        Self { buffer, task }
    }

    async fn finish(self) -> String {
        if let Some(mut task) = self.task {
            match tokio::time::timeout(IO_CAPTURE_TIMEOUT, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => warn!(error = %err, "output capture failed"),
                Ok(Err(err)) => warn!(error = %err, "output capture task panicked"),
                Err(_) => {
                    warn!("output pipe still open after process exit, keeping what was read");
                    task.abort();
                }
            }
        }
        let buffer = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

async fn pump<R, W>(mut reader: R, mut echo: Option<W>, sink: Arc<Mutex<Vec<u8>>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        if let Some(out) = echo.as_mut() {
            // Losing the mirror must not lose the capture.
            if out.write_all(&chunk[..n]).await.is_err() || out.flush().await.is_err() {
                echo = None;
            }
        }
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk[..n]);
    }
}
