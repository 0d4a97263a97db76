//! GHCi session handle: owns the interpreter subprocess.
//!
//! Output lines and the final exit are delivered as [`SessionEvent`]s on a
//! channel shared by every session the server starts; each event carries the
//! generation of the session that produced it. Commands are fire-and-forget.

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

/// How long the exit watcher waits for buffered output after the process is
/// gone. A grandchild still holding the pipes must not stall the exit event.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GhciEvent {
    Stdout(String),
    Stderr(String),
    Exited(ExitReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionEvent {
    pub generation: u64,
    pub event: GhciEvent,
}

/// How the GHCi process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "status {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start GHCi with `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("GHCi exited with {0}")]
    Exited(ExitReport),
    #[error("GHCi stdin is closed")]
    StdinClosed,
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

pub(crate) struct GhciSession {
    generation: u64,
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl GhciSession {
    /// Spawn `command` through the platform shell in `cwd`.
    pub fn spawn(
        command: &str,
        cwd: &Path,
        generation: u64,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let spawn_error = |source| SessionError::Spawn {
            command: command.to_string(),
            source,
        };
        let missing_pipe = |name: &str| spawn_error(std::io::Error::other(format!("no {name}")));

        let mut child = shell_command(command)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(command) = stdin_rx.recv().await {
                let line = format!("{command}\n");
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!("GHCi stdin write error: {e}");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::warn!("GHCi stdin flush error: {e}");
                    break;
                }
            }
        });

        let stdout_task = tokio::spawn(forward_lines(
            stdout,
            generation,
            GhciEvent::Stdout,
            event_tx.clone(),
        ));
        let stderr_task = tokio::spawn(forward_lines(
            stderr,
            generation,
            GhciEvent::Stderr,
            event_tx.clone(),
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(async move {
            let report = watch_exit(child, kill_rx).await;
            // Deliver the tail of the output before the exit itself.
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            })
            .await;
            if drained.is_err() {
                tracing::debug!("GHCi output still open after exit; not waiting further");
            }
            let _ = event_tx.send(SessionEvent {
                generation,
                event: GhciEvent::Exited(report),
            });
        });

        Ok(Self {
            generation,
            stdin_tx,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue one command line. Returns before GHCi has read it.
    pub fn send(&self, command: &str) -> Result<(), SessionError> {
        self.stdin_tx
            .send(command.to_string())
            .map_err(|_| SessionError::StdinClosed)
    }

    /// Ask the process to die. The `Exited` event follows once it has.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn watch_exit(mut child: Child, kill_rx: oneshot::Receiver<()>) -> ExitReport {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("GHCi kill failed: {e}");
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => ExitReport::from_status(status),
        Err(e) => {
            tracing::warn!("Waiting for GHCi failed: {e}");
            ExitReport {
                code: None,
                signal: None,
            }
        }
    }
}

/// Forward each output line, decoding lossily. GHCi echoes source text, and
/// a stray non-UTF-8 byte must not end the stream.
async fn forward_lines<R: AsyncRead + Unpin>(
    stream: R,
    generation: u64,
    wrap: fn(String) -> GhciEvent,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = strip_line_ending(&buf);
                let event = SessionEvent {
                    generation,
                    event: wrap(String::from_utf8_lossy(line).into_owned()),
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Reading GHCi output failed: {e}");
                break;
            }
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
