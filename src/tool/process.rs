//! Running external stage process with streamed output

use crate::error::{Error, Result};
use crate::types::StageKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Read size for each pipe fragment
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Bound on the output channel; readers wait when the consumer falls behind
const OUTPUT_CHANNEL_BUFFER: usize = 64;

/// How much of stderr is kept for error reporting
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// How long a terminated process gets before it is killed outright
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Which pipe a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One raw fragment read from a pipe
///
/// Fragments follow pipe read boundaries, not line boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source pipe
    pub stream: OutputStream,
    /// Bytes as read
    pub bytes: Vec<u8>,
}

/// A spawned stage process
///
/// Both pipes are read by background tasks and funnelled into one channel, so
/// [`next_output`](Self::next_output) yields fragments from either stream in
/// arrival order. The child is killed if this value is dropped.
pub struct StageProcess {
    stage: StageKind,
    child: Child,
    output_rx: mpsc::Receiver<OutputChunk>,
    stderr_tail: Vec<u8>,
}

impl StageProcess {
    /// Spawn `command` with both output pipes captured
    pub fn spawn(stage: StageKind, command: &mut Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::ExternalTool(format!("Failed to execute {} stage: {}", stage, e))
        })?;

        let (tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_pipe(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_pipe(stderr, OutputStream::Stderr, tx));
        }

        tracing::debug!(stage = %stage, pid = ?child.id(), "stage process started");

        Ok(Self {
            stage,
            child,
            output_rx,
            stderr_tail: Vec::new(),
        })
    }

    /// Which stage this process runs
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// OS process id, if the process has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output fragment from either pipe; `None` once both pipes closed
    pub async fn next_output(&mut self) -> Option<OutputChunk> {
        let chunk = self.output_rx.recv().await?;
        if chunk.stream == OutputStream::Stderr {
            self.stderr_tail.extend_from_slice(&chunk.bytes);
            if self.stderr_tail.len() > STDERR_TAIL_BYTES {
                let excess = self.stderr_tail.len() - STDERR_TAIL_BYTES;
                self.stderr_tail.drain(..excess);
            }
        }
        Some(chunk)
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            Error::ExternalTool(format!("Failed to wait for {} stage: {}", self.stage, e))
        })
    }

    /// Last few KiB of stderr seen through [`next_output`](Self::next_output)
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr_tail).trim().to_string()
    }

    /// Ask the process to stop without waiting for it
    ///
    /// Sends SIGTERM (on Unix) and returns immediately. A detached task reaps
    /// the process and kills it if it is still running after
    /// [`TERMINATE_GRACE`].
    pub fn terminate(self) {
        let Self {
            stage, mut child, ..
        } = self;

        let signalled = send_sigterm(&child);
        if !signalled && let Err(e) = child.start_kill() {
            tracing::debug!(stage = %stage, error = %e, "kill failed, process already gone");
        }
        tracing::info!(stage = %stage, pid = ?child.id(), "stage process terminated");

        let reap = async move {
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(stage = %stage, "process ignored SIGTERM, killing");
                    let _ = child.kill().await;
                }
            }
        };

        // Outside a runtime the child is killed when dropped
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(reap);
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to
    // our own not-yet-reaped child.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

async fn forward_pipe<R>(mut pipe: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "pipe read failed");
                break;
            }
        }
    }
}
