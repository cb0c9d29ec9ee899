//! Child process execution.
//!
//! The spawner owns everything platform-specific about a step: launching the
//! child, echoing and decoding its stdout, and settling it once the extraction
//! pass asks to stop early.
use super::CancelToken;
use crate::env::EnvMap;
use crate::error::PipetError;
use crate::extract::EarlyExit;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

const READ_CHUNK_BYTES: usize = 8192;

/// Fully resolved launch of one process step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Complete child environment; nothing else is inherited.
    pub env: EnvMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub description: String,
}

impl ExitReport {
    pub fn code(code: i32) -> Self {
        Self {
            success: code == 0,
            description: format!("exit code {code}"),
        }
    }
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::code(code);
        }
        Self {
            success: false,
            description: signal_description(&status),
        }
    }
}

#[cfg(unix)]
fn signal_description(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("signal {signal}"),
        None => "terminated".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_description(_status: &ExitStatus) -> String {
    "terminated".to_string()
}

/// How a spawned step settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// The child closed stdout and exited on its own.
    Exited(ExitReport),
    /// A continue-early rule fired; the child is left running.
    Continued,
    /// An abort-early rule fired and the child was terminated.
    Aborted,
    /// The run was cancelled while the child was running.
    Cancelled,
}

/// Launches a process step and feeds its stdout to `on_chunk` as it arrives.
///
/// `on_chunk` receives decoded text in arrival order and returns an early-exit
/// request once the extraction pass raises one; the spawner must then stop
/// reading and settle the child accordingly.
pub trait ProcessSpawner {
    fn spawn(
        &self,
        request: &SpawnRequest,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&str) -> Option<EarlyExit>,
    ) -> Result<Settled, PipetError>;
}

/// Spawns real child processes with std's `Command`.
#[derive(Debug, Clone)]
pub struct SystemSpawner {
    /// Mirror child stdout to the host's stdout.
    pub echo: bool,
}

impl Default for SystemSpawner {
    fn default() -> Self {
        Self { echo: true }
    }
}

impl ProcessSpawner for SystemSpawner {
    fn spawn(
        &self,
        request: &SpawnRequest,
        cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&str) -> Option<EarlyExit>,
    ) -> Result<Settled, PipetError> {
        let label = request.label.as_str();
        let mut child = Command::new(&request.program)
            .args(&request.args)
            .env_clear()
            .envs(&request.env)
            .current_dir(&request.cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| PipetError::Spawn {
                label: label.to_string(),
                message: err.to_string(),
            })?;
        tracing::debug!(label, pid = child.id(), "spawned");

        let Some(mut stdout) = child.stdout.take() else {
            terminate(&mut child, label)?;
            return Err(io_error(label, "stdout was not captured"));
        };
        let mut decoder = Utf8Decoder::default();
        let mut buf = [0_u8; READ_CHUNK_BYTES];
        loop {
            if cancel.is_cancelled() {
                drop(stdout);
                terminate(&mut child, label)?;
                return Ok(Settled::Cancelled);
            }
            let read = match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    drop(stdout);
                    terminate(&mut child, label)?;
                    return Err(io_error(label, err));
                }
            };
            let bytes = &buf[..read];
            if self.echo {
                echo(bytes);
            }
            let text = decoder.decode(bytes);
            if text.is_empty() {
                continue;
            }
            if let Some(early_exit) = on_chunk(&text) {
                return self.settle_early(child, stdout, early_exit, label);
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            if let Some(early_exit) = on_chunk(&tail) {
                return self.settle_early(child, stdout, early_exit, label);
            }
        }
        let status = child.wait().map_err(|err| io_error(label, err))?;
        Ok(Settled::Exited(status.into()))
    }
}

impl SystemSpawner {
    fn settle_early(
        &self,
        mut child: Child,
        stdout: ChildStdout,
        early_exit: EarlyExit,
        label: &str,
    ) -> Result<Settled, PipetError> {
        match early_exit {
            EarlyExit::Abort => {
                drop(stdout);
                terminate(&mut child, label)?;
                tracing::warn!(label, "abort requested by output; child terminated");
                Ok(Settled::Aborted)
            }
            EarlyExit::Continue => {
                detach(child, stdout, self.echo);
                tracing::info!(label, "continued early");
                Ok(Settled::Continued)
            }
        }
    }
}

/// Leave a child running: keep draining its stdout so it never blocks on a
/// full pipe, then reap it.
fn detach(mut child: Child, mut stdout: ChildStdout, echo_output: bool) {
    std::thread::spawn(move || {
        let mut buf = [0_u8; READ_CHUNK_BYTES];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => {
                    if echo_output {
                        echo(&buf[..read]);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if let Err(err) = child.wait() {
            tracing::warn!(error = %err, "reap detached child");
        }
    });
}

/// Kill the child unless it already exited, then reap it.
fn terminate(child: &mut Child, label: &str) -> Result<(), PipetError> {
    if child.try_wait().map_err(|err| io_error(label, err))?.is_some() {
        return Ok(());
    }
    if let Err(err) = child.kill() {
        // Already exited between the poll and the kill.
        if err.kind() != ErrorKind::InvalidInput {
            return Err(io_error(label, err));
        }
    }
    child.wait().map_err(|err| io_error(label, err))?;
    Ok(())
}

fn echo(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = stdout.write_all(bytes).and_then(|()| stdout.flush()) {
        tracing::warn!(error = %err, "echo child output");
    }
}

fn io_error(label: &str, err: impl std::fmt::Display) -> PipetError {
    PipetError::Io {
        label: label.to_string(),
        message: err.to_string(),
    }
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// A multi-byte character split between two reads is held back until its
/// remaining bytes arrive; invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a trailing incomplete sequence at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
