//! Supervised shell processes keyed by tool-call id.
//!
//! The engine owns the table of live children and the cached elevation
//! credential. Every path that observes a process ending (exit, kill, spawn or
//! wait failure) removes that id's record.

use crate::credential::ElevationCredential;
use crate::error::ExecError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use techie_interfaces::{ClientEvent, EventSink, OutputStream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Appended to stderr of a process that was killed.
pub const CANCEL_MARKER: &str = "\n^C";

const READ_BUF_SIZE: usize = 4096;

/// How long to keep reading pipes after a kill before giving up on them.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(2);

/// How long pipes may stay open once the shell has exited. Background
/// children can hold them open indefinitely.
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(2);

/// Shell used to interpret command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    pub program: String,
    pub flag: String,
}

impl Shell {
    pub fn new(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", "/C")
        } else {
            Self::new("sh", "-c")
        }
    }

    /// Shell at `program`, paired with the command flag its family expects.
    pub fn from_program(program: &str) -> Self {
        let name = Path::new(program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let flag = match name.as_str() {
            "cmd" => "/C",
            "powershell" | "pwsh" => "-Command",
            _ => "-c",
        };
        Self::new(program, flag)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Commands used for privilege elevation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationConfig {
    /// Run with the secret on stdin; exit code 0 means the secret is valid.
    pub probe_command: String,
    /// Replaces the leading `sudo` of an elevated command. Must read the
    /// secret from stdin.
    pub command_prefix: String,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            probe_command: "sudo -S -p '' -v".to_string(),
            command_prefix: "sudo -S -p ''".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// False only when the process was killed by a signal.
    pub success: bool,
}

struct RunningProcess {
    token: u64,
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
}

pub struct ProcessEngine {
    shell: Shell,
    elevation: ElevationConfig,
    events: Arc<dyn EventSink>,
    processes: Mutex<HashMap<String, RunningProcess>>,
    credential: Mutex<Option<ElevationCredential>>,
    next_token: AtomicU64,
}

impl ProcessEngine {
    pub fn new(shell: Shell, events: Arc<dyn EventSink>) -> Self {
        Self {
            shell,
            elevation: ElevationConfig::default(),
            events,
            processes: Mutex::new(HashMap::new()),
            credential: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn with_elevation(mut self, elevation: ElevationConfig) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Check `credential` with the elevation probe and cache it on success.
    /// Any failure clears the cache.
    pub async fn validate_elevation(
        &self,
        credential: ElevationCredential,
    ) -> Result<bool, ExecError> {
        if cfg!(windows) {
            return Err(ExecError::Unsupported);
        }

        let valid = if credential.is_empty() {
            false
        } else {
            match self.run_probe(&credential).await {
                Ok(valid) => valid,
                Err(e) => {
                    warn!("Elevation probe could not run: {}", e);
                    false
                }
            }
        };

        *self.credential.lock() = if valid { Some(credential) } else { None };
        info!(valid, "Elevation credential checked");
        Ok(valid)
    }

    pub fn has_elevation(&self) -> bool {
        self.credential.lock().is_some()
    }

    pub fn clear_elevation(&self) {
        if self.credential.lock().take().is_some() {
            info!("Elevation credential cleared");
        }
    }

    /// Run `command` through the shell under `id`, streaming its output as
    /// [`ClientEvent::CommandOutput`] events.
    pub async fn execute(&self, command: &str, id: &str) -> Result<ExecOutput, ExecError> {
        let command = command.trim();
        let elevated = is_elevated(command);

        let credential = if elevated {
            match self.credential.lock().clone() {
                Some(credential) => Some(credential),
                None => {
                    warn!(id = %id, "Elevated command without a cached credential");
                    return Err(ExecError::NoCredential);
                }
            }
        } else {
            None
        };

        let script = if elevated {
            self.elevated_script(command)
        } else {
            command.to_string()
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut processes = self.processes.lock();
            if processes.contains_key(id) {
                return Err(ExecError::AlreadyRunning(id.to_string()));
            }
            processes.insert(
                id.to_string(),
                RunningProcess {
                    token,
                    pid: None,
                    kill: kill_tx,
                },
            );
        }

        info!(id = %id, elevated, "Executing command: {}", command);

        let mut child = match self.spawn(&script, credential.is_some()) {
            Ok(child) => child,
            Err(e) => {
                self.release(id, token);
                warn!(id = %id, "Failed to spawn: {}", e);
                self.finished(id, false);
                return Err(ExecError::Spawn(e.to_string()));
            }
        };

        if let Some(record) = self.processes.lock().get_mut(id) {
            if record.token == token {
                record.pid = child.id();
            }
        }

        if let Some(credential) = &credential {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(&credential.stdin_line()).await {
                    debug!(id = %id, "Could not hand credential to process: {}", e);
                }
            }
        }

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut pumps = tokio::spawn({
            let stdout = pump(
                child.stdout.take(),
                id.to_string(),
                OutputStream::Stdout,
                Arc::clone(&self.events),
                Arc::clone(&stdout_buf),
            );
            let stderr = pump(
                child.stderr.take(),
                id.to_string(),
                OutputStream::Stderr,
                Arc::clone(&self.events),
                Arc::clone(&stderr_buf),
            );
            async move {
                tokio::join!(stdout, stderr);
            }
        });

        let mut kill_rx = kill_rx;
        let mut killed = false;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut kill_rx => {
                killed = true;
                if let Err(e) = child.kill().await {
                    debug!(id = %id, "Kill after cancel failed: {}", e);
                }
                child.wait().await
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.release(id, token);
                pumps.abort();
                warn!(id = %id, "Failed to wait for process: {}", e);
                self.finished(id, false);
                return Err(ExecError::Wait(e.to_string()));
            }
        };

        // The record stays until the pipes close so a cancel still reaches
        // children the shell left running.
        let mut pipes_closed = false;
        if !killed {
            tokio::select! {
                joined = tokio::time::timeout(DRAIN_AFTER_EXIT, &mut pumps) => {
                    pipes_closed = joined.is_ok();
                    if !pipes_closed {
                        debug!(id = %id, "Output pipes still open after exit");
                    }
                }
                _ = &mut kill_rx => killed = true,
            }
        }

        self.release(id, token);

        if !pipes_closed {
            let drained =
                killed && tokio::time::timeout(DRAIN_AFTER_KILL, &mut pumps).await.is_ok();
            if !drained {
                pumps.abort();
            }
        }

        let stdout = std::mem::take(&mut *stdout_buf.lock());
        let mut stderr = std::mem::take(&mut *stderr_buf.lock());

        let (exit_code, signalled) = exit_details(&status);
        let success = !killed && !signalled;
        if !success {
            stderr.push_str(CANCEL_MARKER);
        }

        info!(id = %id, exit_code, success, "Command finished");
        self.finished(id, success);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            success,
        })
    }

    /// Kill the process running under `id`. Returns false if there was none.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(record) = self.processes.lock().remove(id) else {
            return false;
        };
        info!(id = %id, "Cancelling process");
        terminate(record);
        true
    }

    /// Kill every tracked process. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let records: Vec<(String, RunningProcess)> = self.processes.lock().drain().collect();
        let count = records.len();
        for (id, record) in records {
            info!(id = %id, "Cancelling process");
            terminate(record);
        }
        count
    }

    pub fn has_active(&self) -> bool {
        !self.processes.lock().is_empty()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn spawn(&self, script: &str, pipe_stdin: bool) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.shell.program);
        cmd.arg(&self.shell.flag)
            .arg(script)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Lead a fresh process group so a cancel reaches the shell's children.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }

    async fn run_probe(&self, credential: &ElevationCredential) -> std::io::Result<bool> {
        let mut child = Command::new(&self.shell.program)
            .arg(&self.shell.flag)
            .arg(&self.elevation.probe_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&credential.stdin_line()).await {
                debug!("Could not hand credential to elevation probe: {}", e);
            }
        }

        Ok(child.wait().await?.success())
    }

    fn elevated_script(&self, command: &str) -> String {
        let rest = command.strip_prefix("sudo").unwrap_or(command).trim_start();
        format!("{} {}", self.elevation.command_prefix, rest)
    }

    /// Drop the record for `id` if it still belongs to this execution.
    fn release(&self, id: &str, token: u64) {
        let mut processes = self.processes.lock();
        if processes.get(id).is_some_and(|record| record.token == token) {
            processes.remove(id);
        }
    }

    fn finished(&self, id: &str, success: bool) {
        self.events.emit(ClientEvent::CommandFinished {
            id: id.to_string(),
            success,
        });
    }
}

fn is_elevated(command: &str) -> bool {
    command.split_whitespace().next() == Some("sudo")
}

fn terminate(record: RunningProcess) {
    #[cfg(unix)]
    {
        if let Some(pid) = record.pid {
            // SAFETY: killpg only sends a signal; a stale group id fails with ESRCH.
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    let _ = record.kill.send(());
}

fn exit_details(status: &ExitStatus) -> (i32, bool) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, true);
        }
    }
    (status.code().unwrap_or(-1), false)
}

async fn pump<R>(
    reader: Option<R>,
    id: String,
    stream: OutputStream,
    events: Arc<dyn EventSink>,
    buffer: Arc<Mutex<String>>,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(id = %id, "Output pipe read failed: {}", e);
                break;
            }
        };
        let chunk = decoder.decode(&buf[..n]);
        publish(&id, stream, chunk, &events, &buffer);
    }

    publish(&id, stream, decoder.finish(), &events, &buffer);
}

fn publish(
    id: &str,
    stream: OutputStream,
    chunk: String,
    events: &Arc<dyn EventSink>,
    buffer: &Mutex<String>,
) {
    if chunk.is_empty() {
        return;
    }
    buffer.lock().push_str(&chunk);
    events.emit(ClientEvent::CommandOutput {
        id: id.to_string(),
        stream,
        chunk,
    });
}

/// Decodes a byte stream as UTF-8 without splitting multi-byte characters
/// across chunk boundaries.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => self.finish(),
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
