//! Local implementations of the host collaborators used by the CLI.

use crate::error::{DebugSessionError, DiscoveryError};
use crate::failure::ExecFailure;
use crate::loader;
use crate::runner::{CommandExecutor, DebugSession, DebugSessions, ProcessOutput};
use crate::schema::DebugConfiguration;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The workspace on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl crate::tree::Workspace for LocalWorkspace {
    fn find_files(&self, include: &str, exclude: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
        loader::find_files(&self.root, include, exclude)
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How long a timed-out command's readers get to drain what is left in the pipes.
const READER_GRACE: Duration = Duration::from_millis(250);

/// Output collected from a pipe as it arrives.
type SharedBuffer = Arc<Mutex<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(mut pipe: R) -> (SharedBuffer, JoinHandle<()>) {
    let buffer = SharedBuffer::default();
    let sink = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        while let Ok(n) = pipe.read(&mut chunk) {
            if n == 0 {
                break;
            }
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    });
    (buffer, handle)
}

fn snapshot(buffer: &SharedBuffer) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn exit_message(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Command failed with exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Command terminated by signal {signal}");
        }
    }
    "Command failed".to_string()
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, command: &str) -> Result<ProcessOutput, ExecFailure> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ExecFailure {
            message: Some(format!("Failed to spawn: {e}")),
            ..ExecFailure::default()
        })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let collect = |pipe: &Option<(SharedBuffer, JoinHandle<()>)>| {
            pipe.as_ref().map(|(buf, _)| snapshot(buf)).unwrap_or_default()
        };

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(timeout) = self.timeout
                        && start.elapsed() > timeout
                    {
                        let _ = child.kill();
                        let _ = child.wait();
                        debug!("Killed command after {}s", timeout.as_secs());
                        // Grandchildren may keep a pipe open; their readers are left detached.
                        let deadline = Instant::now() + READER_GRACE;
                        for (_, handle) in stdout.iter().chain(stderr.iter()) {
                            while !handle.is_finished() && Instant::now() < deadline {
                                thread::sleep(Duration::from_millis(5));
                            }
                        }
                        return Err(ExecFailure {
                            stdout: Some(collect(&stdout)),
                            stderr: Some(collect(&stderr)),
                            message: Some(format!(
                                "Command timed out after {}s",
                                timeout.as_secs()
                            )),
                        });
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return Err(ExecFailure {
                        message: Some(format!("Failed to wait: {e}")),
                        ..ExecFailure::default()
                    });
                }
            }
        };

        let finish = |pipe: Option<(SharedBuffer, JoinHandle<()>)>| match pipe {
            Some((buffer, handle)) => {
                let _ = handle.join();
                snapshot(&buffer)
            }
            None => String::new(),
        };
        let (out, err) = (finish(stdout), finish(stderr));

        if status.success() {
            Ok(ProcessOutput {
                stdout: out,
                stderr: err,
            })
        } else {
            Err(ExecFailure {
                stdout: Some(out),
                stderr: Some(err),
                message: Some(exit_message(status)),
            })
        }
    }
}

/// Debug sessions for a terminal host.
///
/// There is no debugger UI to drive, so starting a session only announces
/// where the debug client is expected to listen. The user's own editor does
/// the listening.
#[derive(Debug, Clone, Default)]
pub struct PassiveDebugSessions;

impl DebugSessions for PassiveDebugSessions {
    fn has_active_session(&self) -> bool {
        false
    }

    fn start(&self, config: &DebugConfiguration) -> Result<DebugSession, DebugSessionError> {
        if config.port == 0 {
            return Err(DebugSessionError::Start(format!(
                "{}: debug port must not be 0",
                config.name
            )));
        }
        info!(
            "Expecting a {} debug client \"{}\" on port {}",
            config.kind, config.name, config.port
        );
        for (remote, local) in &config.path_mappings {
            debug!("Path mapping {remote} -> {local}");
        }
        Ok(DebugSession {
            id: format!("{}:{}", config.kind, config.port),
            name: config.name.clone(),
        })
    }

    fn stop(&self, session: &DebugSession) -> Result<(), DebugSessionError> {
        debug!("Releasing debug session {}", session.id);
        Ok(())
    }
}
