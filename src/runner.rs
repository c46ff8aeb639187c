//! Remote test execution.
//!
//! Runs selected test nodes one `docker exec` invocation at a time and turns
//! each result into run events.

use crate::error::{DebugSessionError, RunError};
use crate::failure::{self, ExecFailure, FailureMessage};
use crate::normalize::normalize;
use crate::schema::{DebugConfiguration, Settings};
use crate::tree::{TestNode, TestTreeRegistry, Workspace};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interpreter flag enabling Xdebug step debugging.
const XDEBUG_FLAG: &str = "-dxdebug.mode=debug";

/// Output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs shell command strings, provided by the host.
pub trait CommandExecutor {
    /// Run `command` to completion. A non-zero exit is an `Err`.
    fn execute(&self, command: &str) -> Result<ProcessOutput, ExecFailure>;
}

/// A debugger session started for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSession {
    pub id: String,
    pub name: String,
}

/// Debugger session control, provided by the host.
pub trait DebugSessions {
    /// Whether the user already has a debugger session running.
    fn has_active_session(&self) -> bool;

    fn start(&self, config: &DebugConfiguration) -> Result<DebugSession, DebugSessionError>;

    fn stop(&self, session: &DebugSession) -> Result<(), DebugSessionError>;
}

/// Cooperative cancellation flag shared between the host and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress reported while a run executes, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        id: String,
    },
    Output {
        id: String,
        text: String,
    },
    Passed {
        id: String,
        #[serde(serialize_with = "serialize_duration")]
        duration: Duration,
    },
    Failed {
        id: String,
        messages: Vec<FailureMessage>,
        #[serde(serialize_with = "serialize_duration")]
        duration: Duration,
    },
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    /// Nodes never started because the run was cancelled.
    pub skipped: usize,
    /// Set when the debug session started for the run could not be stopped.
    pub debug_stop_error: Option<String>,
}

/// The nodes a run should execute: `include` if non-empty, else every file
/// node of `tree` in discovery order.
pub fn selection<'a, W: Workspace>(
    tree: &'a TestTreeRegistry<W>,
    include: Vec<&'a TestNode>,
) -> Vec<&'a TestNode> {
    if include.is_empty() {
        tree.roots().collect()
    } else {
        include
    }
}

/// Nodes whose label contains `text`.
///
/// A matching file node is taken whole and its methods are not added again.
pub fn matching<'a, W: Workspace>(tree: &'a TestTreeRegistry<W>, text: &str) -> Vec<&'a TestNode> {
    let mut nodes = Vec::new();
    for file in tree.roots() {
        if file.label.contains(text) {
            nodes.push(file);
        } else {
            nodes.extend(file.children.iter().filter(|m| m.label.contains(text)));
        }
    }
    nodes
}

/// Executes test nodes inside a running container.
pub struct RemoteTestExecutor<E, D> {
    settings: Settings,
    workspace_root: PathBuf,
    commands: E,
    debugger: D,
}

impl<E: CommandExecutor, D: DebugSessions> RemoteTestExecutor<E, D> {
    pub fn new(
        settings: Settings,
        workspace_root: impl Into<PathBuf>,
        commands: E,
        debugger: D,
    ) -> Self {
        Self {
            settings,
            workspace_root: workspace_root.into(),
            commands,
            debugger,
        }
    }

    /// Run `nodes` in order, reporting through `on_event`.
    ///
    /// Fails without emitting anything when the container name is missing or
    /// the debug session cannot be started. Cancellation is checked before
    /// each node; a node already running is never interrupted.
    pub fn run(
        &self,
        nodes: &[&TestNode],
        is_debug: bool,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(RunEvent),
    ) -> Result<RunSummary, RunError> {
        let container_name = self.settings.require_container_name().inspect_err(|e| {
            error!("{e}");
        })?;

        let session = if is_debug && !self.debugger.has_active_session() {
            Some(self.start_debug_session()?)
        } else {
            None
        };

        let mut summary = RunSummary::default();
        for (index, node) in nodes.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.skipped = nodes.len() - index;
                info!("Run cancelled, {} tests not started", summary.skipped);
                break;
            }
            if self.run_node(container_name, node, is_debug, on_event) {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
        }

        if let Some(session) = session {
            info!("Stopping debug session...");
            match self.debugger.stop(&session) {
                Ok(()) => info!("Debug session stopped"),
                Err(e) => {
                    warn!("Error stopping debug session: {e}");
                    summary.debug_stop_error = Some(e.to_string());
                }
            }
        }

        Ok(summary)
    }

    fn start_debug_session(&self) -> Result<DebugSession, RunError> {
        info!("Starting debug session...");
        let config = self
            .settings
            .resolved_debug_configuration(&self.workspace_root)?;
        let session = self.debugger.start(&config).inspect_err(|e| {
            error!("{e}");
        })?;
        debug!(session = %session.id, "Debug session started");
        Ok(session)
    }

    /// Run one node. Returns whether it passed.
    fn run_node(
        &self,
        container_name: &str,
        node: &TestNode,
        is_debug: bool,
        on_event: &mut dyn FnMut(RunEvent),
    ) -> bool {
        on_event(RunEvent::Started {
            id: node.id.clone(),
        });

        let command = self.build_command(container_name, node, is_debug);
        info!("Executing command: {command}");

        let start = Instant::now();
        let result = self.commands.execute(&command);
        let duration = start.elapsed();
        let prefix = &self.settings.container_path;

        match result {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    on_event(RunEvent::Output {
                        id: node.id.clone(),
                        text: normalize(&output.stdout, prefix),
                    });
                }
                on_event(RunEvent::Passed {
                    id: node.id.clone(),
                    duration,
                });
                true
            }
            Err(failure) => {
                let output = normalize(&failure::combine_streams(&failure), prefix);
                debug!("Test execution error: {output}");
                let messages = failure::parse(&output, &node.uri);
                on_event(RunEvent::Output {
                    id: node.id.clone(),
                    text: output,
                });
                on_event(RunEvent::Failed {
                    id: node.id.clone(),
                    messages,
                    duration,
                });
                false
            }
        }
    }

    /// The `docker exec` command line running `node`.
    pub fn build_command(&self, container_name: &str, node: &TestNode, is_debug: bool) -> String {
        let mut command = String::from("docker exec");
        if self.settings.tty {
            command.push_str(" -t");
        }
        command.push(' ');
        command.push_str(container_name);
        command.push_str(" php");
        if is_debug {
            command.push(' ');
            command.push_str(XDEBUG_FLAG);
        }
        command.push(' ');
        command.push_str(&self.settings.phpunit_path);
        if let Some(filter) = node.method_filter() {
            command.push_str(&format!(" --filter \"{filter}\""));
        }
        command.push(' ');
        command.push_str(&self.container_file_path(&node.uri));
        command
    }

    /// Where `path` lives inside the container.
    fn container_file_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.workspace_root).unwrap_or(path);
        let relative: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        format!(
            "{}/{}",
            self.settings.container_path.trim_end_matches('/'),
            relative.join("/")
        )
    }
}
