//! Run reporting: collects run events into per-node results and renders them.

use crate::failure::FailureMessage;
use crate::runner::{RunEvent, RunSummary};
use crate::tree::{NodeKind, TestNode};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The outcome of one executed node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub id: String,
    pub label: String,
    pub file: PathBuf,
    pub kind: NodeKind,
    pub passed: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureMessage>,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Accumulates the events of one run.
#[derive(Debug)]
pub struct RunReport {
    workspace_root: PathBuf,
    nodes: HashMap<String, (String, PathBuf, NodeKind)>,
    outputs: HashMap<String, String>,
    results: Vec<NodeResult>,
    skipped: usize,
    debug_stop_error: Option<String>,
    started_at: DateTime<Local>,
    total_time: Duration,
}

impl RunReport {
    /// A report for a run over `selection`.
    pub fn new(workspace_root: impl Into<PathBuf>, selection: &[&TestNode]) -> Self {
        let nodes = selection
            .iter()
            .map(|n| (n.id.clone(), (n.label.clone(), n.uri.clone(), n.kind)))
            .collect();
        Self {
            workspace_root: workspace_root.into(),
            nodes,
            outputs: HashMap::new(),
            results: Vec::new(),
            skipped: 0,
            debug_stop_error: None,
            started_at: Local::now(),
            total_time: Duration::ZERO,
        }
    }

    pub fn record(&mut self, event: RunEvent) {
        match event {
            RunEvent::Started { .. } => {}
            RunEvent::Output { id, text } => {
                self.outputs.entry(id).or_default().push_str(&text);
            }
            RunEvent::Passed { id, duration } => self.push(id, true, duration, Vec::new()),
            RunEvent::Failed {
                id,
                messages,
                duration,
            } => self.push(id, false, duration, messages),
        }
    }

    fn push(&mut self, id: String, passed: bool, duration: Duration, failures: Vec<FailureMessage>) {
        let (label, file, kind) = self
            .nodes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| (id.clone(), PathBuf::new(), NodeKind::Method));
        let output = self.outputs.remove(&id).unwrap_or_default();
        self.results.push(NodeResult {
            id,
            label,
            file,
            kind,
            passed,
            duration,
            output,
            failures,
        });
    }

    /// Record the end of the run.
    pub fn finish(&mut self, summary: &RunSummary, total_time: Duration) {
        self.skipped = summary.skipped;
        self.debug_stop_error = summary.debug_stop_error.clone();
        self.total_time = total_time;
    }

    pub fn results(&self) -> &[NodeResult] {
        &self.results
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Path of `file` relative to the workspace, for display.
    fn display_path(&self, file: &Path) -> String {
        file.strip_prefix(&self.workspace_root)
            .unwrap_or(file)
            .display()
            .to_string()
    }

    /// Results grouped by file, in first-seen order.
    fn by_file(&self) -> Vec<(&Path, Vec<&NodeResult>)> {
        let mut groups: Vec<(&Path, Vec<&NodeResult>)> = Vec::new();
        for result in &self.results {
            match groups.iter_mut().find(|(file, _)| *file == result.file.as_path()) {
                Some((_, members)) => members.push(result),
                None => groups.push((&result.file, vec![result])),
            }
        }
        groups
    }

    pub fn render_human(&self, verbose: bool) -> String {
        let mut out = String::new();
        for (file, results) in self.by_file() {
            let _ = writeln!(out, "\n{}", self.display_path(file));
            for result in results {
                let mark = if result.passed { '✓' } else { '✗' };
                let _ = writeln!(out, "  {mark} {} ({:.2?})", result.label, result.duration);
                for failure in &result.failures {
                    let _ = writeln!(out, "    {}", failure.summary());
                    let _ = writeln!(
                        out,
                        "      at {}:{}",
                        self.display_path(&failure.location.uri),
                        failure.location.line + 1
                    );
                }
                if verbose && !result.output.is_empty() {
                    for line in result.output.lines() {
                        let _ = writeln!(out, "    | {line}");
                    }
                }
            }
        }

        if let Some(error) = &self.debug_stop_error {
            let _ = writeln!(out, "\nwarning: {error}");
        }
        let _ = write!(out, "\n{} passed, {} failed", self.passed(), self.failed());
        if self.skipped > 0 {
            let _ = write!(out, ", {} skipped", self.skipped);
        }
        out.push('\n');
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.passed(),
            "failed": self.failed(),
            "skipped": self.skipped,
            "time": self.total_time.as_secs_f64(),
            "debugStopError": self.debug_stop_error,
            "results": self.results,
        })
    }

    /// JUnit XML with one testsuite per test file.
    pub fn render_junit(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let _ = writeln!(
            xml,
            "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
            self.results.len(),
            self.failed(),
            self.skipped,
            self.total_time.as_secs_f64(),
            self.started_at.format("%Y-%m-%dT%H:%M:%S")
        );

        for (file, results) in self.by_file() {
            let name = self.display_path(file);
            let failures = results.iter().filter(|r| !r.passed).count();
            let time: Duration = results.iter().map(|r| r.duration).sum();
            let _ = writeln!(
                xml,
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" time=\"{:.3}\">",
                escape_xml(&name),
                results.len(),
                time.as_secs_f64()
            );

            for result in results {
                let _ = writeln!(
                    xml,
                    "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
                    escape_xml(&result.label),
                    escape_xml(&name),
                    result.duration.as_secs_f64()
                );
                if !result.passed {
                    let message = result
                        .failures
                        .first()
                        .map(FailureMessage::summary)
                        .unwrap_or("Test failed");
                    let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                    for failure in &result.failures {
                        let _ = writeln!(xml, "{}", escape_xml(&failure.text));
                    }
                    xml.push_str("      </failure>\n");
                }
                if !result.output.is_empty() {
                    let _ = writeln!(
                        xml,
                        "      <system-out>{}</system-out>",
                        escape_xml(&result.output)
                    );
                }
                xml.push_str("    </testcase>\n");
            }

            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
