//! `scqueryqc` command building and execution.
//!
//! The QC tool reads waveform quality parameters from the SeisComP database
//! and writes them to stdout as XML. This module builds its command line
//! from a resolved request, runs it in the background and reports advisory
//! progress while output streams in.

use crate::config::{ProgressConfig, ToolConfig};
use crate::logging::{self, DataSource};
use crate::model::{QcError, QueryWindow, StreamKey};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

// ============================================================================
// Command descriptor
// ============================================================================

/// Everything needed to run one QC query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCommand {
    pub program: String,
    /// Database URI handed to the tool with `-d`; omitted when empty.
    pub database: String,
    /// Pass `-f` (formatted XML output).
    pub formatted: bool,
    pub window: QueryWindow,
    /// Parameter names in request order.
    pub parameters: Vec<String>,
    pub streams: Vec<StreamKey>,
}

impl QueryCommand {
    pub fn new(
        tool: &ToolConfig,
        window: QueryWindow,
        parameters: &BTreeSet<String>,
        streams: &BTreeSet<StreamKey>,
    ) -> Self {
        Self {
            program: tool.program.clone(),
            database: tool.database.clone(),
            formatted: tool.formatted,
            window,
            parameters: parameters.iter().cloned().collect(),
            streams: streams.iter().cloned().collect(),
        }
    }

    /// `-p` value as shown on a shell command line: names containing spaces
    /// are double-quoted.
    pub fn quoted_parameter_list(&self) -> String {
        self.parameters
            .iter()
            .map(|p| if p.contains(' ') { format!("\"{}\"", p) } else { p.clone() })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `-i` value: comma-joined `NET.STA.LOC.CHA` patterns.
    pub fn stream_list(&self) -> String {
        self.streams.iter().map(StreamKey::pattern).collect::<Vec<_>>().join(",")
    }

    /// The argument vector passed to the process. No shell is involved, so
    /// parameter names are not quoted.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.database.is_empty() {
            args.push("-d".to_string());
            args.push(self.database.clone());
        }
        if self.formatted {
            args.push("-f".to_string());
        }
        args.push("-b".to_string());
        args.push(self.window.start_str());
        args.push("-e".to_string());
        args.push(self.window.end_str());
        args.push("-p".to_string());
        args.push(self.parameters.join(","));
        args.push("-i".to_string());
        args.push(self.stream_list());
        args
    }

    /// Human-readable shell form, used for logging.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        if !self.database.is_empty() {
            line.push_str(&format!(" -d {}", self.database));
        }
        if self.formatted {
            line.push_str(" -f");
        }
        line.push_str(&format!(
            " -b '{}' -e '{}' -p {} -i {}",
            self.window.start_str(),
            self.window.end_str(),
            self.quoted_parameter_list(),
            self.stream_list()
        ));
        line
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Rough output size in bytes for a query:
/// streams × parameters × (hours × samples/hour) × bytes/sample.
/// Only drives the progress indicator.
pub fn estimate_total_bytes(streams: usize, parameters: usize, window: &QueryWindow, heuristics: &ProgressConfig) -> f64 {
    let hours = window.hours().max(0.0);
    let points = streams as f64 * parameters as f64 * hours * heuristics.samples_per_hour;
    (points * heuristics.bytes_per_sample).max(0.0)
}

/// Publishes `min(bytes_read / estimate, 1.0)` to a watch channel, only ever
/// increasing.
#[derive(Debug)]
pub struct ProgressTracker {
    estimated_total: f64,
    bytes_read: u64,
    last: f64,
    sender: watch::Sender<f64>,
}

impl ProgressTracker {
    /// Creates a tracker and the receiver observers subscribe to. The
    /// channel starts at 0.0.
    pub fn new(estimated_total: f64) -> (Self, watch::Receiver<f64>) {
        let (sender, receiver) = watch::channel(0.0);
        (
            Self {
                estimated_total,
                bytes_read: 0,
                last: 0.0,
                sender,
            },
            receiver,
        )
    }

    /// A tracker nobody listens to.
    pub fn detached() -> Self {
        Self::new(0.0).0
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn current(&self) -> f64 {
        self.last
    }

    /// Records `bytes` more output.
    pub fn advance(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
        let fraction = if self.estimated_total > 0.0 {
            (self.bytes_read as f64 / self.estimated_total).min(1.0)
        } else if self.bytes_read > 0 {
            1.0
        } else {
            0.0
        };
        self.publish(fraction);
    }

    /// Marks the fetch as complete.
    pub fn finish(&mut self) {
        self.publish(1.0);
    }

    fn publish(&mut self, fraction: f64) {
        if fraction > self.last {
            self.last = fraction;
            // receivers may all be gone; progress is advisory
            let _ = self.sender.send(fraction);
        }
    }
}

// ============================================================================
// Fetchers
// ============================================================================

/// Source of raw QC XML for a command.
#[async_trait]
pub trait MetricFetcher: Send + Sync {
    /// Runs `command` to completion and returns its full output.
    async fn fetch(&self, command: &QueryCommand, progress: &mut ProgressTracker) -> Result<String, QcError>;
}

/// Runs the real tool as a child process.
#[derive(Debug, Clone, Default)]
pub struct ScqueryqcFetcher {
    /// Arguments placed before the generated ones, e.g. a wrapper script's
    /// own options.
    pub leading_args: Vec<String>,
}

impl ScqueryqcFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leading_args(leading_args: Vec<String>) -> Self {
        Self { leading_args }
    }
}

#[async_trait]
impl MetricFetcher for ScqueryqcFetcher {
    async fn fetch(&self, command: &QueryCommand, progress: &mut ProgressTracker) -> Result<String, QcError> {
        logging::info(DataSource::Tool, None, &format!("Running command: {}", command.command_line()));

        let mut child = Command::new(&command.program)
            .args(&self.leading_args)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QcError::ToolExecution(format!("failed to start {}: {}", command.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QcError::ToolExecution("stdout was not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| QcError::ToolExecution("stderr was not captured".to_string()))?;

        // drain stderr concurrently so a chatty tool cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        let mut reader = BufReader::new(stdout);
        let mut output = Vec::new();
        loop {
            let n = reader.read_until(b'\n', &mut output).await?;
            if n == 0 {
                break;
            }
            progress.advance(n);
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let diagnostic = if stderr_text.trim().is_empty() {
                format!("exited with {}", status)
            } else {
                stderr_text.trim_end().to_string()
            };
            let err = QcError::ToolExecution(diagnostic);
            logging::log_tool_failure(&command.command_line(), &err);
            return Err(err);
        }

        let output = String::from_utf8(output)
            .map_err(|e| QcError::MalformedData(format!("QC output is not valid UTF-8: {}", e)))?;

        progress.finish();
        logging::debug(
            DataSource::Tool,
            None,
            &format!("read {} bytes of QC output", progress.bytes_read()),
        );
        Ok(output)
    }
}

// ============================================================================
// Tests
// ============================================================================
