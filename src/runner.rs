//! External benchmark process supervision
//!
//! The benchmark is an opaque child process. Its stdout and stderr are read
//! line by line, concurrently, and forwarded to an [`OutputSink`]; the runner
//! then waits for the child to exit. There is no timeout and the exit code is
//! reported, not judged.

use std::fmt;
use std::future::Future;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::{Error, Result};

/// Tracing target benchmark output is logged on.
pub const BENCHMARK_LOG_TARGET: &str = "fleetscore::benchmark";

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Child stdout
    Stdout,
    /// Child stderr
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// One line of benchmark output, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Source pipe
    pub stream: OutputStream,
    /// Line text (lossily decoded)
    pub line: String,
}

/// Bounded destination for benchmark output.
///
/// A slow consumer back-pressures the pipe readers. Once the receiving end
/// is dropped, further lines are discarded.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<OutputLine>,
}

impl OutputSink {
    /// Create a sink and the receiver draining it.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutputLine>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Forward one line.
    pub async fn send(&self, stream: OutputStream, line: String) {
        if self.tx.send(OutputLine { stream, line }).await.is_err() {
            debug!("benchmark output receiver closed, dropping line");
        }
    }
}

/// Log every received line on [`BENCHMARK_LOG_TARGET`] until all senders
/// are gone.
pub fn spawn_log_drain(mut rx: mpsc::Receiver<OutputLine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(OutputLine { stream, line }) = rx.recv().await {
            info!(target: BENCHMARK_LOG_TARGET, %stream, "{line}");
        }
    })
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Exit code; `None` if the child was killed by a signal
    pub exit_code: Option<i32>,
    /// Lines forwarded to the sink
    pub lines: usize,
}

impl RunReport {
    /// Whether the child exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Something that produces a fresh results artifact.
pub trait BenchmarkRunner: Send + Sync {
    /// Run the benchmark to completion, streaming its output into `sink`.
    fn run(&self, sink: &OutputSink) -> impl Future<Output = Result<RunReport>> + Send;
}

/// Runs the benchmark as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
}

impl ProcessRunner {
    /// Runner for an already split command line.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `command` is empty.
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut words = command.into_iter();
        let program = words
            .next()
            .ok_or_else(|| Error::Config("benchmark command is empty".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Runner for the configured command, placeholders expanded.
    ///
    /// # Errors
    ///
    /// See [`ProcessRunner::new`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.expanded_command())
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl BenchmarkRunner for ProcessRunner {
    async fn run(&self, sink: &OutputSink) -> Result<RunReport> {
        info!(program = %self.program, args = ?self.args, "launching benchmark");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("failed to launch {}: {e}", self.program))))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("benchmark stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("benchmark stderr not captured")))?;

        let (out_lines, err_lines) = tokio::join!(
            pump(stdout, OutputStream::Stdout, sink),
            pump(stderr, OutputStream::Stderr, sink),
        );
        let status = child.wait().await?;

        let report = RunReport {
            exit_code: status.code(),
            lines: out_lines? + err_lines?,
        };
        info!(exit_code = ?report.exit_code, lines = report.lines, "benchmark finished");
        Ok(report)
    }
}

async fn pump<R>(reader: R, stream: OutputStream, sink: &OutputSink) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(count);
        }
        let text = String::from_utf8_lossy(&buf);
        sink.send(stream, text.trim_end_matches(['\r', '\n']).to_string()).await;
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessRunner {
        ProcessRunner::new(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(ProcessRunner::new(Vec::new()), Err(Error::Config(_))));
    }

    #[test]
    fn test_split_program_and_args() {
        let runner = ProcessRunner::new(vec!["ansible-playbook".into(), "-v".into()]).unwrap();
        assert_eq!(runner.program(), "ansible-playbook");
        assert_eq!(runner.args(), ["-v"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_both_pipes_and_reports_exit() {
        let (sink, mut rx) = OutputSink::channel(16);
        let report = sh("echo first; echo oops >&2; echo second; exit 3")
            .run(&sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(report.exit_code, Some(3));
        assert!(!report.success());
        assert_eq!(report.lines, 3);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        let stdout: Vec<&str> = lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.line.as_str())
            .collect();
        assert_eq!(stdout, ["first", "second"]);
        assert!(lines.contains(&OutputLine {
            stream: OutputStream::Stderr,
            line: "oops".into()
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_larger_than_channel() {
        let (sink, rx) = OutputSink::channel(1);
        let drain = spawn_log_drain(rx);
        let report = sh("for i in 1 2 3 4 5 6 7 8 9 10; do echo line$i; echo err$i >&2; done")
            .run(&sink)
            .await
            .unwrap();
        drop(sink);
        drain.await.unwrap();

        assert!(report.success());
        assert_eq!(report.lines, 20);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_receiver_does_not_fail_run() {
        let (sink, rx) = OutputSink::channel(4);
        drop(rx);
        let report = sh("echo ignored").run(&sink).await.unwrap();
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let (sink, _rx) = OutputSink::channel(4);
        let runner = ProcessRunner::new(vec!["fleetscore-no-such-benchmark".into()]).unwrap();
        assert!(matches!(runner.run(&sink).await, Err(Error::Io(_))));
    }
}
