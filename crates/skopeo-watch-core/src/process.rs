//! Supervision of a single skopeo child process.
//!
//! [`ProcessCoordinator::run`] spawns the command, feeds its stderr through a
//! [`ProgressParser`] on one reader task, drains stdout in the calling future
//! and enforces the optional deadline. Every failure mode ends up in the
//! returned [`TransferOutput`]; nothing is retried.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MissingPipeSnafu, ProcessError, SpawnSnafu, WaitSnafu};
use crate::progress::{BlobRegistry, ProgressParser, ProgressUpdate};
use crate::tracker::OperationOutcome;
use crate::types::OperationKind;

/// Bounded wait for either output stream after the child is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Program and arguments for one skopeo invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub operation: OperationKind,
    pub program: String,
    pub args: Vec<String>,
}

impl TransferCommand {
    pub fn new(operation: OperationKind, program: impl Into<String>) -> Self {
        Self {
            operation,
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `<program> <subcommand> <operands...>` for `operation`.
    pub fn skopeo<I, S>(operation: OperationKind, program: impl Into<String>, operands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(operation, program)
            .arg(operation.subcommand())
            .args(operands)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The binary could not be started.
    Spawn,
    /// The deadline elapsed and the child was killed.
    Timeout,
    /// Non-zero exit with no error line in the output.
    ExitStatus,
    /// Non-zero exit with an error line parsed from the output.
    Diagnostic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Spawn => "spawn",
            FailureKind::Timeout => "timeout",
            FailureKind::ExitStatus => "exit_status",
            FailureKind::Diagnostic => "diagnostic",
        }
    }
}

/// Result of one supervised run.
#[derive(Debug, Clone)]
pub struct TransferOutput {
    pub success: bool,
    pub stdout: String,
    /// Captured stderr, as printed.
    pub stderr: String,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Blobs seen in the output, in order of first sighting.
    pub blobs: BlobRegistry,
}

impl TransferOutput {
    fn failed(kind: FailureKind, message: String, stderr: String, blobs: BlobRegistry) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr,
            error: Some(message),
            failure: Some(kind),
            blobs,
        }
    }

    /// Captured stderr, or the error message when a failed run printed
    /// nothing.
    pub fn error_output(&self) -> &str {
        match &self.error {
            Some(error) if self.stderr.trim().is_empty() => error,
            _ => &self.stderr,
        }
    }

    /// The `(success, stdout, stderr)` triple. A failure always explains
    /// itself in the third element.
    pub fn into_parts(self) -> (bool, String, String) {
        let stderr = self.error_output().to_string();
        (self.success, self.stdout, stderr)
    }
}

impl OperationOutcome for TransferOutput {
    fn error_type(&self) -> Option<&'static str> {
        self.failure.map(|kind| kind.as_str())
    }
}

impl OperationOutcome for ProcessError {
    fn error_type(&self) -> Option<&'static str> {
        Some(match self {
            ProcessError::Spawn { .. } => "spawn",
            ProcessError::Wait { .. } => "wait",
            ProcessError::Timeout { .. } => "timeout",
            ProcessError::MissingPipe { .. } => "missing_pipe",
        })
    }
}

/// Runs skopeo commands. Stateless; one value can serve any number of runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCoordinator;

impl ProcessCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Run `command` to completion or until `timeout` elapses.
    ///
    /// Each recognized stderr line is sent on `progress` in order, followed
    /// by one terminal update once the outcome is known.
    pub async fn run(
        &self,
        command: TransferCommand,
        progress: Option<UnboundedSender<ProgressUpdate>>,
        timeout: Option<Duration>,
    ) -> TransferOutput {
        let operation = command.operation;
        debug!(
            operation = %operation,
            program = %command.program,
            args = ?command.args,
            "Spawning skopeo"
        );

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                program: command.program.clone(),
            });

        let mut parser = ProgressParser::new(operation);
        let output = match child {
            Ok(child) => supervise(child, &mut parser, progress.clone(), timeout).await,
            Err(err) => {
                warn!(operation = %operation, program = %command.program, error = %err, "Failed to spawn skopeo");
                Supervised::Failed(FailureKind::Spawn, err.to_string(), String::new())
            }
        };

        let output = finalize(&mut parser, output);
        if let Some(tx) = &progress {
            let _ = tx.send(parser.update());
        }
        output
    }
}

/// Raw outcome before it is folded into the parser state.
enum Supervised {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    Failed(FailureKind, String, String),
}

async fn supervise(
    mut child: Child,
    parser: &mut ProgressParser,
    progress: Option<UnboundedSender<ProgressUpdate>>,
    timeout: Option<Duration>,
) -> Supervised {
    let pipes = child
        .stderr
        .take()
        .context(MissingPipeSnafu { stream: "stderr" })
        .and_then(|stderr| {
            let stdout = child
                .stdout
                .take()
                .context(MissingPipeSnafu { stream: "stdout" })?;
            Ok((stderr, stdout))
        });
    let (stderr, mut stdout) = match pipes {
        Ok(pipes) => pipes,
        Err(err) => {
            let _ = child.kill().await;
            return Supervised::Failed(FailureKind::Spawn, err.to_string(), String::new());
        }
    };

    let stop_reader = CancellationToken::new();
    let reader = tokio::spawn(read_stderr(
        stderr,
        parser.clone(),
        progress,
        stop_reader.clone(),
    ));

    let exchange = async {
        let mut captured = Vec::new();
        let status = {
            let mut drain = std::pin::pin!(stdout.read_to_end(&mut captured));
            let mut drained = None;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    read = &mut drain, if drained.is_none() => drained = Some(read),
                }
            };

            // A grandchild may still hold stdout; keep what was read so far.
            let drained = match drained {
                Some(read) => read,
                None => tokio::time::timeout(READER_JOIN_TIMEOUT, &mut drain)
                    .await
                    .unwrap_or_else(|_| {
                        debug!("stdout still open after exit, not waiting for EOF");
                        Ok(0)
                    }),
            };
            drained.context(WaitSnafu)?;
            status.context(WaitSnafu)?
        };
        Ok::<_, ProcessError>((status, captured))
    };

    let exchanged = match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange).await.ok(),
        None => Some(exchange.await),
    };

    let Some(exchanged) = exchanged else {
        let limit = timeout.unwrap_or_default();
        warn!(timeout_secs = limit.as_secs_f64(), "skopeo timed out, killing");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill skopeo after timeout");
        }
        if let Some((state, _)) = join_reader(reader, &stop_reader).await {
            *parser = state;
        }
        let message = ProcessError::Timeout { timeout: limit }.to_string();
        return Supervised::Failed(FailureKind::Timeout, message, String::new());
    };

    let (state, stderr) = join_reader(reader, &stop_reader)
        .await
        .unwrap_or_else(|| (parser.clone(), String::new()));
    *parser = state;

    match exchanged {
        Ok((status, stdout)) => Supervised::Exited {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
        },
        Err(err) => {
            let _ = child.kill().await;
            Supervised::Failed(FailureKind::ExitStatus, err.to_string(), stderr)
        }
    }
}

/// Fold the raw outcome into the parser and build the caller's output.
fn finalize(parser: &mut ProgressParser, outcome: Supervised) -> TransferOutput {
    let operation = parser.snapshot().operation;
    match outcome {
        Supervised::Exited {
            status,
            stdout,
            stderr,
        } if status.success() => {
            parser.mark_completed();
            info!(operation = %operation, blobs = parser.blobs().len(), "skopeo finished");
            TransferOutput {
                success: true,
                stdout,
                stderr,
                error: None,
                failure: None,
                blobs: parser.blobs().clone(),
            }
        }
        Supervised::Exited {
            status,
            stdout,
            stderr,
        } => {
            let kind = if parser.snapshot().error.is_some() {
                FailureKind::Diagnostic
            } else {
                FailureKind::ExitStatus
            };
            let synthesized = match status.code() {
                Some(code) => format!("Process exited with code {code}"),
                None => "Process terminated by signal".to_string(),
            };
            let message = parser.mark_failed(synthesized).to_string();
            warn!(operation = %operation, error = %message, "skopeo failed");

            let mut output = TransferOutput::failed(kind, message, stderr, parser.blobs().clone());
            output.stdout = stdout;
            output
        }
        Supervised::Failed(kind, message, stderr) => {
            // The returned error is always `message`, even when the snapshot
            // keeps a diagnostic parsed before a timeout.
            parser.mark_failed(message.clone());
            TransferOutput::failed(kind, message, stderr, parser.blobs().clone())
        }
    }
}

async fn read_stderr(
    stderr: ChildStderr,
    mut parser: ProgressParser,
    progress: Option<UnboundedSender<ProgressUpdate>>,
    stop: CancellationToken,
) -> (ProgressParser, String) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut captured = String::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;

            _ = stop.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                // skopeo output is not guaranteed to be UTF-8.
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                captured.push_str(line);
                captured.push('\n');
                if let Some(update) = parser.parse_line(line) {
                    if let Some(tx) = &progress {
                        // A dropped receiver only means nobody is watching.
                        let _ = tx.send(update);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read skopeo stderr");
                break;
            }
        }
    }

    (parser, captured)
}

/// Join the reader with a bounded wait.
///
/// A grandchild that inherited the pipe can keep it open after skopeo exits;
/// the reader is then told to stop, and aborted if even that does not land.
async fn join_reader(
    mut reader: JoinHandle<(ProgressParser, String)>,
    stop: &CancellationToken,
) -> Option<(ProgressParser, String)> {
    if let Ok(joined) = tokio::time::timeout(READER_JOIN_TIMEOUT, &mut reader).await {
        return joined.ok();
    }

    debug!("stderr still open after exit, stopping reader");
    stop.cancel();
    match tokio::time::timeout(READER_JOIN_TIMEOUT, &mut reader).await {
        Ok(joined) => joined.ok(),
        Err(_) => {
            reader.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skopeo_command_layout() {
        let command = TransferCommand::skopeo(
            OperationKind::ManifestDigest,
            "skopeo",
            ["/tmp/manifest.json"],
        );
        assert_eq!(command.program, "skopeo");
        assert_eq!(command.args, vec!["manifest-digest", "/tmp/manifest.json"]);

        let exists = TransferCommand::skopeo(OperationKind::ImageExists, "skopeo", ["docker://a"]);
        assert_eq!(exists.args, vec!["inspect", "docker://a"]);
    }

    #[test]
    fn test_failed_output_falls_back_to_message() {
        let output = TransferOutput::failed(
            FailureKind::ExitStatus,
            "Process exited with code 1".to_string(),
            "  \n".to_string(),
            BlobRegistry::new(),
        );
        let (success, stdout, stderr) = output.into_parts();
        assert!(!success);
        assert!(stdout.is_empty());
        assert_eq!(stderr, "Process exited with code 1");
    }

    #[test]
    fn test_failed_output_keeps_captured_stderr() {
        let output = TransferOutput::failed(
            FailureKind::Diagnostic,
            "boom".to_string(),
            "Error: boom\n".to_string(),
            BlobRegistry::new(),
        );
        assert_eq!(output.stderr, "Error: boom\n");
        assert_eq!(output.error.as_deref(), Some("boom"));
        assert_eq!(output.error_type(), Some("diagnostic"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let command = TransferCommand::new(
            OperationKind::Inspect,
            "/nonexistent/skopeo-watch-test-binary",
        );
        let output = ProcessCoordinator::new().run(command, Some(tx), None).await;

        assert!(!output.success);
        assert_eq!(output.failure, Some(FailureKind::Spawn));
        let error = output.error.clone().unwrap();
        assert!(!error.is_empty());
        assert!(output.stderr.is_empty());
        assert_eq!(output.error_output(), error);

        let terminal = rx.recv().await.unwrap();
        assert!(terminal.is_terminal());
        assert!(rx.recv().await.is_none());
    }
}
