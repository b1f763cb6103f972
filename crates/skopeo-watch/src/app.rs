//! Command dispatch for the CLI.

use std::process::ExitCode;
use std::sync::Arc;

use skopeo_watch_core::{
    ClientConfig, ClientError, MetricsServer, OperationOptions, ProgressUpdate,
    SkopeoClient, TransferMetrics, TransferOutput, shutdown_signal,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{CliArgs, Commands, OperationArgs};
use crate::display::format_update;

/// Exit code used when a signal interrupted the operation.
const INTERRUPTED_EXIT_CODE: u8 = 130;

/// How a CLI invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Interrupted,
}

impl Outcome {
    /// Process exit status for this outcome.
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
            Outcome::Interrupted => INTERRUPTED_EXIT_CODE,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// Run the command described by `args`.
pub async fn run(args: CliArgs) -> Result<Outcome, ClientError> {
    let config = args.load_config()?;
    let serving = args.serve_metrics || args.command == Commands::Serve;

    // `serve` has nothing to show without a registry, so it always builds one.
    let metrics = if config.metrics.enabled || args.command == Commands::Serve {
        Some(Arc::new(TransferMetrics::new()?))
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    let server = match (&metrics, serving) {
        (Some(metrics), true) => {
            let addr = config.metrics.socket_addr()?;
            let server = MetricsServer::bind(addr, metrics.clone()).await?;
            Some(server.spawn(shutdown.clone()))
        }
        (None, true) => {
            warn!("Metrics are disabled, not serving them");
            None
        }
        _ => None,
    };

    let outcome = if args.command == Commands::Serve {
        match shutdown_signal().await {
            Ok(_) => Outcome::Success,
            Err(e) => {
                warn!(error = %e, "Failed to install signal handlers");
                Outcome::Failure
            }
        }
    } else {
        let client = SkopeoClient::new(ClientConfig::from(&config), metrics);
        tokio::select! {
            outcome = execute(&client, &args.command) => outcome,
            name = interrupted() => {
                info!(signal = name, "Operation interrupted");
                eprintln!("Operation interrupted");
                Outcome::Interrupted
            }
        }
    };

    shutdown.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    Ok(outcome)
}

/// Resolves on a shutdown signal. Without signal handlers it never resolves.
async fn interrupted() -> &'static str {
    match shutdown_signal().await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Failed to install signal handlers");
            std::future::pending().await
        }
    }
}

/// Options for one operation, plus the task printing its progress.
fn operation_options(args: &OperationArgs) -> (OperationOptions, Option<JoinHandle<()>>) {
    let mut options = OperationOptions::default();
    if let Some(timeout) = args.timeout() {
        options = options.with_timeout(timeout);
    }
    if !args.progress {
        return (options, None);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            eprintln!("{}", format_update(&update));
        }
    });
    (options.with_progress(tx), Some(printer))
}

async fn execute(client: &SkopeoClient, command: &Commands) -> Outcome {
    match command {
        Commands::Copy {
            source,
            destination,
            options,
        } => {
            let (options, printer) = operation_options(options);
            let output = client.copy(source, destination, options).await;
            finish_printer(printer).await;
            report(output, "Copy", |_| println!("Copy completed successfully"))
        }
        Commands::Inspect {
            image,
            json,
            options,
        } => {
            let (options, printer) = operation_options(options);
            let output = client.inspect(image, options).await;
            finish_printer(printer).await;
            report(output, "Inspect", |stdout| {
                println!("{}", render_inspect(stdout, *json))
            })
        }
        Commands::Delete { image, options } => {
            let (options, printer) = operation_options(options);
            let output = client.delete(image, options).await;
            finish_printer(printer).await;
            report(output, "Delete", |_| println!("Delete completed successfully"))
        }
        Commands::ManifestDigest { image, options } => {
            let (options, printer) = operation_options(options);
            let output = client.manifest_digest(image, options).await;
            finish_printer(printer).await;
            report(output, "Manifest digest", |stdout| println!("{}", stdout.trim()))
        }
        Commands::ImageExists { image, options } => {
            let (options, printer) = operation_options(options);
            let result = client.image_exists(image, options).await;
            finish_printer(printer).await;
            match (result.success, result.exists) {
                (true, true) => {
                    println!("exists");
                    Outcome::Success
                }
                (true, false) => {
                    println!("not found");
                    Outcome::Success
                }
                (false, _) => {
                    eprintln!(
                        "Existence check failed: {}",
                        result.error.as_deref().unwrap_or_default()
                    );
                    Outcome::Failure
                }
            }
        }
        Commands::Serve => Outcome::Success,
    }
}

async fn finish_printer(printer: Option<JoinHandle<()>>) {
    if let Some(printer) = printer {
        let _ = printer.await;
    }
}

fn report(output: TransferOutput, action: &str, on_success: impl FnOnce(&str)) -> Outcome {
    let (success, stdout, stderr) = output.into_parts();
    if success {
        on_success(&stdout);
        Outcome::Success
    } else {
        eprintln!("{action} failed: {}", stderr.trim());
        Outcome::Failure
    }
}

/// Pretty-print `stdout` when JSON was requested and it parses.
pub fn render_inspect(stdout: &str, json: bool) -> String {
    if json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(stdout) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    stdout.trim_end().to_string()
}
