//! skopeo-watch CLI: skopeo with live progress and Prometheus metrics.

use std::process::ExitCode;

use clap::Parser;

use skopeo_watch::{CliArgs, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("warn");

    let args = CliArgs::parse();

    match run(args).await {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
