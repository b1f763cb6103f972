//! skopeo-watch: command-line front end for skopeo-watch-core.
//!
//! - `cli` - clap argument definitions and config overrides
//! - `app` - command dispatch and exit status mapping
//! - `display` - progress line formatting

pub mod app;
pub mod cli;
pub mod display;

pub use app::{Outcome, run};
pub use cli::{CliArgs, Commands, OperationArgs};
pub use skopeo_watch_core::init_tracing;
