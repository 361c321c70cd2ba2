//! Tracing setup shared by the binaries.
use crate::error::Result;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs to stdout, and also to `log_file` when given. `RUST_LOG` overrides the
/// default `info` level.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(false);
    match log_file {
        Some(path) => {
            let file = Mutex::new(std::fs::File::create(path)?);
            builder.with_ansi(false).with_writer(std::io::stdout.and(file)).init()
        }
        None => builder.init(),
    }
    Ok(())
}
