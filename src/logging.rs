//! Tracing setup per transport.
//!
//! In stdio mode the MCP client owns both pipes and treats stderr output
//! during the handshake as a broken connection, so nothing is logged
//! unless a log file was requested. Stream mode logs to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Stream,
}

/// Initialize the global subscriber. Returns the appender guard that must
/// stay alive for file logging to flush.
pub fn init_logging(mode: TransportMode, log_file: Option<String>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(name) = log_file {
        let path = Path::new(&name);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .with_context(|| format!("invalid log file name: {name}"))?
            .to_os_string();
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        return Ok(Some(guard));
    }

    match mode {
        // Keep stdio silent; see module docs.
        TransportMode::Stdio => {}
        TransportMode::Stream => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(None)
}
