//! Tracing setup: a stderr layer for operators plus one append-only file
//! per audit channel.
//!
//! | file | target |
//! |---|---|
//! | `errors.log` | `audit::errors` |
//! | `invalid_emails.log` | `audit::rejected` |
//! | `sent_emails.log` | `audit::sent` |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

use crate::audit::{ERRORS_TARGET, REJECTED_TARGET, SENT_TARGET};

pub const ERRORS_FILE: &str = "errors.log";
pub const REJECTED_FILE: &str = "invalid_emails.log";
pub const SENT_FILE: &str = "sent_emails.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking writers flushing. Drop at process exit.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
    pub log_dir: PathBuf,
}

/// Default stderr filter when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug,audit=off" } else { "info,audit=off" }
}

/// Install the global subscriber. Creates `log_dir` if needed.
pub fn init(log_dir: &Path, verbose: bool) -> io::Result<LogGuards> {
    fs::create_dir_all(log_dir)?;

    let stderr: BoxedLayer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))),
        )
        .boxed();

    let mut guards = Vec::with_capacity(3);
    let mut audit_layer = |file: &str, target: &'static str| -> BoxedLayer {
        let appender = tracing_appender::rolling::never(log_dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_filter(Targets::new().with_target(target, Level::INFO))
            .boxed()
    };
    let layers = vec![
        stderr,
        audit_layer(ERRORS_FILE, ERRORS_TARGET),
        audit_layer(REJECTED_FILE, REJECTED_TARGET),
        audit_layer(SENT_FILE, SENT_TARGET),
    ];

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LogGuards {
        _guards: guards,
        log_dir: log_dir.to_path_buf(),
    })
}
