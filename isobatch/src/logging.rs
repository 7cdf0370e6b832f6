//! Diagnostic logging for the isobatch CLI.
//!
//! Progress lines are printed by the renderer; tracing output is for
//! diagnosing attach, correlation and dump problems and goes to stderr.

use std::io::{self, IsTerminal};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The filter used when `RUST_LOG` is not set.
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "isobatch=error,isobatch_core=error";
    }
    match verbose {
        0 => "isobatch=warn,isobatch_core=warn",
        1 => "isobatch=info,isobatch_core=info",
        2 => "isobatch=debug,isobatch_core=debug",
        _ => "isobatch=trace,isobatch_core=trace",
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the verbosity flags (e.g.
/// `RUST_LOG=isobatch_core::correlate=debug`).
pub fn init_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    let fmt_layer = fmt::layer()
        .with_ansi(io::stderr().is_terminal())
        .with_target(verbose >= 2)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
