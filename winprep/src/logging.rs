//! Process-wide tracing setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug { "winprep=debug" } else { "winprep=info" }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Logs go to stderr so progress messages on stdout stay readable.
pub fn init_logging(debug: bool, color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(debug);

    // A subscriber may already be installed (tests, embedding)
    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
    {
        eprintln!("winprep: logging already initialized: {}", e);
    }
}
