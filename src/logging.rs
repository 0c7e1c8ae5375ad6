// Logging setup.
// Installs a tracing subscriber that writes to stderr, filtered by RUST_LOG or verbosity.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a given `-v` count.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "gitpeek=warn",
        1 => "gitpeek=info",
        2 => "gitpeek=debug",
        _ => "gitpeek=trace",
    }
}

/// Initialize the global subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init(verbosity: u8) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(verbosity).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
