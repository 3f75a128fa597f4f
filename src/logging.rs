//! Logger setup for the command line binary

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a compact stderr logger
///
/// `RUST_LOG` overrides the default filter (`value_rnn=info`, or
/// `value_rnn=debug` with `verbose`).
pub fn init_logger(verbose: bool) {
    let default_filter = if verbose {
        "value_rnn=debug,info"
    } else {
        "value_rnn=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
