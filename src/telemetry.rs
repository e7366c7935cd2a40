use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Install the global tracing subscriber. Logs go to stderr so command output
/// on stdout stays clean. `RUST_LOG` wins over the configured filter.
pub fn init(config: &LogConfig, verbose: bool) {
    let default_filter = if verbose {
        "cambio=debug"
    } else {
        config.filter.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("Logging already initialized: {}", err);
    }
}
