use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the application.
///
/// `default_level` picks the maximum level. When `RUST_LOG` is set it wins,
/// so a single module can be turned up without touching the configuration.
pub fn init(default_level: &str) {
    let lvl = parse_level(default_level);

    // try_init: tests and the binary may both call this
    match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.trim().is_empty() => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(filter))
                .with_target(false)
                .try_init();
        }
        _ => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(lvl)
                .with_target(false)
                .try_init();
        }
    }
}

pub(crate) fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
