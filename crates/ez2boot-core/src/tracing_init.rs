//! Shared tracing/logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"ez2boot_server=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for a crate at the given level.
///
/// Workers log under their own crate target, and the `sqlx` query logger is
/// kept at `warn` so per-statement chatter does not drown out tick logs.
pub fn default_filter(crate_target: &str, level: &str) -> String {
    format!("{crate_target}={level},ez2boot_core={level},sqlx=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_includes_crate_and_sqlx() {
        let filter = default_filter("ez2boot_server", "debug");
        assert_eq!(filter, "ez2boot_server=debug,ez2boot_core=debug,sqlx=warn");
    }
}
