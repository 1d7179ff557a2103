//! Tracing initialization for the CLI.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Used when `RUST_LOG` is unset. Driver crates log every statement and
/// server handshake at `info`.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,mongodb=warn,aws_config=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install a formatted subscriber on stderr, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_drivers() {
        let filter = EnvFilter::try_new(DEFAULT_DIRECTIVES).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("sqlx=warn"));
        assert!(rendered.contains("mongodb=warn"));
    }
}
