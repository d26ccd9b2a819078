//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to `level`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(level: LogLevel) -> bool {
    let default_directive = tracing::Level::from(level).to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(LogLevel::Debug);
        assert!(!init_tracing(LogLevel::Info));
    }
}
