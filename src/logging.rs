use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `config.log_filter` when unset.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(config: &BridgeConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
