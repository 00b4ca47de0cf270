//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,backend_sesac=debug,backend_smoke=debug";

/// Install the global subscriber.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `SESAC_SMOKE_LOG`
/// 3) `SESAC_LOG`
/// 4) internal default filter
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    ["SESAC_SMOKE_LOG", "SESAC_LOG"]
        .into_iter()
        .find_map(|key| {
            env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .and_then(|value| EnvFilter::try_new(value).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
