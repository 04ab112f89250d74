//! Tracing subscriber setup for exprun binaries.
//!
//! Call [`init_tracing`] (or [`init_from_env`]) once at program start. Later
//! calls are ignored because the global subscriber can only be set once.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives, e.g. `EXPRUN_LOG=exprun_core=debug`.
pub const LOG_ENV: &str = "EXPRUN_LOG";

/// `json` switches to newline-delimited JSON output.
pub const LOG_FORMAT_ENV: &str = "EXPRUN_LOG_FORMAT";

/// Install the global subscriber.
///
/// Filtering comes from `EXPRUN_LOG`, then `RUST_LOG`, then `level`.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}

/// Install the global subscriber using `EXPRUN_LOG_FORMAT` to pick the format.
pub fn init_from_env(level: Level) {
    init_tracing(json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref()), level);
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}
