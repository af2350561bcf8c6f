//! Tracing subscriber initialization for the benchmark binaries.
//!
//! Library code only emits `tracing` events; binaries pick a subscriber:
//! - `init_dev_subscriber()` - fixed level, stderr
//! - `init_dev_subscriber_with_env_filter()` - honours `RUST_LOG`
//!
//! ```no_run
//! use numa_ann_bench::telemetry;
//!
//! telemetry::init_dev_subscriber_with_env_filter();
//! tracing::info!("starting benchmark");
//! ```

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset. Per-trial progress is logged at
/// `info`, so this keeps the trial loop visible.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize a stderr subscriber at the given level.
///
/// # Panics
/// Panics if a global subscriber has already been set.
pub fn init_dev_subscriber(level: Level) {
    let subscriber = fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Initialize a stderr subscriber filtered by `RUST_LOG`.
///
/// Falls back to [`DEFAULT_FILTER`] when the variable is unset or invalid.
///
/// # Panics
/// Panics if a global subscriber has already been set.
pub fn init_dev_subscriber_with_env_filter() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}
