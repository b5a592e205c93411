//! Diagnostic tracing for the orchestrator.
//!
//! Tracing goes to stderr and is not persisted. Run records under the runs
//! directory (`io/run_store`) are written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or
/// `warn,phasegate=info` with `verbose` so phase lifecycle events show up.
///
/// # Example
/// ```bash
/// RUST_LOG=phasegate=debug phasegate run pipelines/memory-architecture.toml
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,phasegate=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
