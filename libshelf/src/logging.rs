use tracing_subscriber::{fmt, EnvFilter};

/// Initialise global tracing subscriber.
///
/// Reads `RUST_LOG` for filtering, falls back to `info`. Output goes to
/// stderr so the CLI's stdout stays machine-readable.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: tests and embedders may have installed a subscriber already
    let _ = fmt()
        .with_target(false)
        .with_level(true)
        .with_thread_names(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
