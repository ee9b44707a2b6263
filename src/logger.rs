use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Install the global subscriber, "RUST_LOG" takes precedence
// over the verbose flag
pub fn init_logging(verbose: bool) {
    let level = if verbose || cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (EnvFilter::new(level), false),
    };

    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    // Logged after init, the subscriber doesn't exist before
    if !from_env {
        info!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}
