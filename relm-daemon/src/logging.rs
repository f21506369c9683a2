use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Logs go to stderr so dry-run output on
/// stdout stays clean. Safe to call more than once.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
