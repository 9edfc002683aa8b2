use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the process-wide subscriber: a `fmt` layer filtered by `RUST_LOG`
/// (default `info`). Values from a `.env` file are loaded first.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    dotenv::dotenv().ok();
    let tracing_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(tracing_level));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

/// Subscriber for tests: output goes through the test harness capture. Safe to
/// call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
