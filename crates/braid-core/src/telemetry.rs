use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber. `RUST_LOG` overrides
/// `default_level`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(false);
    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
    if let Err(error) = init_result {
        eprintln!("warning: failed to initialize tracing subscriber: {error}");
    }
}
