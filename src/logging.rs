//! Logging setup.

/// Install the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `websoc_client=info`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "websoc_client=info".into()),
        )
        .init();
}
