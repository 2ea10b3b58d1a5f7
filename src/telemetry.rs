use tracing_subscriber::{fmt, EnvFilter};

/// JSON log lines filtered by `RUST_LOG`; defaults to `info` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = fmt().with_env_filter(filter).json().try_init() {
        eprintln!("tracing subscriber already installed: {err}");
    }
}
