use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber at `info`, or whatever `RUST_LOG` says.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    init_with("info");
}

/// Like [`init`] with a different default level. `RUST_LOG`, when set, still
/// wins.
pub fn init_with(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
