use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber on stderr, honouring `RUST_LOG` and
/// falling back to `info`.
///
/// Fails if a global subscriber is already set, so callers that may run more
/// than once (tests) should ignore the error.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing subscriber: {e}"))
}
