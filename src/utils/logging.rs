use std::io;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the stderr subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}
