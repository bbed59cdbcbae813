use anyhow::Context;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Log to stderr so stdout stays with the terminal UI. The filter comes from
/// `TECHIE_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`].
pub fn init_logging() -> anyhow::Result<()> {
    let filter = std::env::var("TECHIE_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    tracing::debug!("Logging initialized");
    Ok(())
}
