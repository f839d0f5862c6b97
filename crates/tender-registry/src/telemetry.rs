use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::TracingConfig;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("installing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber - tokio-console when asked for, formatted output otherwise.
pub fn init(config: &TracingConfig) -> Result<(), Error> {
    if config.console {
        console_subscriber::init();
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tender_registry=debug,tender_db=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}
