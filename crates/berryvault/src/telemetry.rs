//! Tracing setup for binaries and tests embedding the vault.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
