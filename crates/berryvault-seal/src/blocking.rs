//! Timeout boundary for blocking device calls.

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::error::{DeviceError, Result, SealError};
use crate::sealer::SealingProvider;

/// Run a blocking device call on the blocking pool, giving up after `timeout`.
///
/// A call that times out keeps running on its thread; its result is dropped.
pub async fn with_device_timeout<T, F>(timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(SealError::SealingDeviceError(DeviceError::Fault(format!(
            "device task failed: {}",
            join
        )))),
        Err(_) => {
            tracing::warn!(?timeout, "sealing device call timed out");
            Err(SealError::Timeout(timeout))
        }
    }
}

/// A provider wrapped for use from async code.
#[derive(Clone)]
pub struct AsyncSealer {
    provider: Arc<dyn SealingProvider>,
    timeout: Duration,
}

impl AsyncSealer {
    pub fn new(provider: Arc<dyn SealingProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider(&self) -> &Arc<dyn SealingProvider> {
        &self.provider
    }

    pub async fn generate_or_load_primary(&self) -> Result<()> {
        let provider = self.provider.clone();
        with_device_timeout(self.timeout, move || provider.generate_or_load_primary()).await
    }

    pub async fn seal(&self, secret: Zeroizing<Vec<u8>>, name: &str) -> Result<()> {
        let provider = self.provider.clone();
        let name = name.to_string();
        with_device_timeout(self.timeout, move || {
            provider.seal(&secret, &name).map(|_| ())
        })
        .await
    }

    pub async fn unseal(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let provider = self.provider.clone();
        let name = name.to_string();
        with_device_timeout(self.timeout, move || provider.unseal(&name)).await
    }
}
