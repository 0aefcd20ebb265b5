//! Rate-limit capability.

use std::time::Duration;

use async_trait::async_trait;

use weir_types::Error;

/// A shared rate-limit resource.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Request a slot. A zero duration means proceed now; otherwise the
    /// caller waits the returned duration and asks again.
    async fn access(&self) -> Result<Duration, Error>;
}
