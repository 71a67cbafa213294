//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::bridge::error::BridgeError;
use crate::bridge::session::SshClientHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected
    /// * `Err(_)` - Protocol failure during the attempt
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, BridgeError>;

    /// Name of the strategy, for logging.
    fn name(&self) -> &'static str;
}
