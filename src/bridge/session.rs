//! russh client handler.
//!
//! Host-key verification is disabled: every server key is accepted, like
//! `StrictHostKeyChecking=no` in OpenSSH. Trust-on-first-use is not
//! implemented.

use russh::{client, keys};
use tracing::debug;

/// Client handler for russh that accepts all host keys.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting server host key without verification");
        Ok(true)
    }
}
