//! Credential verification for websocket handshakes
//!
//! A credential is looked up on the handshake in priority order:
//! 1. `Authorization: Bearer <token>` header
//! 2. `token` query parameter
//! 3. `auth` payload (`{"token": "..."}`) attached to the handshake
//!
//! The verifier turns it into a [`UserId`] or fails with `Unauthorized`.

pub mod handshake;
pub mod jwt;

pub use handshake::Handshake;
pub use jwt::{Claims, JwtVerifier};

use crate::error::{RelayError, RelayResult};
use crate::websocket::UserId;

/// Turns an opaque credential into a user identity
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> RelayResult<UserId>;

    /// Extract the credential from a handshake and verify it
    fn authenticate(&self, handshake: &Handshake) -> RelayResult<UserId> {
        let token = handshake
            .extract_token()
            .ok_or_else(|| RelayError::unauthorized("Authentication token not found"))?;
        self.verify(&token)
    }
}
