//! Participant authentication.
//!
//! Tokens are `"<user_id>.<expires_unix>.<hex hmac>"`, signed with
//! HMAC-SHA256 over `"<user_id>.<expires_unix>"`.

use crate::session::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum AuthError {
    /// Not in `user.expiry.signature` form.
    #[display("Malformed token")]
    Malformed,
    /// Signature does not match.
    #[display("Bad token signature")]
    BadSignature,
    /// Expiry is in the past.
    #[display("Token expired")]
    Expired,
    /// Signed for a participant that does not exist.
    #[display("Unknown user {}", _0)]
    UnknownUser(UserId),
    /// The signing key could not be used.
    #[display("Signing key rejected")]
    InvalidKey,
}

impl std::error::Error for AuthError {}

/// Resolves a credential to a participant id.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Validates `credential` and returns who it belongs to.
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// HMAC-signed, expiring tokens.
#[derive(Clone)]
pub struct TokenAuth {
    mac: HmacSha256,
    ttl: Duration,
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuth")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenAuth {
    /// Creates a signer with the given key and token lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the key is empty.
    #[instrument(skip(secret))]
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, AuthError> {
        if secret.is_empty() {
            warn!("Refusing empty signing key");
            return Err(AuthError::InvalidKey);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidKey)?;
        Ok(Self { mac, ttl })
    }

    fn signature(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    /// Issues a token for `user_id` valid from now.
    pub fn issue(&self, user_id: UserId) -> String {
        self.issue_at(user_id, Utc::now())
    }

    /// Issues a token for `user_id` as if it were `now`.
    #[instrument(skip(self, now))]
    pub fn issue_at(&self, user_id: UserId, now: DateTime<Utc>) -> String {
        let expires = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp();
        let payload = format!("{}.{}", user_id, expires);
        let signature = hex::encode(self.signature(&payload).finalize().into_bytes());
        debug!(expires, "Token issued");
        format!("{}.{}", payload, signature)
    }

    /// Checks a token against the clock at `now`.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: shape, then signature, then expiry.
    #[instrument(skip(self, token, now))]
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<UserId, AuthError> {
        let mut parts = token.trim().splitn(3, '.');
        let (Some(user), Some(expires), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let user_id: UserId = user.parse().map_err(|_| AuthError::Malformed)?;
        let expires: i64 = expires.parse().map_err(|_| AuthError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

        self.signature(&format!("{}.{}", user_id, expires))
            .verify_slice(&signature)
            .map_err(|_| {
                warn!(user_id, "Token signature mismatch");
                AuthError::BadSignature
            })?;

        if expires <= now.timestamp() {
            debug!(user_id, expires, "Token expired");
            return Err(AuthError::Expired);
        }

        Ok(user_id)
    }
}

#[async_trait]
impl Authenticator for TokenAuth {
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthError> {
        self.verify_at(credential, Utc::now())
    }
}
