//! Signed session credentials.
//!
//! The external login service and the gateway share one secret. A credential
//! is `base64url(claims_json) "." hex(mac)` where the MAC is a BLAKE3 keyed
//! hash of the encoded claims under a key derived from that secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::constants::KDF_CONTEXT_SESSION_KEY;
use crate::error::SessionError;
use crate::types::IdentityId;

/// Claims carried by a session credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// The authenticated identity.
    pub sub: IdentityId,
    /// Issued at.
    pub iat: DateTime<Utc>,
    /// Expiry; credentials are rejected after this instant.
    pub exp: DateTime<Utc>,
}

impl SessionClaims {
    pub fn new(identity: IdentityId, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: identity,
            iat: now,
            exp: now + ttl,
        }
    }
}

/// MAC key derived from the shared signing secret.
#[derive(Clone)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn derive(secret: &[u8]) -> Self {
        Self(blake3::derive_key(KDF_CONTEXT_SESSION_KEY, secret))
    }

    fn mac(&self, payload: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, payload)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

pub fn issue(claims: &SessionClaims, key: &SessionKey) -> String {
    // Serializing a struct of ids and timestamps cannot fail.
    let json = serde_json::to_vec(claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(json);
    let mac = key.mac(payload.as_bytes());
    format!("{payload}.{}", mac.to_hex())
}

pub fn verify(token: &str, key: &SessionKey) -> Result<SessionClaims, SessionError> {
    verify_at(token, key, Utc::now())
}

pub fn verify_at(
    token: &str,
    key: &SessionKey,
    now: DateTime<Utc>,
) -> Result<SessionClaims, SessionError> {
    let (payload, mac_hex) = token.trim().split_once('.').ok_or(SessionError::Malformed)?;

    let provided = hex::decode(mac_hex).map_err(|_| SessionError::Malformed)?;
    let expected = key.mac(payload.as_bytes());
    if provided.len() != expected.as_bytes().len()
        || provided.ct_eq(expected.as_bytes()).unwrap_u8() != 1
    {
        return Err(SessionError::BadSignature);
    }

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| SessionError::Malformed)?;
    let claims: SessionClaims =
        serde_json::from_slice(&json).map_err(|_| SessionError::Malformed)?;

    if now > claims.exp {
        return Err(SessionError::Expired);
    }

    Ok(claims)
}
