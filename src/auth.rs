//! Token validation collaborator.
//!
//! The engine never issues tokens; it consumes them as an opaque "is this
//! token valid, what role does it carry" call at connection-bind time. The
//! shipped implementation verifies HMAC-SHA256 signed tokens, but anything
//! implementing [`TokenValidator`] can be plugged in.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::commands::Tier;

type HmacSha256 = Hmac<Sha256>;

/// Role carried by a session token. Ordering matters: each role meets its
/// own tier and every tier below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Whether this role may run commands of the given tier.
    pub fn meets(&self, tier: Tier) -> bool {
        match tier {
            Tier::Normal => true,
            Tier::Teacher => *self >= Role::Teacher,
            Tier::Admin => *self >= Role::Admin,
        }
    }
}

/// Validated token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub role: Role,
}

/// Collaborator interface: validate an auth token, returning its claims.
///
/// Role is read here, at connection-bind time, and never re-derived from
/// message content afterwards.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<Claims>;
}

/// HMAC-SHA256 signed-token validator.
///
/// Token format: `Bearer <b64(claims-json)>.<b64(hmac)>`. The `Bearer `
/// prefix is optional on input; clients send it, internal callers may not.
pub struct HmacTokenValidator {
    secret: Vec<u8>,
}

impl HmacTokenValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Sign claims into a token. Used by the account service and by tests.
    pub fn sign(&self, claims: &Claims) -> String {
        let payload = serde_json::to_vec(claims).expect("claims serialization is infallible");
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        format!("Bearer {}.{}", B64.encode(&payload), B64.encode(sig))
    }
}

impl TokenValidator for HmacTokenValidator {
    fn validate(&self, token: &str) -> Option<Claims> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let (payload_b64, sig_b64) = token.split_once('.')?;
        let payload = B64.decode(payload_b64).ok()?;
        let sig = B64.decode(sig_b64).ok()?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(&payload);
        mac.verify_slice(&sig).ok()?;

        serde_json::from_slice(&payload).ok()
    }
}
