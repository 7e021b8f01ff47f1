use std::fmt;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque bearer token issued by the auth service.
///
/// The token is a JWT; only the `exp` claim of the payload is ever read.
/// Debug output is redacted so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<f64>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Decode the embedded expiry instant, or `None` if the token is malformed.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let mut segments = self.0.split('.');
        let (_header, payload) = (segments.next()?, segments.next()?);
        // Tolerate issuers that keep the padding on.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| URL_SAFE.decode(payload))
            .ok()?;
        let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
        let exp = claim.exp?;
        if !exp.is_finite() {
            return None;
        }
        DateTime::from_timestamp(exp.trunc() as i64, 0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    /// Instructors manage their own courses and count as admin-capable.
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::Instructor)
    }
}

/// The authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub username: String,
    pub name: String,
    pub role: Role,
}

/// A credential together with the identity it belongs to. Always replaced as a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub credential: Credential,
    pub identity: Identity,
}
