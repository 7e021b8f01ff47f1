//! Remote credential service.
//!
//! `AuthService` is the seam the session controller talks through; the
//! `HttpAuthService` implementation speaks to the coursedesk backend's
//! `/auth/*` endpoints using bearer-token authentication.

pub mod client;
pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthSession, Credential, Identity};

pub use client::HttpAuthService;
pub use error::ApiError;

/// A freshly issued credential and the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub credential: Credential,
    pub identity: Identity,
}

impl From<AuthGrant> for AuthSession {
    fn from(grant: AuthGrant) -> Self {
        AuthSession {
            credential: grant.credential,
            identity: grant.identity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationPayload {
    pub email: String,
    pub username: String,
    pub name: String,
    pub password: String,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, identifier: &str, secret: &str) -> Result<AuthGrant, ApiError>;

    async fn register(&self, payload: &RegistrationPayload) -> Result<AuthGrant, ApiError>;

    /// Confirm the credential is still accepted and return its identity.
    async fn verify(&self, credential: &Credential) -> Result<Identity, ApiError>;

    /// Exchange the credential for a new one.
    async fn refresh(&self, credential: &Credential) -> Result<AuthGrant, ApiError>;
}
