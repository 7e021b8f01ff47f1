//! HTTP client for the coursedesk auth endpoints.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, AuthGrant, AuthService, RegistrationPayload};
use crate::auth::{Credential, Identity};
use crate::config::SessionConfig;

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    identity: Identity,
}

/// `AuthService` over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthService {
    client: Client,
    base_url: String,
}

impl HttpAuthService {
    pub fn new(config: &SessionConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Auth endpoint returned an error");
            return Err(ApiError::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    fn transport_error(err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(err)
        }
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn login(&self, identifier: &str, secret: &str) -> Result<AuthGrant, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { identifier, secret });
        Self::send(request).await
    }

    async fn register(&self, payload: &RegistrationPayload) -> Result<AuthGrant, ApiError> {
        let request = self.client.post(self.url("/auth/register")).json(payload);
        Self::send(request).await
    }

    async fn verify(&self, credential: &Credential) -> Result<Identity, ApiError> {
        let request = self
            .client
            .get(self.url("/auth/verify"))
            .bearer_auth(credential.token());
        let response: VerifyResponse = Self::send(request).await?;
        Ok(response.identity)
    }

    async fn refresh(&self, credential: &Credential) -> Result<AuthGrant, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/refresh"))
            .bearer_auth(credential.token());
        Self::send(request).await
    }
}
