//! Shared fixtures for the auth and storage tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Notify;

use super::{AuthSession, Credential, Identity, Role, SessionController};
use crate::api::{ApiError, AuthGrant, AuthService, RegistrationPayload};
use crate::clock::{Clock, ManualClock};
use crate::config::SessionConfig;
use crate::storage::{KeyValueStore, MemoryStore, SessionStore, CREDENTIAL_KEY};

/// Build an unsigned JWT whose payload carries `exp`.
pub fn token_expiring_at(exp: DateTime<Utc>) -> Credential {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"42","exp":{}}}"#, exp.timestamp()));
    Credential::new(format!("{}.{}.signature", header, payload))
}

pub fn identity(role: Role) -> Identity {
    Identity {
        id: "42".to_string(),
        email: "a@b.com".to_string(),
        username: "ada".to_string(),
        name: "Ada Lovelace".to_string(),
        role,
    }
}

pub fn grant(exp: DateTime<Utc>, role: Role) -> AuthGrant {
    AuthGrant {
        credential: token_expiring_at(exp),
        identity: identity(role),
    }
}

/// Scripted answer for one endpoint.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Status(u16, &'static str),
    /// Never answers; exercises the request timeout.
    Hang,
}

impl<T: Clone> Reply<T> {
    async fn resolve(&self) -> Result<T, ApiError> {
        match self {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Status(code, body) => {
                let status = StatusCode::from_u16(*code).expect("valid status code");
                Err(ApiError::from_status(status, body))
            }
            Reply::Hang => std::future::pending().await,
        }
    }
}

pub struct MockService {
    pub login: Mutex<Reply<AuthGrant>>,
    pub register: Mutex<Reply<AuthGrant>>,
    pub verify: Mutex<Reply<Identity>>,
    pub refresh: Mutex<Reply<AuthGrant>>,
    /// When set, refresh waits for a permit before answering.
    pub refresh_gate: Option<Arc<Notify>>,
    /// When set, verify waits for a permit before answering.
    pub verify_gate: Option<Arc<Notify>>,
    pub login_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub refreshes_in_flight: AtomicUsize,
    /// Most refresh requests ever outstanding at once.
    pub peak_refreshes: AtomicUsize,
}

impl MockService {
    pub fn new() -> Self {
        let unscripted = Reply::Status(500, "unscripted");
        Self {
            login: Mutex::new(unscripted.clone()),
            register: Mutex::new(unscripted.clone()),
            verify: Mutex::new(Reply::Status(500, "unscripted")),
            refresh: Mutex::new(unscripted),
            refresh_gate: None,
            verify_gate: None,
            login_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refreshes_in_flight: AtomicUsize::new(0),
            peak_refreshes: AtomicUsize::new(0),
        }
    }

    /// A service whose refresh answers only after `gate` is notified.
    pub fn gated_refresh() -> (Arc<Notify>, Self) {
        let gate = Arc::new(Notify::new());
        let service = Self {
            refresh_gate: Some(gate.clone()),
            ..Self::new()
        };
        (gate, service)
    }

    /// A service whose verify answers only after `gate` is notified.
    pub fn gated_verify() -> (Arc<Notify>, Self) {
        let gate = Arc::new(Notify::new());
        let service = Self {
            verify_gate: Some(gate.clone()),
            ..Self::new()
        };
        (gate, service)
    }

    pub fn network_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
            + self.verify_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for MockService {
    async fn login(&self, _identifier: &str, _secret: &str) -> Result<AuthGrant, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.login.lock().clone();
        reply.resolve().await
    }

    async fn register(&self, _payload: &RegistrationPayload) -> Result<AuthGrant, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.register.lock().clone();
        reply.resolve().await
    }

    async fn verify(&self, _credential: &Credential) -> Result<Identity, ApiError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.verify_gate {
            gate.notified().await;
        }
        let reply = self.verify.lock().clone();
        reply.resolve().await
    }

    async fn refresh(&self, _credential: &Credential) -> Result<AuthGrant, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.refreshes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_refreshes.fetch_max(outstanding, Ordering::SeqCst);
        if let Some(gate) = &self.refresh_gate {
            gate.notified().await;
        }
        let reply = self.refresh.lock().clone();
        let result = reply.resolve().await;
        self.refreshes_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub service: Arc<MockService>,
    pub backend: Arc<MemoryStore>,
    pub store: SessionStore,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(service: MockService) -> Self {
        Self::with_config(service, SessionConfig::default())
    }

    pub fn with_config(service: MockService, config: SessionConfig) -> Self {
        let service = Arc::new(service);
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone());
        // Whole seconds, so stamps survive millisecond storage unchanged.
        let start = DateTime::from_timestamp(Utc::now().timestamp(), 0).expect("current time in range");
        let clock = Arc::new(ManualClock::new(start));
        let controller =
            SessionController::new(config, service.clone(), store.clone(), clock.clone());
        Self {
            controller,
            service,
            backend,
            store,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A credential valid for another hour of harness time.
    pub fn live_grant(&self, role: Role) -> AuthGrant {
        grant(self.now() + Duration::hours(1), role)
    }

    /// Write a session to storage as a previous run would have left it.
    pub fn persist(&self, session: &AuthSession, last_active: Option<DateTime<Utc>>) {
        self.store.save(session).unwrap();
        if let Some(at) = last_active {
            self.store.save_last_active(at).unwrap();
        }
    }

    pub fn stored_token(&self) -> Option<String> {
        self.backend.get(CREDENTIAL_KEY).unwrap()
    }
}
