//! Session and credential lifecycle management for the coursedesk client.
//!
//! The crate is organised around a single [`SessionController`] that owns the
//! current identity and credential, backed by injectable ports:
//! - [`Clock`] for wall-clock time
//! - [`KeyValueStore`] for persisting the session between runs
//! - [`AuthService`] for the remote verify/refresh/login/register endpoints
//!
//! An [`ActivityTracker`] feeds user activity into the controller and drives
//! the periodic proactive refresh.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod logging;
pub mod storage;

pub use api::{ApiError, AuthGrant, AuthService, HttpAuthService, RegistrationPayload};
pub use auth::{
    ActivitySource, ActivityState, ActivityTracker, AuthSession, Credential, Identity,
    RefreshOutcome, Role, SessionController, SessionError, SessionPhase, SessionView, SignalHub,
    TrackerHandle,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, SessionStore, StorageError};
