//! Session and credential lifecycle.
//!
//! This module provides:
//! - `SessionController`: owns the current identity and credential, with verify/refresh/clear
//! - `inspector`: pure expiry and inactivity checks
//! - `ActivityTracker`: activity listeners plus the periodic proactive refresh
//! - `SessionView`: the read-only projection consumers render from
//!
//! Sessions are persisted through a `SessionStore` and restored by `bootstrap`.

pub mod activity;
pub mod controller;
pub mod credential;
pub mod error;
pub mod inspector;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::{ActivityListener, ActivitySource, ActivityState, ActivityTracker, ListenerId, SignalHub, TrackerHandle};
pub use controller::{RefreshOutcome, SessionController, SessionPhase};
pub use credential::{AuthSession, Credential, Identity, Role};
pub use error::SessionError;
pub use view::SessionView;
