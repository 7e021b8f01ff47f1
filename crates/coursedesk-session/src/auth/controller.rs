//! The session controller: single owner of the current identity and credential.
//!
//! Every transition (sign-in, refresh, clear) updates storage and memory under
//! one lock and then publishes a fresh `SessionView`. Concurrent refresh
//! triggers share one in-flight request, and a generation stamp makes sure a
//! clear that happens while a request is outstanding is never undone by its
//! late result.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::activity::ActivityState;
use super::inspector;
use super::{AuthSession, Credential, Identity, SessionError, SessionView};
use crate::api::{ApiError, AuthGrant, AuthService, HttpAuthService, RegistrationPayload};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::storage::{KeyValueStore, SessionStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Result of a refresh that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The new credential was adopted.
    Refreshed,
    /// The session was cleared or replaced while the request was in flight; the result was dropped.
    Discarded,
}

type RefreshResult = Result<RefreshOutcome, SessionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// The one outstanding refresh request. It runs as its own task, so it settles
/// even when every caller stops waiting for it.
struct RefreshFlight {
    id: u64,
    /// Session generation the request was started for.
    generation: u64,
    future: SharedRefresh,
}

/// A flight handed to a caller. `current` is false when the flight belongs to a
/// session that has since been cleared or replaced.
struct JoinedFlight {
    future: SharedRefresh,
    current: bool,
}

struct SessionState {
    session: Option<AuthSession>,
    phase: SessionPhase,
    /// Bumped whenever the session is cleared or replaced by a sign-in.
    generation: u64,
    refresh: Option<RefreshFlight>,
    next_flight_id: u64,
}

impl SessionState {
    fn view(&self) -> SessionView {
        SessionView {
            identity: self.session.as_ref().map(|s| s.identity.clone()),
            credential: self.session.as_ref().map(|s| s.credential.clone()),
            is_loading: self.phase == SessionPhase::Loading
                || self
                    .refresh
                    .as_ref()
                    .is_some_and(|f| f.generation == self.generation),
        }
    }
}

struct Inner {
    service: Arc<dyn AuthService>,
    store: SessionStore,
    clock: Arc<dyn Clock>,
    activity: Arc<ActivityState>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<SessionView>,
}

impl Inner {
    fn publish(&self, state: &SessionState) {
        self.view_tx.send_replace(state.view());
    }

    /// The one clearing path: storage and memory go together, activity is left alone.
    ///
    /// An outstanding refresh keeps its slot until it settles; the generation bump
    /// makes its result a discard.
    fn clear_locked(&self, state: &mut SessionState) {
        state.generation += 1;
        state.session = None;
        state.phase = SessionPhase::Unauthenticated;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to delete persisted session");
        }
        self.publish(state);
    }

    /// Forget the session for this run without touching storage.
    fn sign_out_in_memory(&self, state: &mut SessionState) {
        state.session = None;
        state.phase = SessionPhase::Unauthenticated;
        self.publish(state);
    }

    fn adopt_locked(&self, state: &mut SessionState, session: AuthSession) {
        if let Err(e) = self.store.save(&session) {
            warn!(error = %e, "Failed to persist session");
        }
        self.touch_activity(self.clock.now(), true);
        state.session = Some(session);
        state.phase = SessionPhase::Authenticated;
        self.publish(state);
    }

    fn touch_activity(&self, now: DateTime<Utc>, force_flush: bool) {
        self.activity.record(now);
        let flush = if force_flush {
            self.activity.mark_flushed(now);
            true
        } else {
            self.activity.claim_flush(now, self.config.activity_flush())
        };
        if flush {
            if let Err(e) = self.store.save_last_active(now) {
                warn!(error = %e, "Failed to persist last-active stamp");
            }
        }
    }

    /// Release the refresh slot held by `flight_id`, if it still holds it.
    fn release_flight(&self, state: &mut SessionState, flight_id: u64) {
        if state.refresh.as_ref().is_some_and(|f| f.id == flight_id) {
            state.refresh = None;
        }
    }

    fn finish_refresh(
        &self,
        flight_id: u64,
        generation: u64,
        result: Result<AuthGrant, SessionError>,
    ) -> RefreshResult {
        let mut state = self.state.lock();
        self.release_flight(&mut state, flight_id);

        if state.generation != generation {
            debug!(flight = flight_id, "Session changed during refresh, discarding result");
            self.publish(&state);
            return Ok(RefreshOutcome::Discarded);
        }

        match result {
            Ok(grant) => {
                self.adopt_locked(&mut state, grant.into());
                info!(flight = flight_id, "Credential refreshed");
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err @ SessionError::Rejected(_)) => {
                warn!(error = %err, "Refresh rejected, clearing session");
                self.clear_locked(&mut state);
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "Refresh failed");
                self.publish(&state);
                Err(err)
            }
        }
    }
}

/// Bound a remote call by the configured timeout; elapsing counts as `ApiError::Timeout`.
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout),
    }
}

/// Owns the current session. Clone is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn AuthService>,
        store: SessionStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = SessionState {
            session: None,
            phase: SessionPhase::Uninitialized,
            generation: 0,
            refresh: None,
            next_flight_id: 0,
        };
        let (view_tx, _) = watch::channel(state.view());
        Self {
            inner: Arc::new(Inner {
                service,
                store,
                clock,
                activity: Arc::new(ActivityState::new()),
                config,
                state: Mutex::new(state),
                view_tx,
            }),
        }
    }

    /// Controller talking HTTP to `config.api_base_url`, on the system clock.
    pub fn with_http(
        config: SessionConfig,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ApiError> {
        let service = HttpAuthService::new(&config)?;
        Ok(Self::new(
            config,
            Arc::new(service),
            SessionStore::new(backend),
            Arc::new(SystemClock),
        ))
    }

    /// Restore the session a previous run left behind.
    ///
    /// Expired or idle sessions are cleared without contacting the server. A
    /// rejected credential gets one refresh attempt. Transient failures leave
    /// storage alone so the next start can try again.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> SessionView {
        let (generation, persisted) = {
            let mut state = self.inner.state.lock();
            state.phase = SessionPhase::Loading;
            self.inner.publish(&state);

            match self.inner.store.load() {
                Ok(Some(persisted)) => (state.generation, persisted),
                Ok(None) => {
                    debug!("No persisted session");
                    self.inner.sign_out_in_memory(&mut state);
                    return state.view();
                }
                Err(StorageError::Corrupt(reason)) => {
                    warn!(%reason, "Persisted session is unreadable, clearing");
                    self.inner.clear_locked(&mut state);
                    return state.view();
                }
                Err(e) => {
                    warn!(error = %e, "Could not read persisted session");
                    self.inner.sign_out_in_memory(&mut state);
                    return state.view();
                }
            }
        };

        let now = self.inner.clock.now();
        // The stamp left by the previous run decides; activity seen since start only fills a gap.
        let last_active = self
            .inner
            .store
            .load_last_active()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read last-active stamp");
                None
            })
            .or_else(|| self.inner.activity.last_active());

        if inspector::is_expired(&persisted.credential, now) {
            info!("Persisted credential has expired, clearing session");
            return self.settle(generation, |inner, state| inner.clear_locked(state));
        }
        if inspector::is_inactive(last_active, now, self.inner.config.max_idle()) {
            info!(?last_active, "Session idle for too long, clearing");
            return self.settle(generation, |inner, state| inner.clear_locked(state));
        }

        let timeout = self.inner.config.request_timeout();
        match bounded(timeout, self.inner.service.verify(&persisted.credential)).await {
            Ok(identity) => {
                info!(role = ?identity.role, "Persisted session verified");
                self.settle(generation, move |inner, state| {
                    inner.adopt_locked(
                        state,
                        AuthSession {
                            credential: persisted.credential,
                            identity,
                        },
                    )
                })
            }
            Err(err) if err.is_auth_rejection() => {
                info!(error = %err, "Persisted credential rejected, attempting refresh");
                let pinned = Some((generation, persisted.credential));
                if let Err(e) = self.refresh_with(pinned).await {
                    debug!(error = %e, "Refresh during startup failed");
                }
                // A transient refresh failure leaves us loading with storage intact.
                self.settle(generation, |inner, state| {
                    if state.phase == SessionPhase::Loading {
                        inner.sign_out_in_memory(state);
                    }
                })
            }
            Err(err) => {
                warn!(error = %err, "Could not verify persisted session, keeping it for the next start");
                self.settle(generation, |inner, state| inner.sign_out_in_memory(state))
            }
        }
    }

    /// Apply a bootstrap transition only if nothing replaced or cleared the session meanwhile.
    fn settle(
        &self,
        generation: u64,
        apply: impl FnOnce(&Inner, &mut SessionState),
    ) -> SessionView {
        let mut state = self.inner.state.lock();
        if state.generation == generation {
            apply(&*self.inner, &mut *state);
        } else {
            debug!("Session changed during startup, keeping the newer state");
        }
        state.view()
    }

    /// Sign in. On failure the server's message is returned unchanged and nothing changes locally.
    #[instrument(skip_all)]
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Identity, SessionError> {
        let timeout = self.inner.config.request_timeout();
        let result = bounded(timeout, self.inner.service.login(identifier, secret)).await;
        self.complete_sign_in(result)
    }

    /// Create an account and sign in to it. Same contract as `login`.
    #[instrument(skip_all)]
    pub async fn register(&self, payload: &RegistrationPayload) -> Result<Identity, SessionError> {
        let timeout = self.inner.config.request_timeout();
        let result = bounded(timeout, self.inner.service.register(payload)).await;
        self.complete_sign_in(result)
    }

    fn complete_sign_in(&self, result: Result<AuthGrant, ApiError>) -> Result<Identity, SessionError> {
        match result {
            Ok(grant) => {
                let identity = grant.identity.clone();
                let mut state = self.inner.state.lock();
                // Supersede whatever refresh might still be in flight.
                state.generation += 1;
                self.inner.adopt_locked(&mut state, grant.into());
                info!(role = ?identity.role, "Signed in");
                Ok(identity)
            }
            Err(err) => {
                let err = SessionError::from_credentials_call(err);
                warn!(error = %err, "Sign-in failed");
                Err(err)
            }
        }
    }

    /// End the session locally. Idempotent and never touches the network.
    pub fn logout(&self) {
        info!("Signing out");
        self.clear_session();
    }

    /// Delete the persisted session and forget it in memory.
    pub fn clear_session(&self) {
        let mut state = self.inner.state.lock();
        self.inner.clear_locked(&mut state);
    }

    /// Exchange the current credential for a new one.
    ///
    /// Callers arriving while a refresh is already in flight wait for that
    /// request instead of issuing another, and all observe the same result.
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, SessionError> {
        self.refresh_with(None).await
    }

    /// Refresh `pinned` (a generation and its credential) or, when `None`, the
    /// credential currently held.
    ///
    /// A flight left over from a cleared or replaced session is waited out first,
    /// so there is never more than one request outstanding.
    async fn refresh_with(&self, pinned: Option<(u64, Credential)>) -> RefreshResult {
        loop {
            let Some(flight) = self.join_or_start_refresh(pinned.clone())? else {
                return Ok(RefreshOutcome::Discarded);
            };
            let result = flight.future.await;
            if flight.current {
                return result;
            }
        }
    }

    fn join_or_start_refresh(
        &self,
        pinned: Option<(u64, Credential)>,
    ) -> Result<Option<JoinedFlight>, SessionError> {
        let mut state = self.inner.state.lock();
        if let Some((generation, _)) = &pinned {
            if *generation != state.generation {
                return Ok(None);
            }
        }
        if let Some(flight) = &state.refresh {
            let current = flight.generation == state.generation;
            debug!(flight = flight.id, current, "Joining in-flight refresh");
            return Ok(Some(JoinedFlight {
                future: flight.future.clone(),
                current,
            }));
        }

        let credential = match pinned {
            Some((_, credential)) => credential,
            None => state
                .session
                .as_ref()
                .map(|s| s.credential.clone())
                .ok_or(SessionError::NotAuthenticated)?,
        };

        state.next_flight_id += 1;
        let id = state.next_flight_id;
        let generation = state.generation;
        let service = Arc::clone(&self.inner.service);
        let timeout = self.inner.config.request_timeout();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let worker = weak.clone();
        let task = tokio::spawn(async move {
            let result = bounded(timeout, service.refresh(&credential))
                .await
                .map_err(SessionError::from_session_call);
            match worker.upgrade() {
                Some(inner) => inner.finish_refresh(id, generation, result),
                None => Ok(RefreshOutcome::Discarded),
            }
        });

        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(flight = id, error = %e, "Refresh task ended abnormally");
                    if let Some(inner) = weak.upgrade() {
                        let mut state = inner.state.lock();
                        inner.release_flight(&mut state, id);
                        inner.publish(&state);
                    }
                    Err(SessionError::Transient(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        debug!(flight = id, "Starting refresh");
        state.refresh = Some(RefreshFlight {
            id,
            generation,
            future: future.clone(),
        });
        self.inner.publish(&state);
        Ok(Some(JoinedFlight {
            future,
            current: true,
        }))
    }

    /// Record user activity now.
    pub fn mark_active(&self) {
        self.inner.touch_activity(self.inner.clock.now(), false);
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.state.lock().session.as_ref().map(|s| s.identity.clone())
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.inner.state.lock().session.as_ref().map(|s| s.credential.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.identity.role.is_elevated())
            .unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().view().is_loading
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn view(&self) -> SessionView {
        self.inner.view_tx.borrow().clone()
    }

    /// Receive a new `SessionView` after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view_tx.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn activity(&self) -> Arc<ActivityState> {
        Arc::clone(&self.inner.activity)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}

// ============================================================================
// Tests
// ============================================================================
