//! User activity tracking and the periodic proactive refresh.
//!
//! The tracker listens to interaction signals from an `ActivitySource` and
//! runs a long-period timer that refreshes the credential before it goes
//! stale. Both are owned by one `TrackerHandle` and torn down together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::controller::{RefreshOutcome, SessionController};
use super::inspector;

/// Sentinel for "never recorded".
const NEVER: i64 = i64::MIN;

/// Process-wide "last active" timestamp, replaced atomically.
#[derive(Debug)]
pub struct ActivityState {
    last_active_ms: AtomicI64,
    last_flushed_ms: AtomicI64,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityState {
    pub fn new() -> Self {
        Self {
            last_active_ms: AtomicI64::new(NEVER),
            last_flushed_ms: AtomicI64::new(NEVER),
        }
    }

    pub fn record(&self, at: DateTime<Utc>) {
        self.last_active_ms.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        match self.last_active_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Returns true for exactly one caller once `every` has passed since the last flush.
    pub(crate) fn claim_flush(&self, at: DateTime<Utc>, every: chrono::Duration) -> bool {
        let now_ms = at.timestamp_millis();
        let last = self.last_flushed_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) < every.num_milliseconds() {
            return false;
        }
        self.last_flushed_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_flushed(&self, at: DateTime<Utc>) {
        self.last_flushed_ms.store(at.timestamp_millis(), Ordering::Release);
    }
}

pub type ActivityListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Anything that can report user interaction: a UI event loop, a terminal, a test.
pub trait ActivitySource: Send + Sync {
    fn subscribe(&self, signal: &str, listener: ActivityListener) -> ListenerId;
    fn unsubscribe(&self, id: ListenerId);
}

/// In-process `ActivitySource`. Hosts call `emit` for each interaction.
#[derive(Default)]
pub struct SignalHub {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, (String, ActivityListener)>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every listener registered for `signal`. Returns how many were called.
    pub fn emit(&self, signal: &str) -> usize {
        // Call outside the lock so listeners may subscribe or unsubscribe.
        let matching: Vec<ActivityListener> = self
            .listeners
            .lock()
            .values()
            .filter(|(kind, _)| kind == signal)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &matching {
            listener();
        }
        matching.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl ActivitySource for SignalHub {
    fn subscribe(&self, signal: &str, listener: ActivityListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .insert(id, (signal.to_string(), listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }
}

pub struct ActivityTracker;

impl ActivityTracker {
    /// Start listening for the configured signals and schedule proactive refreshes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(controller: &SessionController, source: Arc<dyn ActivitySource>) -> TrackerHandle {
        let subscriptions = controller
            .config()
            .activity_signals
            .iter()
            .map(|signal| {
                let controller = controller.clone();
                source.subscribe(signal, Arc::new(move || controller.mark_active()))
            })
            .collect::<Vec<_>>();

        let period = controller.config().refresh_interval();
        let timer = tokio::spawn(Self::run_refresh_timer(controller.clone(), period));
        debug!(signals = subscriptions.len(), ?period, "Activity tracking started");

        TrackerHandle {
            source,
            subscriptions,
            timer: Some(timer),
        }
    }

    async fn run_refresh_timer(controller: SessionController, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            Self::proactive_refresh(&controller).await;
        }
    }

    async fn proactive_refresh(controller: &SessionController) {
        let Some(credential) = controller.current_credential() else {
            debug!("No session, skipping proactive refresh");
            return;
        };
        if inspector::is_expired(&credential, controller.now()) {
            debug!("Credential already expired, skipping proactive refresh");
            return;
        }

        match controller.refresh_now().await {
            Ok(RefreshOutcome::Refreshed) => info!("Proactive refresh succeeded"),
            Ok(RefreshOutcome::Discarded) => debug!("Proactive refresh superseded"),
            Err(e) => {
                // Only end the session the failed refresh was for.
                if controller.current_credential().as_ref() == Some(&credential) {
                    warn!(error = %e, "Proactive refresh failed, signing out");
                    controller.logout();
                } else {
                    debug!(error = %e, "Proactive refresh failed for a session that is already gone");
                }
            }
        }
    }
}

/// Disposal handle for an `ActivityTracker`. Dropping it stops tracking.
#[must_use = "dropping the handle stops activity tracking"]
pub struct TrackerHandle {
    source: Arc<dyn ActivitySource>,
    subscriptions: Vec<ListenerId>,
    timer: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn dispose(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.source.unsubscribe(id);
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
            debug!("Activity tracking stopped");
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}
