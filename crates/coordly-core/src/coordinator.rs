// ── Update coordinator ──
//
// Fetch-cache-fan-out for one integration instance. Owns the cached
// snapshot, the refresh cycle (manual, debounced, or interval-driven),
// the single-flight slot, and the failure state machine. Listeners are
// notified synchronously after each successful or newly-failed cycle.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::CoordinatorConfig;
use crate::debounce::Debouncer;
use crate::error::{ErrorKind, FetchError, SetupError};
use crate::listener::{Detach, ListenerHandle, ListenerId, ListenerRegistry, panic_message};
use crate::stream::{Update, UpdateStream};

type SetupFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;
type SharedRefresh = Shared<BoxFuture<'static, Result<(), FetchError>>>;

// ── Fetch seam ───────────────────────────────────────────────────

/// The per-integration code the coordinator depends on: produce one
/// fresh snapshot, or a classified error.
///
/// Implemented for any `Fn() -> impl Future<Output = Result<T, FetchError>>`.
pub trait Fetch<T>: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> Fetch<T> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'static, Result<T, FetchError>> {
        self().boxed()
    }
}

// ── CoordinatorState ─────────────────────────────────────────────

/// Health of a coordinator, observable by hosts and entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorState {
    /// No refresh has completed yet.
    NeverUpdated,
    /// The last refresh succeeded.
    Healthy,
    /// The last refresh failed; previous data is retained.
    Degraded,
    /// Credentials were rejected. Left only via [`Coordinator::reauthenticated`].
    AuthRequired,
}

/// What started a refresh cycle or data update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Scheduled,
    Requested,
    FirstRefresh,
    Reauth,
    Push,
}

impl Trigger {
    /// Retries that must not hammer a source whose credentials were rejected.
    fn blocked_by_auth(self) -> bool {
        matches!(self, Self::Manual | Self::Scheduled | Self::Requested)
    }
}

struct Status {
    state: CoordinatorState,
    last_update_success: bool,
    last_exception: Option<FetchError>,
    last_update_success_time: Option<DateTime<Utc>>,
    failure_streak: u32,
    /// One-shot override of the update interval, from `FetchError::retry_after`.
    retry_after: Option<Duration>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: CoordinatorState::NeverUpdated,
            last_update_success: false,
            last_exception: None,
            last_update_success_time: None,
            failure_streak: 0,
            retry_after: None,
        }
    }
}

#[derive(Default)]
struct InFlightSlot {
    current: Option<InFlight>,
    generation: u64,
}

struct InFlight {
    generation: u64,
    future: SharedRefresh,
}

// ── Builder ──────────────────────────────────────────────────────

/// Assembles a [`Coordinator`] from its config and collaborator functions.
pub struct CoordinatorBuilder<T> {
    config: CoordinatorConfig,
    fetcher: Box<dyn Fetch<T>>,
    setup: Option<SetupFn>,
    unchanged: Option<fn(&T, &T) -> bool>,
}

impl<T: Send + Sync + 'static> CoordinatorBuilder<T> {
    /// One-shot async setup, run before the first fetch until it succeeds.
    pub fn setup<F, Fut>(mut self, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FetchError>> + Send + 'static,
    {
        self.setup = Some(Box::new(move || setup().boxed()));
        self
    }

    /// Skip notifying listeners when a refresh returns data equal to the
    /// previous snapshot (and the previous refresh also succeeded).
    pub fn skip_unchanged(mut self) -> Self
    where
        T: PartialEq,
    {
        let eq: fn(&T, &T) -> bool = <T as PartialEq>::eq;
        self.unchanged = Some(eq);
        self
    }

    pub fn build(self) -> Coordinator<T> {
        let Self {
            config,
            fetcher,
            setup,
            unchanged,
        } = self;

        let inner = Arc::new_cyclic(|weak: &Weak<CoordinatorInner<T>>| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(
                format!("{} refresh", config.name),
                config.request_refresh_cooldown,
                config.request_refresh_immediate,
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            let _ = inner.refresh(Trigger::Requested).await;
                        }
                    }
                    .boxed()
                },
            );
            let (updates, _) = watch::channel(Update::initial());
            let update_interval = polling_interval(config.update_interval);

            CoordinatorInner {
                listeners: ListenerRegistry::new(config.name.clone()),
                config,
                update_interval: Mutex::new(update_interval),
                fetcher,
                setup,
                setup_done: AtomicBool::new(false),
                unchanged,
                data: ArcSwapOption::empty(),
                status: Mutex::new(Status::default()),
                updates,
                in_flight: Mutex::new(InFlightSlot::default()),
                debouncer,
                scheduled: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }
        });

        Coordinator { inner }
    }
}

// ── Coordinator ──────────────────────────────────────────────────

/// Fetch-cache-fan-out handle for one integration instance.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`; every clone drives the
/// same state. Must be used from within a tokio runtime: refreshes and
/// timers run on spawned tasks.
pub struct Coordinator<T> {
    inner: Arc<CoordinatorInner<T>>,
}

struct CoordinatorInner<T> {
    config: CoordinatorConfig,
    /// Starts from the config; changed at runtime by `set_update_interval`.
    update_interval: Mutex<Option<Duration>>,
    fetcher: Box<dyn Fetch<T>>,
    setup: Option<SetupFn>,
    setup_done: AtomicBool,
    unchanged: Option<fn(&T, &T) -> bool>,
    data: ArcSwapOption<T>,
    status: Mutex<Status>,
    listeners: ListenerRegistry,
    updates: watch::Sender<Update<T>>,
    in_flight: Mutex<InFlightSlot>,
    debouncer: Debouncer,
    /// Cancels the pending interval refresh, if any.
    scheduled: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl<T> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Coordinator<T> {
    /// Create a coordinator with no setup function.
    pub fn new<F>(config: CoordinatorConfig, fetcher: F) -> Self
    where
        F: Fetch<T>,
    {
        Self::builder(config, fetcher).build()
    }

    pub fn builder<F>(config: CoordinatorConfig, fetcher: F) -> CoordinatorBuilder<T>
    where
        F: Fetch<T>,
    {
        CoordinatorBuilder {
            config,
            fetcher: Box::new(fetcher),
            setup: None,
            unchanged: None,
        }
    }

    // ── Refresh operations ───────────────────────────────────────

    /// Refresh now. Joins a refresh already in flight instead of fetching
    /// twice. Failures are recorded in the coordinator's state, never
    /// returned.
    pub async fn refresh(&self) {
        let _ = self.inner.refresh(Trigger::Manual).await;
    }

    /// Debounced refresh: bursts inside the cooldown window collapse into
    /// a single refresh.
    pub async fn request_refresh(&self) {
        self.inner.debouncer.call().await;
    }

    /// Non-async [`request_refresh`](Self::request_refresh), safe to call
    /// from a listener.
    pub fn schedule_request_refresh(&self) {
        self.inner.debouncer.schedule_call();
    }

    /// Setup-time refresh: like [`refresh`](Self::refresh) but hands the
    /// failure back so setup can abort (or retry later) visibly.
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        let name = &self.inner.config.name;
        if self.inner.shutdown.is_cancelled() {
            return Err(SetupError::ShutDown { name: name.clone() });
        }

        let result = self.inner.refresh(Trigger::FirstRefresh).await;

        if self.inner.shutdown.is_cancelled() {
            return Err(SetupError::ShutDown { name: name.clone() });
        }
        result.map_err(|err| SetupError::from_fetch(name, err))
    }

    /// The external re-authentication action: leave `AuthRequired` and
    /// refresh with the new credentials.
    pub async fn reauthenticated(&self) {
        {
            let mut status = self.inner.status();
            if status.state == CoordinatorState::AuthRequired {
                status.state = if self.inner.data.load().is_some() {
                    CoordinatorState::Degraded
                } else {
                    CoordinatorState::NeverUpdated
                };
                info!(coordinator = %self.inner.config.name, "credentials refreshed, resuming updates");
            }
        }
        let _ = self.inner.refresh(Trigger::Reauth).await;
    }

    /// Push path: install data that is already fresh, without fetching.
    pub fn set_updated_data(&self, data: T) {
        if self.inner.shutdown.is_cancelled() {
            debug!(coordinator = %self.inner.config.name, "ignoring pushed data after shutdown");
            return;
        }
        self.inner.cancel_scheduled_refresh();
        self.inner.debouncer.cancel();
        self.inner.apply_success(Arc::new(data), Trigger::Push);
        self.inner.schedule_refresh();
    }

    /// Change the polling cadence. The pending interval refresh is re-armed
    /// with the new value; `None` (or zero) stops interval polling.
    pub fn set_update_interval(&self, interval: Option<Duration>) {
        let interval = polling_interval(interval);
        *lock(&self.inner.update_interval) = interval;
        debug!(coordinator = %self.inner.config.name, ?interval, "update interval changed");
        match interval {
            Some(_) => self.inner.schedule_refresh(),
            None => self.inner.cancel_scheduled_refresh(),
        }
    }

    /// Notify listeners without fetching.
    pub fn update_listeners(&self) {
        self.inner.publish_and_notify();
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Subscribe to updates. The first listener arms the interval timer;
    /// unsubscribing the last one disarms it.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_listener_with_context(callback, None)
    }

    /// Subscribe with a context the fetch function can read back through
    /// [`contexts`](Self::contexts).
    pub fn add_listener_with_context<F>(&self, callback: F, context: Option<String>) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let first = self.inner.listeners.is_empty();
        let id = self.inner.listeners.insert(Box::new(callback), context);
        if first {
            self.inner.schedule_refresh();
        }
        let owner = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
        ListenerHandle::new(id, owner)
    }

    /// Same as [`ListenerHandle::unsubscribe`]. Idempotent.
    pub fn remove_listener(&self, handle: &ListenerHandle) {
        handle.unsubscribe();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Distinct contexts of current listeners.
    pub fn contexts(&self) -> Vec<String> {
        self.inner.listeners.contexts()
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Cancel both timers and drop all listeners. An in-flight fetch is
    /// allowed to finish but its result is discarded. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.cancel_scheduled_refresh();
        self.inner.debouncer.shutdown();
        self.inner.listeners.clear();
        debug!(coordinator = %self.inner.config.name, "coordinator shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // ── State observation ────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn update_interval(&self) -> Option<Duration> {
        *lock(&self.inner.update_interval)
    }

    /// Last successfully fetched (or pushed) snapshot.
    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.data.load_full()
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.status().last_update_success
    }

    pub fn last_exception(&self) -> Option<FetchError> {
        self.inner.status().last_exception.clone()
    }

    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        self.inner.status().last_update_success_time
    }

    pub fn failure_streak(&self) -> u32 {
        self.inner.status().failure_streak
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.status().state
    }

    /// Subscribe to published updates.
    pub fn updates(&self) -> UpdateStream<T> {
        UpdateStream::new(self.inner.updates.subscribe())
    }
}

impl<T> fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = lock(&self.inner.status);
        f.debug_struct("Coordinator")
            .field("name", &self.inner.config.name)
            .field("state", &status.state)
            .field("failure_streak", &status.failure_streak)
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

// ── Refresh cycle ────────────────────────────────────────────────

impl<T: Send + Sync + 'static> CoordinatorInner<T> {
    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    /// Single-flight entry point: join the cycle in flight or start one.
    async fn refresh(self: &Arc<Self>, trigger: Trigger) -> Result<(), FetchError> {
        if self.shutdown.is_cancelled() {
            debug!(coordinator = %self.config.name, ?trigger, "refresh after shutdown ignored");
            return Ok(());
        }

        let shared = {
            let mut slot = lock(&self.in_flight);
            if let Some(in_flight) = slot.current.as_ref() {
                trace!(coordinator = %self.config.name, ?trigger, "joining refresh in flight");
                in_flight.future.clone()
            } else {
                slot.generation += 1;
                let generation = slot.generation;
                let this = Arc::clone(self);
                // The cycle runs on its own task so a cancelled caller never
                // aborts a fetch half-way.
                let task = tokio::spawn(async move { this.run_cycle(trigger, generation).await });
                let shared = async move {
                    task.await.unwrap_or_else(|err| {
                        Err(FetchError::unknown(format!("refresh task failed: {err}")))
                    })
                }
                .boxed()
                .shared();
                slot.current = Some(InFlight {
                    generation,
                    future: shared.clone(),
                });
                shared
            }
        };

        shared.await
    }

    async fn run_cycle(self: Arc<Self>, trigger: Trigger, generation: u64) -> Result<(), FetchError> {
        // Frees the slot after listeners were notified, also on panic.
        let _release = InFlightRelease {
            slot: &self.in_flight,
            generation,
        };

        self.cancel_scheduled_refresh();
        self.debouncer.cancel();

        if trigger.blocked_by_auth() && self.status().state == CoordinatorState::AuthRequired {
            debug!(coordinator = %self.config.name, ?trigger, "refresh skipped, re-authentication required");
            return Err(self
                .status()
                .last_exception
                .clone()
                .unwrap_or_else(|| FetchError::auth_required("re-authentication required")));
        }

        let result = self.fetch().await;

        if self.shutdown.is_cancelled() {
            debug!(coordinator = %self.config.name, "discarding refresh result after shutdown");
            return result.map(drop);
        }

        let outcome = match result {
            Ok(data) => {
                self.apply_success(Arc::new(data), trigger);
                Ok(())
            }
            Err(err) => {
                self.apply_failure(&err, trigger);
                Err(err)
            }
        };

        self.schedule_refresh();
        outcome
    }

    /// Run setup (until it has succeeded once), then the fetch function,
    /// under the configured timeout. Panics become `Unknown` errors.
    async fn fetch(&self) -> Result<T, FetchError> {
        if let Some(setup) = self.setup.as_ref() {
            if !self.setup_done.load(Ordering::Acquire) {
                guarded(setup.as_ref(), self.config.request_timeout).await?;
                self.setup_done.store(true, Ordering::Release);
                debug!(coordinator = %self.config.name, "setup completed");
            }
        }

        trace!(coordinator = %self.config.name, "fetching data");
        guarded(|| self.fetcher.fetch(), self.config.request_timeout).await
    }

    fn apply_success(&self, data: Arc<T>, trigger: Trigger) {
        let previous = self.data.load_full();
        let (recovered, previously_successful) = {
            let mut status = self.status();
            let recovered = matches!(
                status.state,
                CoordinatorState::Degraded | CoordinatorState::AuthRequired
            );
            let previously_successful = status.last_update_success;
            status.state = CoordinatorState::Healthy;
            status.last_update_success = true;
            status.last_update_success_time = Some(Utc::now());
            status.failure_streak = 0;
            status.retry_after = None;
            (recovered, previously_successful)
        };

        if recovered {
            info!(coordinator = %self.config.name, "fetching data recovered");
        }

        let unchanged = trigger != Trigger::Push
            && previously_successful
            && match (self.unchanged, previous.as_deref()) {
                (Some(eq), Some(prev)) => eq(prev, &data),
                _ => false,
            };

        self.data.store(Some(data));
        debug!(coordinator = %self.config.name, ?trigger, "data updated");

        if unchanged {
            trace!(coordinator = %self.config.name, "data unchanged, listeners not notified");
            return;
        }
        self.publish_and_notify();
    }

    fn apply_failure(&self, err: &FetchError, trigger: Trigger) {
        let (state_changed, streak) = {
            let mut status = self.status();
            let previous_state = status.state;
            status.last_update_success = false;
            status.last_exception = Some(err.clone());
            status.failure_streak = status.failure_streak.saturating_add(1);
            status.retry_after = err.retry_after();
            status.state = if err.is_auth_required() {
                CoordinatorState::AuthRequired
            } else {
                CoordinatorState::Degraded
            };
            (previous_state != status.state, status.failure_streak)
        };

        let name = &self.config.name;
        // The setup caller owns first-refresh errors; repeats of a streak stay quiet.
        let loud = trigger != Trigger::FirstRefresh && streak == 1;
        match err.kind() {
            ErrorKind::AuthRequired if trigger != Trigger::FirstRefresh => {
                warn!(coordinator = %name, error = %err, "authentication failed, updates suspended until re-authentication");
            }
            ErrorKind::Unavailable if loud => {
                warn!(coordinator = %name, error = %err, "error fetching data");
            }
            ErrorKind::Unknown if loud => {
                error!(coordinator = %name, error = %err, "unexpected error fetching data");
            }
            _ => {
                debug!(coordinator = %name, failures = streak, error = %err, "fetch failed");
            }
        }

        if state_changed {
            self.publish_and_notify();
        }
    }

    fn publish_and_notify(&self) {
        let update = {
            let status = self.status();
            Update {
                data: self.data.load_full(),
                last_update_success: status.last_update_success,
                state: status.state,
            }
        };
        self.updates.send_replace(update);
        self.listeners.notify_all();
    }

    // ── Interval timer ───────────────────────────────────────────

    /// Arm the interval timer, replacing any pending one. No-op without an
    /// interval, without listeners, after shutdown, or while auth is required.
    fn schedule_refresh(self: &Arc<Self>) {
        let Some(interval) = *lock(&self.update_interval) else {
            return;
        };
        if self.shutdown.is_cancelled() || self.listeners.is_empty() {
            return;
        }
        let delay = {
            let mut status = self.status();
            if status.state == CoordinatorState::AuthRequired {
                return;
            }
            status.retry_after.take().unwrap_or(interval)
        };

        let cancel = self.shutdown.child_token();
        if let Some(previous) = lock(&self.scheduled).replace(cancel.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.refresh(Trigger::Scheduled).await;
                    }
                }
            }
        });
        trace!(coordinator = %self.config.name, ?delay, "next refresh scheduled");
    }

    fn cancel_scheduled_refresh(&self) {
        if let Some(token) = lock(&self.scheduled).take() {
            token.cancel();
        }
    }
}

impl<T: Send + Sync + 'static> Detach for CoordinatorInner<T> {
    fn detach(&self, id: ListenerId) {
        if self.listeners.remove(id) && self.listeners.is_empty() {
            debug!(coordinator = %self.config.name, "last listener removed, interval refresh stopped");
            self.cancel_scheduled_refresh();
        }
    }
}

impl<T> Drop for CoordinatorInner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.debouncer.shutdown();
    }
}

/// Clears the in-flight slot when the cycle that owns it ends.
struct InFlightRelease<'a> {
    slot: &'a Mutex<InFlightSlot>,
    generation: u64,
}

impl Drop for InFlightRelease<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot
            .current
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == self.generation)
        {
            slot.current = None;
        }
    }
}

/// Start a collaborator future and await it under an optional timeout.
/// A timeout becomes `Unavailable`; a panic, while starting or polling,
/// becomes `Unknown`.
async fn guarded<R, F>(start: F, timeout: Option<Duration>) -> Result<R, FetchError>
where
    F: FnOnce() -> BoxFuture<'static, Result<R, FetchError>>,
{
    let future = match catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind(),
        Err(payload) => return Err(panicked(payload.as_ref())),
    };
    let caught = match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| FetchError::unavailable(format!("timed out after {limit:?}")))?,
        None => future.await,
    };
    caught.unwrap_or_else(|payload| Err(panicked(payload.as_ref())))
}

/// A zero interval would re-arm instantly forever; treat it as no polling.
fn polling_interval(interval: Option<Duration>) -> Option<Duration> {
    interval.filter(|interval| !interval.is_zero())
}

fn panicked(payload: &(dyn Any + Send)) -> FetchError {
    FetchError::unknown(format!("fetch panicked: {}", panic_message(payload)))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
