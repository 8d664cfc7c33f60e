// ── Debouncer ──
//
// Collapses bursts of calls into one execution per cooldown window.
// The cooldown timer is a spawned task owning a `CancellationToken`
// child of the debouncer's shutdown token, and holding only a weak
// reference back, so dropping the debouncer also ends the timer.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type DebouncedFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Rate-limits an async function to one run per `cooldown`.
///
/// With `immediate = false` the first call starts the window and the
/// function runs when it closes; further calls inside the window are
/// absorbed. With `immediate = true` the first call runs right away and
/// calls inside the following window trigger one trailing run.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

struct DebouncerInner {
    name: String,
    cooldown: Duration,
    immediate: bool,
    function: DebouncedFn,
    state: Mutex<DebounceState>,
    /// Serializes executions of `function`.
    execute_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct DebounceState {
    timer: Option<Timer>,
    execute_at_end_of_timer: bool,
    next_timer_id: u64,
}

struct Timer {
    id: u64,
    cancel: CancellationToken,
}

impl Debouncer {
    pub fn new<F>(name: impl Into<String>, cooldown: Duration, immediate: bool, function: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DebouncerInner {
                name: name.into(),
                cooldown,
                immediate,
                function: Arc::new(function),
                state: Mutex::new(DebounceState::default()),
                execute_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Request an execution, subject to the cooldown.
    ///
    /// In immediate mode this awaits the function when it runs now.
    pub async fn call(&self) {
        self.inner.call().await;
    }

    /// Non-async variant of [`call`](Self::call): spawns it on the runtime.
    pub fn schedule_call(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.call().await });
    }

    /// Cancel the pending timer and any queued execution.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Cancel and refuse all further calls.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Whether a cooldown window is currently open.
    pub fn timer_active(&self) -> bool {
        self.inner.state().timer.is_some()
    }
}

impl DebouncerInner {
    fn state(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn call(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            warn!(debouncer = %self.name, "debouncer called after shutdown");
            return;
        }

        {
            let mut state = self.state();
            if state.timer.is_some() {
                state.execute_at_end_of_timer = true;
                return;
            }
            if !self.immediate {
                state.execute_at_end_of_timer = true;
                self.start_timer(&mut state);
                return;
            }
        }

        // The run in progress covers this call.
        let Ok(_guard) = self.execute_lock.try_lock() else {
            debug!(debouncer = %self.name, "execution in progress, call dropped");
            return;
        };
        if self.state().timer.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        debug!(debouncer = %self.name, "executing immediately");
        (self.function)().await;

        let mut state = self.state();
        self.start_timer(&mut state);
    }

    fn cancel(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.cancel.cancel();
        }
        state.execute_at_end_of_timer = false;
    }

    fn start_timer(self: &Arc<Self>, state: &mut DebounceState) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(previous) = state.timer.take() {
            previous.cancel.cancel();
        }

        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let cancel = self.shutdown.child_token();
        state.timer = Some(Timer {
            id,
            cancel: cancel.clone(),
        });

        let weak = Arc::downgrade(self);
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(cooldown) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_timer_finished(id).await;
                    }
                }
            }
        });
    }

    async fn on_timer_finished(self: &Arc<Self>, id: u64) {
        {
            let mut state = self.state();
            match state.timer.as_ref() {
                Some(timer) if timer.id == id => state.timer = None,
                _ => return,
            }
            if !state.execute_at_end_of_timer {
                return;
            }
            state.execute_at_end_of_timer = false;
        }

        // An execution already running covers this request.
        let Ok(_guard) = self.execute_lock.try_lock() else {
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        debug!(debouncer = %self.name, "executing after cooldown");
        (self.function)().await;

        let mut state = self.state();
        self.start_timer(&mut state);
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("name", &self.inner.name)
            .field("cooldown", &self.inner.cooldown)
            .field("immediate", &self.inner.immediate)
            .finish_non_exhaustive()
    }
}
