// ── Runtime coordinator configuration ──
//
// Describes *how* a coordinator polls. Built by the integration (or by
// `coordly-config` from a profile) and handed in -- core never reads
// config files.

use std::time::Duration;

/// Cooldown applied to [`Coordinator::request_refresh`](crate::Coordinator::request_refresh).
pub const DEFAULT_REQUEST_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

/// Configuration for a single coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Identifier used in logs and diagnostics.
    pub name: String,
    /// How often to refresh while listeners exist. `None` or zero = push-only.
    pub update_interval: Option<Duration>,
    /// Upper bound on a single fetch. `None` leaves it to the fetch function.
    pub request_timeout: Option<Duration>,
    /// Quiet window for debounced refresh requests.
    pub request_refresh_cooldown: Duration,
    /// Run a debounced request at the start of the window instead of the end.
    pub request_refresh_immediate: bool,
}

impl CoordinatorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A zero interval disables polling, same as `None`.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval).filter(|interval| !interval.is_zero());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_request_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.request_refresh_cooldown = cooldown;
        self
    }

    pub fn with_request_refresh_immediate(mut self, immediate: bool) -> Self {
        self.request_refresh_immediate = immediate;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "coordinator".into(),
            update_interval: None,
            request_timeout: None,
            request_refresh_cooldown: DEFAULT_REQUEST_REFRESH_COOLDOWN,
            request_refresh_immediate: false,
        }
    }
}
