// coordly-core: Fetch, cache, and fan out snapshots of external state.
//
// A `Coordinator` wraps one integration's fetch function. It keeps the
// last good snapshot, refreshes on an interval while anyone listens,
// collapses bursts of refresh requests, and tracks whether the source is
// healthy, degraded, or waiting for new credentials.

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod entity;
pub mod error;
pub mod listener;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{CoordinatorConfig, DEFAULT_REQUEST_REFRESH_COOLDOWN};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorState, Fetch};
pub use debounce::Debouncer;
pub use entity::{
    Availability, CoordinatorEntity, CoordinatorSensor, DeviceInfo, DeviceInfoProvider,
    NumericState,
};
pub use error::{ErrorKind, FetchError, SetupError};
pub use listener::{ListenerHandle, ListenerId, ListenerRegistry};
pub use stream::{Update, UpdateStream, UpdateWatchStream};
