// ── Entity binding ──
//
// Capability traits a host can probe on an entity, plus the stock glue
// that ties an entity's lifetime to a coordinator subscription.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::coordinator::{Coordinator, lock};
use crate::listener::ListenerHandle;

// ── Capabilities ─────────────────────────────────────────────────

/// Whether the entity currently has trustworthy data.
pub trait Availability {
    fn available(&self) -> bool;
}

/// An entity exposing a single numeric reading.
pub trait NumericState {
    fn native_value(&self) -> Option<f64>;

    fn native_unit(&self) -> Option<&str> {
        None
    }
}

/// An entity attached to a physical or logical device.
pub trait DeviceInfoProvider {
    fn device_info(&self) -> Option<&DeviceInfo>;
}

/// Descriptive metadata about the device an entity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

// ── CoordinatorEntity ────────────────────────────────────────────

/// Base for entities that render a coordinator's data.
///
/// `added` subscribes, `will_remove` unsubscribes. Availability follows
/// the coordinator's `last_update_success`.
pub struct CoordinatorEntity<T> {
    coordinator: Coordinator<T>,
    context: Option<String>,
    subscription: Mutex<Option<ListenerHandle>>,
}

impl<T: Send + Sync + 'static> CoordinatorEntity<T> {
    pub fn new(coordinator: Coordinator<T>) -> Self {
        Self {
            coordinator,
            context: None,
            subscription: Mutex::new(None),
        }
    }

    /// Attach a context the fetch function can use to narrow what it loads.
    pub fn with_context(coordinator: Coordinator<T>, context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..Self::new(coordinator)
        }
    }

    pub fn coordinator(&self) -> &Coordinator<T> {
        &self.coordinator
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Called when the host adds the entity: subscribe `on_update` to the
    /// coordinator. Re-adding replaces the previous subscription.
    pub fn added<F>(&self, on_update: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handle = self
            .coordinator
            .add_listener_with_context(on_update, self.context.clone());
        if let Some(previous) = lock(&self.subscription).replace(handle) {
            previous.unsubscribe();
        }
    }

    /// Called when the host is about to remove the entity.
    pub fn will_remove(&self) {
        if let Some(handle) = lock(&self.subscription).take() {
            handle.unsubscribe();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription)
            .as_ref()
            .is_some_and(ListenerHandle::is_subscribed)
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.coordinator.data()
    }

    /// Entity-initiated update: a debounced coordinator refresh.
    pub async fn update(&self) {
        self.coordinator.request_refresh().await;
    }
}

impl<T: Send + Sync + 'static> Availability for CoordinatorEntity<T> {
    fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }
}

impl<T> fmt::Debug for CoordinatorEntity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorEntity")
            .field("coordinator", &self.coordinator)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// ── CoordinatorSensor ────────────────────────────────────────────

type ValueFn<T> = Box<dyn Fn(&T) -> Option<f64> + Send + Sync>;

/// Numeric sensor that extracts its reading from the coordinator's snapshot.
pub struct CoordinatorSensor<T> {
    entity: CoordinatorEntity<T>,
    unique_id: String,
    unit: Option<String>,
    device_info: Option<DeviceInfo>,
    value_fn: ValueFn<T>,
}

impl<T: Send + Sync + 'static> CoordinatorSensor<T> {
    pub fn new<F>(coordinator: Coordinator<T>, unique_id: impl Into<String>, value_fn: F) -> Self
    where
        F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
    {
        let unique_id = unique_id.into();
        Self {
            entity: CoordinatorEntity::with_context(coordinator, unique_id.clone()),
            unique_id,
            unit: None,
            device_info: None,
            value_fn: Box::new(value_fn),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn entity(&self) -> &CoordinatorEntity<T> {
        &self.entity
    }
}

impl<T: Send + Sync + 'static> Availability for CoordinatorSensor<T> {
    fn available(&self) -> bool {
        self.entity.available()
    }
}

impl<T: Send + Sync + 'static> NumericState for CoordinatorSensor<T> {
    fn native_value(&self) -> Option<f64> {
        self.entity.data().and_then(|data| (self.value_fn)(&data))
    }

    fn native_unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl<T> DeviceInfoProvider for CoordinatorSensor<T> {
    fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }
}

impl<T> fmt::Debug for CoordinatorSensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorSensor")
            .field("unique_id", &self.unique_id)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}
