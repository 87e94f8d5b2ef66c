//! Remote property caching.
//!
//! An [`ObjectProxy`] keeps the last known value of every property of one
//! interface on one remote object. `GetAll` results and `PropertiesChanged`
//! signals are merged into the cache in arrival order, and every update is
//! announced on a broadcast channel.

use parking_lot::Mutex;
use sesame_bus::{Bus, MethodCall, ObjectPath, SignalRule, Subscription, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::interfaces::PROPERTIES_INTERFACE;
use crate::sync;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A property update.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    /// New value, or `None` when the property was invalidated.
    pub value: Option<Value>,
}

#[derive(Default)]
struct PropertyCache {
    values: BTreeMap<String, Value>,
    ever_cached: bool,
}

/// Client-side view of one interface on a remote object.
pub struct ObjectProxy {
    bus: Arc<dyn Bus>,
    destination: String,
    path: ObjectPath,
    interface: String,
    cache: Mutex<PropertyCache>,
    subscription: Mutex<Option<Subscription>>,
    changes: broadcast::Sender<PropertyChange>,
}

impl ObjectProxy {
    /// Create a proxy and load its properties.
    ///
    /// A remote error from the initial load leaves the cache empty; check
    /// [`ObjectProxy::have_cached_properties`] to tell whether the object
    /// exists.
    pub async fn new(
        bus: Arc<dyn Bus>,
        destination: impl Into<String>,
        path: ObjectPath,
        interface: impl Into<String>,
    ) -> Result<Self> {
        let destination = destination.into();
        let rule = SignalRule::new(PROPERTIES_INTERFACE)
            .sender(destination.clone())
            .path(path.clone())
            .member("PropertiesChanged");
        let subscription = bus.subscribe(rule).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let proxy = Self {
            bus,
            destination,
            path,
            interface: interface.into(),
            cache: Mutex::new(PropertyCache::default()),
            subscription: Mutex::new(Some(subscription)),
            changes,
        };

        match proxy.refresh().await {
            Ok(()) => {}
            Err(crate::SecretError::Transport(e)) if e.name().is_some() => {
                debug!(path = %proxy.path, error = %e, "Couldn't load properties");
            }
            Err(e) => return Err(e),
        }
        Ok(proxy)
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub(crate) fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Build a call to a method of this proxy's interface.
    pub(crate) fn method(&self, member: &str) -> MethodCall {
        MethodCall::new(
            self.destination.as_str(),
            self.path.clone(),
            self.interface.as_str(),
            member,
        )
    }

    /// Fetch every property with `GetAll` and merge the result.
    ///
    /// A reply of the wrong shape is logged and leaves the cache untouched.
    pub async fn refresh(&self) -> Result<()> {
        let call = MethodCall::new(
            self.destination.as_str(),
            self.path.clone(),
            PROPERTIES_INTERFACE,
            "GetAll",
        )
        .arg(self.interface.as_str());

        let reply = self.bus.call(call).await?;
        self.pump();

        if !reply.is_of_type("(a{sv})") {
            warn!(
                path = %self.path,
                signature = %reply.signature(),
                "Couldn't load properties: unexpected reply"
            );
            return Ok(());
        }

        if let Some(Value::Dict(values)) = reply.into_fields().and_then(|mut f| f.pop()) {
            self.merge(values, Vec::new());
        }
        Ok(())
    }

    /// Blocking variant of [`ObjectProxy::refresh`].
    pub fn refresh_sync(&self) -> Result<()> {
        sync::wait(self.refresh())
    }

    /// Whether any property was ever cached.
    pub fn have_cached_properties(&self) -> bool {
        self.pump();
        self.cache.lock().ever_cached
    }

    /// Last known value of a property.
    pub fn cached_property(&self, name: &str) -> Option<Value> {
        self.pump();
        self.cache.lock().values.get(name).cloned()
    }

    /// Names of every cached property.
    pub fn cached_property_names(&self) -> Vec<String> {
        self.pump();
        self.cache.lock().values.keys().cloned().collect()
    }

    /// Set a remote property, updating the cache when the call succeeds.
    pub async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        let call = MethodCall::new(
            self.destination.as_str(),
            self.path.clone(),
            PROPERTIES_INTERFACE,
            "Set",
        )
        .arg(self.interface.as_str())
        .arg(name)
        .arg(Value::variant(value.clone()));

        self.bus.call(call).await?;
        self.pump();

        let mut values = BTreeMap::new();
        values.insert(name.to_string(), value);
        self.merge(values, Vec::new());
        Ok(())
    }

    /// Blocking variant of [`ObjectProxy::set_property`].
    pub fn set_property_sync(&self, name: &str, value: Value) -> Result<()> {
        sync::wait(self.set_property(name, value))
    }

    /// Receive every future property update.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PropertyChange> {
        self.changes.subscribe()
    }

    /// Apply queued `PropertiesChanged` signals.
    fn pump(&self) {
        let mut pending = Vec::new();
        {
            let mut subscription = self.subscription.lock();
            if let Some(subscription) = subscription.as_mut() {
                while let Ok(signal) = subscription.signals.try_recv() {
                    pending.push(signal);
                }
            }
        }

        for signal in pending {
            if !signal.body.is_of_type("(sa{sv}as)") {
                warn!(
                    path = %self.path,
                    signature = %signal.body.signature(),
                    "Ignoring malformed PropertiesChanged signal"
                );
                continue;
            }
            let mut fields = signal.body.into_fields().unwrap_or_default();
            let invalidated = match fields.pop() {
                Some(Value::Strings(names)) => names,
                _ => Vec::new(),
            };
            let changed = match fields.pop() {
                Some(Value::Dict(values)) => values,
                _ => BTreeMap::new(),
            };
            if fields.pop().as_ref().and_then(Value::as_str) != Some(self.interface.as_str()) {
                continue;
            }
            self.merge(changed, invalidated);
        }
    }

    fn merge(&self, changed: BTreeMap<String, Value>, invalidated: Vec<String>) {
        let mut notifications = Vec::with_capacity(changed.len() + invalidated.len());
        {
            let mut cache = self.cache.lock();
            for (name, value) in changed {
                let value = value.into_unwrapped();
                cache.values.insert(name.clone(), value.clone());
                cache.ever_cached = true;
                notifications.push(PropertyChange {
                    name,
                    value: Some(value),
                });
            }
            for name in invalidated {
                if cache.values.remove(&name).is_some() {
                    notifications.push(PropertyChange { name, value: None });
                }
            }
        }

        for change in notifications {
            // No receivers is fine
            let _ = self.changes.send(change);
        }
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.lock().take() {
            self.bus.unsubscribe(subscription.id);
        }
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("destination", &self.destination)
            .field("path", &self.path)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{props, ITEM_INTERFACE};
    use crate::mock::MockService;
    use sesame_bus::{MemoryBus, Signal};
    use std::collections::BTreeMap;

    async fn item_proxy() -> (MemoryBus, MockService, ObjectProxy) {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let collection = mock.add_collection("Login", Some("default"));
        let item = mock.add_item(&collection, "Mail", &[("user", "alice")], b"pw", "text/plain");
        let proxy = ObjectProxy::new(Arc::new(bus.clone()), mock.bus_name(), item, ITEM_INTERFACE)
            .await
            .unwrap();
        (bus, mock, proxy)
    }

    #[tokio::test]
    async fn test_initial_load() {
        let (_bus, _mock, proxy) = item_proxy().await;
        assert!(proxy.have_cached_properties());
        assert_eq!(
            proxy.cached_property(props::LABEL),
            Some(Value::from("Mail"))
        );
        assert_eq!(proxy.cached_property("Nope"), None);
    }

    #[tokio::test]
    async fn test_unknown_object_leaves_cache_empty() {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let missing = ObjectPath::new("/org/freedesktop/secrets/collection/none").unwrap();
        let proxy = ObjectProxy::new(Arc::new(bus.clone()), mock.bus_name(), missing, ITEM_INTERFACE)
            .await
            .unwrap();
        assert!(!proxy.have_cached_properties());
    }

    #[tokio::test]
    async fn test_refresh_emits_ordered_notifications() {
        let (_bus, mock, proxy) = item_proxy().await;
        let mut changes = proxy.subscribe_changes();

        mock.set_property_silently(proxy.path(), props::LABEL, Value::from("Work"));
        proxy.refresh().await.unwrap();

        let mut names = Vec::new();
        while let Ok(change) = changes.try_recv() {
            names.push(change.name);
        }
        let mut expected = proxy.cached_property_names();
        expected.sort();
        assert_eq!(names, expected);
        assert_eq!(proxy.cached_property(props::LABEL), Some(Value::from("Work")));
    }

    #[tokio::test]
    async fn test_set_property_updates_cache() {
        let (bus, mock, proxy) = item_proxy().await;
        let mut changes = proxy.subscribe_changes();

        proxy
            .set_property(props::LABEL, Value::from("Renamed"))
            .await
            .unwrap();

        assert_eq!(bus.call_count("Set"), 1);
        assert_eq!(
            proxy.cached_property(props::LABEL),
            Some(Value::from("Renamed"))
        );
        assert_eq!(
            mock.property(proxy.path(), props::LABEL),
            Some(Value::from("Renamed"))
        );
        let change = changes.try_recv().unwrap();
        assert_eq!(change.name, props::LABEL);
    }

    #[tokio::test]
    async fn test_properties_changed_signal_updates_cache() {
        let (bus, mock, proxy) = item_proxy().await;

        let mut changed = BTreeMap::new();
        changed.insert(props::LABEL.to_string(), Value::variant("From signal"));
        bus.emit(Signal {
            sender: mock.unique_name().to_string(),
            path: proxy.path().clone(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: "PropertiesChanged".to_string(),
            body: Value::tuple([
                Value::from(ITEM_INTERFACE),
                Value::Dict(changed),
                Value::Strings(vec![props::LOCKED.to_string()]),
            ]),
        });

        assert_eq!(
            proxy.cached_property(props::LABEL),
            Some(Value::from("From signal"))
        );
        assert_eq!(proxy.cached_property(props::LOCKED), None);
    }

    #[tokio::test]
    async fn test_signal_for_other_interface_ignored() {
        let (bus, mock, proxy) = item_proxy().await;

        let mut changed = BTreeMap::new();
        changed.insert(props::LABEL.to_string(), Value::variant("Other"));
        bus.emit(Signal {
            sender: mock.unique_name().to_string(),
            path: proxy.path().clone(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: "PropertiesChanged".to_string(),
            body: Value::tuple([
                Value::from("org.example.Other"),
                Value::Dict(changed),
                Value::Strings(vec![]),
            ]),
        });

        assert_eq!(proxy.cached_property(props::LABEL), Some(Value::from("Mail")));
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (bus, _mock, proxy) = item_proxy().await;
        assert_eq!(bus.active_subscriptions(), 1);
        drop(proxy);
        assert_eq!(bus.active_subscriptions(), 0);
        assert_eq!(bus.stats().stale_releases, 0);
    }
}
