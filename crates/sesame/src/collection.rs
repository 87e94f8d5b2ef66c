//! Secret collections.

use chrono::{DateTime, Utc};
use sesame_bus::{ObjectPath, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{Result, SecretError};
use crate::interfaces::{props, COLLECTION_INTERFACE};
use crate::item::{bool_property, delete_object, string_property, timestamp_property, Item};
use crate::properties::ObjectProxy;
use crate::service::{reply_fields, take_path, Service};
use crate::sync;
use crate::types::SecretValue;

/// Proxy for a collection of items.
pub struct Collection {
    service: Weak<Service>,
    proxy: ObjectProxy,
}

impl Collection {
    /// Load the collection at `path`.
    pub async fn new(service: &Arc<Service>, path: ObjectPath) -> Result<Self> {
        let proxy =
            ObjectProxy::new(service.bus(), service.bus_name(), path, COLLECTION_INTERFACE)
                .await?;
        if !proxy.have_cached_properties() {
            return Err(SecretError::UnknownObject(proxy.path().to_string()));
        }
        Ok(Self {
            service: Arc::downgrade(service),
            proxy,
        })
    }

    pub fn path(&self) -> &ObjectPath {
        self.proxy.path()
    }

    pub fn service(&self) -> Result<Arc<Service>> {
        self.service.upgrade().ok_or(SecretError::ServiceClosed)
    }

    pub fn label(&self) -> Option<String> {
        string_property(&self.proxy, props::LABEL)
    }

    pub fn locked(&self) -> bool {
        bool_property(&self.proxy, props::LOCKED)
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        timestamp_property(&self.proxy, props::CREATED)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        timestamp_property(&self.proxy, props::MODIFIED)
    }

    /// Paths of the items in the collection, as last cached.
    pub fn item_paths(&self) -> Vec<ObjectPath> {
        self.proxy
            .cached_property(props::ITEMS)
            .and_then(|v| v.as_paths().map(<[ObjectPath]>::to_vec))
            .unwrap_or_default()
    }

    pub async fn set_label(&self, label: &str) -> Result<()> {
        self.service()?;
        self.proxy.set_property(props::LABEL, Value::from(label)).await
    }

    pub fn set_label_sync(&self, label: &str) -> Result<()> {
        sync::wait(self.set_label(label))
    }

    pub async fn refresh(&self) -> Result<()> {
        self.service()?;
        self.proxy.refresh().await
    }

    pub fn refresh_sync(&self) -> Result<()> {
        sync::wait(self.refresh())
    }

    /// Load a proxy for every item in the collection.
    pub async fn items(&self) -> Result<Vec<Item>> {
        let service = self.service()?;
        self.proxy.refresh().await?;

        let mut items = Vec::new();
        for path in self.item_paths() {
            items.push(Item::new(&service, path).await?);
        }
        Ok(items)
    }

    pub fn items_sync(&self) -> Result<Vec<Item>> {
        sync::wait(self.items())
    }

    /// Store a new secret in the collection.
    ///
    /// With `replace`, an existing item with the same attributes is updated
    /// instead. Returns `None` when the service asked for a prompt and it was
    /// dismissed.
    pub async fn create_item(
        &self,
        label: &str,
        attributes: &BTreeMap<String, String>,
        value: &SecretValue,
        replace: bool,
    ) -> Result<Option<Item>> {
        let service = self.service()?;
        let session = service.ensure_session().await?;

        let mut properties = BTreeMap::new();
        properties.insert(props::ITEM_LABEL.to_string(), Value::variant(label));
        properties.insert(
            props::ITEM_ATTRIBUTES.to_string(),
            Value::variant(attributes.clone()),
        );
        let call = self
            .proxy
            .method("CreateItem")
            .arg(Value::Dict(properties))
            .arg(session.encode(value)?)
            .arg(replace);
        let mut fields = reply_fields(service.call(call).await?, "(oo)")?;

        let prompt = take_path(fields.pop());
        let mut created = take_path(fields.pop()).filter(|p| !p.is_root());
        if created.is_none() {
            if let Some(prompt) = prompt.filter(|p| !p.is_root()) {
                created = match service.run_prompt(prompt, "o").await? {
                    Some(Value::Path(path)) if !path.is_root() => Some(path),
                    _ => None,
                };
            }
        }
        let Some(path) = created else {
            return Ok(None);
        };

        debug!(collection = %self.path(), item = %path, "Created item");
        self.proxy.refresh().await?;
        Ok(Some(Item::new(&service, path).await?))
    }

    /// Blocking variant of [`Collection::create_item`].
    pub fn create_item_sync(
        &self,
        label: &str,
        attributes: &BTreeMap<String, String>,
        value: &SecretValue,
        replace: bool,
    ) -> Result<Option<Item>> {
        sync::wait(self.create_item(label, attributes, value, replace))
    }

    /// Delete the collection and everything in it.
    pub async fn delete(&self) -> Result<bool> {
        let service = self.service()?;
        delete_object(&service, &self.proxy).await
    }

    pub fn delete_sync(&self) -> Result<bool> {
        sync::wait(self.delete())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", self.path())
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockService;
    use crate::types::ServiceFlags;
    use sesame_bus::MemoryBus;
    use sesame_core::Config;

    async fn fixture() -> (MockService, Arc<Service>, Collection) {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let path = mock.add_collection("Login", None);
        let service = Service::new(Arc::new(bus), Config::default(), ServiceFlags::NONE)
            .await
            .unwrap();
        let collection = Collection::new(&service, path).await.unwrap();
        (mock, service, collection)
    }

    fn attrs(user: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("user".to_string(), user.to_string());
        map
    }

    #[tokio::test]
    async fn test_create_item() {
        let (mock, _service, collection) = fixture().await;
        let item = collection
            .create_item("Mail", &attrs("alice"), &SecretValue::text("pw"), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.label().as_deref(), Some("Mail"));
        assert_eq!(mock.item_secret(item.path()), Some(b"pw".to_vec()));
        assert_eq!(collection.item_paths(), vec![item.path().clone()]);
    }

    #[tokio::test]
    async fn test_create_item_replace() {
        let (mock, _service, collection) = fixture().await;
        let first = collection
            .create_item("Mail", &attrs("alice"), &SecretValue::text("old"), false)
            .await
            .unwrap()
            .unwrap();
        let second = collection
            .create_item("Mail", &attrs("alice"), &SecretValue::text("new"), true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.path(), second.path());
        assert_eq!(mock.item_secret(first.path()), Some(b"new".to_vec()));
        assert_eq!(collection.items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_item_in_locked_collection() {
        let (mock, _service, collection) = fixture().await;
        mock.set_locked(collection.path(), true);
        collection.refresh().await.unwrap();
        assert!(collection.locked());

        let err = collection
            .create_item("Mail", &attrs("alice"), &SecretValue::text("pw"), false)
            .await
            .unwrap_err();
        assert_eq!(
            err.as_transport().and_then(|e| e.name()),
            Some("org.freedesktop.Secret.Error.IsLocked")
        );
    }

    #[tokio::test]
    async fn test_set_label_and_delete() {
        let (mock, _service, collection) = fixture().await;
        collection.set_label("Personal").await.unwrap();
        assert_eq!(collection.label().as_deref(), Some("Personal"));

        assert!(collection.delete().await.unwrap());
        assert!(!mock.has_object(collection.path()));
    }
}
