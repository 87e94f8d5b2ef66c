//! Secret items.

use chrono::{DateTime, Utc};
use sesame_bus::{ObjectPath, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{Result, SecretError, INVALID_SECRET};
use crate::interfaces::{props, ITEM_INTERFACE};
use crate::properties::ObjectProxy;
use crate::service::{reply_fields, take_path, Service};
use crate::sync;
use crate::types::SecretValue;

/// Proxy for one stored secret.
pub struct Item {
    service: Weak<Service>,
    proxy: ObjectProxy,
}

impl Item {
    /// Load the item at `path`.
    pub async fn new(service: &Arc<Service>, path: ObjectPath) -> Result<Self> {
        let proxy =
            ObjectProxy::new(service.bus(), service.bus_name(), path, ITEM_INTERFACE).await?;
        if !proxy.have_cached_properties() {
            return Err(SecretError::UnknownObject(proxy.path().to_string()));
        }
        Ok(Self {
            service: Arc::downgrade(service),
            proxy,
        })
    }

    /// Blocking variant of [`Item::new`].
    pub fn new_sync(service: &Arc<Service>, path: ObjectPath) -> Result<Self> {
        sync::wait(Self::new(service, path))
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

    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.proxy
            .cached_property(props::ATTRIBUTES)
            .and_then(|v| v.as_attributes().cloned())
            .unwrap_or_default()
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

    pub async fn set_label(&self, label: &str) -> Result<()> {
        self.service()?;
        self.proxy.set_property(props::LABEL, Value::from(label)).await
    }

    pub fn set_label_sync(&self, label: &str) -> Result<()> {
        sync::wait(self.set_label(label))
    }

    pub async fn set_attributes(&self, attributes: BTreeMap<String, String>) -> Result<()> {
        self.service()?;
        self.proxy
            .set_property(props::ATTRIBUTES, Value::Attributes(attributes))
            .await
    }

    pub fn set_attributes_sync(&self, attributes: BTreeMap<String, String>) -> Result<()> {
        sync::wait(self.set_attributes(attributes))
    }

    /// Reload every property from the service.
    pub async fn refresh(&self) -> Result<()> {
        self.service()?;
        self.proxy.refresh().await
    }

    pub fn refresh_sync(&self) -> Result<()> {
        sync::wait(self.refresh())
    }

    /// Retrieve the secret, negotiating a session first if needed.
    pub async fn get_secret(&self) -> Result<SecretValue> {
        let service = self.service()?;
        let session = service.ensure_session().await?;

        let call = self
            .proxy
            .method("GetSecret")
            .arg(Value::Path(session.path().clone()));
        let reply = service.call(call).await?;
        if !reply.is_of_type("((oayays))") {
            return Err(SecretError::protocol(INVALID_SECRET));
        }

        let wire = reply
            .into_fields()
            .and_then(|mut f| f.pop())
            .ok_or_else(|| SecretError::protocol(INVALID_SECRET))?;
        session
            .decode(&wire)
            .ok_or_else(|| SecretError::protocol(INVALID_SECRET))
    }

    /// Blocking variant of [`Item::get_secret`].
    pub fn get_secret_sync(&self) -> Result<SecretValue> {
        sync::wait(self.get_secret())
    }

    /// Replace the secret.
    pub async fn set_secret(&self, value: &SecretValue) -> Result<()> {
        let service = self.service()?;
        let session = service.ensure_session().await?;

        let call = self.proxy.method("SetSecret").arg(session.encode(value)?);
        service.call(call).await?;
        debug!(path = %self.path(), "Stored secret");
        Ok(())
    }

    /// Blocking variant of [`Item::set_secret`].
    pub fn set_secret_sync(&self, value: &SecretValue) -> Result<()> {
        sync::wait(self.set_secret(value))
    }

    /// Delete the item, prompting if the service requires it.
    ///
    /// Returns `false` when the prompt was dismissed.
    pub async fn delete(&self) -> Result<bool> {
        let service = self.service()?;
        delete_object(&service, &self.proxy).await
    }

    /// Blocking variant of [`Item::delete`].
    pub fn delete_sync(&self) -> Result<bool> {
        sync::wait(self.delete())
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("path", self.path())
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}

/// `Delete()` on an item or collection.
pub(crate) async fn delete_object(service: &Service, proxy: &ObjectProxy) -> Result<bool> {
    let reply = service.call(proxy.method("Delete")).await?;
    let prompt = take_path(reply_fields(reply, "(o)")?.pop());

    match prompt.filter(|p| !p.is_root()) {
        None => Ok(true),
        Some(prompt) => {
            let prompt = service.new_prompt(prompt);
            let outcome = service.prompt(&prompt, None).await?;
            Ok(!outcome.is_dismissed())
        }
    }
}

pub(crate) fn string_property(proxy: &ObjectProxy, name: &str) -> Option<String> {
    proxy
        .cached_property(name)
        .and_then(|v| v.as_str().map(str::to_string))
}

pub(crate) fn bool_property(proxy: &ObjectProxy, name: &str) -> bool {
    proxy
        .cached_property(name)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Unix seconds as a UTC timestamp.
pub(crate) fn timestamp_property(proxy: &ObjectProxy, name: &str) -> Option<DateTime<Utc>> {
    let secs = proxy.cached_property(name)?.as_u64()?;
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}
