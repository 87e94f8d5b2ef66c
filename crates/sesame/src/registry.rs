//! Process-wide default service.
//!
//! The registry only holds a weak reference: the default service lives as
//! long as some caller keeps it, and the next [`get`] after that creates a
//! fresh one.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sesame_bus::Bus;
use sesame_core::Config;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::Result;
use crate::service::{open_bus, Service};
use crate::sync;
use crate::types::ServiceFlags;

static DEFAULT_SERVICE: Lazy<Mutex<Weak<Service>>> = Lazy::new(|| Mutex::new(Weak::new()));

/// Return the default service, connecting with the configuration from disk
/// and environment if there is none.
///
/// When a default service already exists, `bus` is ignored and `flags` are
/// ensured on the existing instance.
pub async fn get(bus: Arc<dyn Bus>, flags: ServiceFlags) -> Result<Arc<Service>> {
    if let Some(service) = current() {
        service.ensure(flags).await?;
        return Ok(service);
    }
    get_with_config(bus, Config::load_or_default()?, flags).await
}

/// Like [`get`], with an explicit configuration for a new connection.
pub async fn get_with_config(
    bus: Arc<dyn Bus>,
    config: Config,
    flags: ServiceFlags,
) -> Result<Arc<Service>> {
    if let Some(service) = current() {
        service.ensure(flags).await?;
        return Ok(service);
    }

    let created = Service::new(bus, config, flags).await?;
    let winner = {
        let mut slot = DEFAULT_SERVICE.lock();
        match slot.upgrade() {
            Some(existing) => Some(existing),
            None => {
                *slot = Arc::downgrade(&created);
                None
            }
        }
    };

    match winner {
        Some(existing) => {
            debug!("Default service was installed concurrently");
            existing.ensure(flags).await?;
            Ok(existing)
        }
        None => Ok(created),
    }
}

/// Return the default service, opening the bus the configuration from disk
/// and environment selects if there is none.
pub async fn get_default(flags: ServiceFlags) -> Result<Arc<Service>> {
    if let Some(service) = current() {
        service.ensure(flags).await?;
        return Ok(service);
    }
    let config = Config::load_or_default()?;
    let bus = open_bus(&config.service).await?;
    get_with_config(bus, config, flags).await
}

/// Blocking variant of [`get_default`].
pub fn get_default_sync(flags: ServiceFlags) -> Result<Arc<Service>> {
    sync::wait(get_default(flags))
}

/// Blocking variant of [`get`].
pub fn get_sync(bus: Arc<dyn Bus>, flags: ServiceFlags) -> Result<Arc<Service>> {
    sync::wait(get(bus, flags))
}

/// Forget the default service. Existing handles stay usable.
pub fn clear() {
    *DEFAULT_SERVICE.lock() = Weak::new();
}

fn current() -> Option<Arc<Service>> {
    DEFAULT_SERVICE.lock().upgrade()
}
