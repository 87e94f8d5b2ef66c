//! Shared fixtures for the integration tests.

use sesame::mock::MockService;
use sesame::{Service, ServiceFlags};
use sesame_bus::{Bus, MemoryBus, ObjectPath};
use sesame_core::Config;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A bus with a mock service holding one `Login` collection.
pub struct Harness {
    pub bus: MemoryBus,
    pub mock: MockService,
    pub login: ObjectPath,
}

impl Harness {
    pub fn new() -> Self {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let login = mock.add_collection("Login", Some("default"));
        Self { bus, mock, login }
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        Arc::new(self.bus.clone())
    }

    /// Add an item to the `Login` collection.
    pub fn add_login(&self, label: &str, user: &str, password: &str) -> ObjectPath {
        self.mock.add_item(
            &self.login,
            label,
            &[("user", user)],
            password.as_bytes(),
            "text/plain",
        )
    }

    pub async fn connect(&self, config: Config, flags: ServiceFlags) -> anyhow::Result<Arc<Service>> {
        Ok(Service::new(self.bus(), config, flags).await?)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn attributes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
