//! An in-process Secret Service for tests.
//!
//! [`MockService`] registers on a [`MemoryBus`] and implements the service
//! side of the protocol: plain and encrypted sessions, collections, items,
//! property access, searching, locking, and prompts whose behaviour can be
//! scripted with [`PromptBehavior`].

mod handler;

use parking_lot::Mutex;
use sesame_bus::{MemoryBus, ObjectPath, ServiceHandle, Value};
use sesame_core::config::DEFAULT_BUS_NAME;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::interfaces::{props, COLLECTION_INTERFACE, ITEM_INTERFACE, SERVICE_INTERFACE};
use crate::session::Session;

use handler::MockHandler;

const SERVICE_PATH: &str = "/org/freedesktop/secrets";
const ALIAS_PREFIX: &str = "/org/freedesktop/secrets/aliases/";

/// What the mock does when a prompt is performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptBehavior {
    /// Complete with the prompt's result.
    #[default]
    Accept,
    /// Complete as dismissed.
    Dismiss,
    /// Never complete; `Dismiss` completes as dismissed.
    Hang,
    /// Never reply to the `Prompt` call.
    HangCall,
    /// Emit a completion signal of the wrong shape.
    Malformed,
    /// Fail the `Prompt` call.
    Fail,
    /// Never complete; `Dismiss` is an unknown method.
    DismissUnsupported,
}

pub(crate) enum PromptAction {
    SetLocked(Vec<ObjectPath>, bool),
    Delete(ObjectPath),
}

pub(crate) struct MockPrompt {
    result: Value,
    action: Option<PromptAction>,
}

pub(crate) struct MockObject {
    interface: &'static str,
    properties: BTreeMap<String, Value>,
}

pub(crate) struct MockState {
    aes_supported: bool,
    prompts_required: bool,
    negotiation_yield: bool,
    prompt_behavior: PromptBehavior,
    objects: BTreeMap<ObjectPath, MockObject>,
    secrets: HashMap<ObjectPath, (Vec<u8>, String)>,
    sessions: HashMap<ObjectPath, Session>,
    prompts: HashMap<ObjectPath, MockPrompt>,
    aliases: HashMap<String, ObjectPath>,
    sessions_opened: usize,
    last_window_id: Option<String>,
    next_id: u64,
}

impl MockState {
    fn new() -> Self {
        let mut objects = BTreeMap::new();
        let mut properties = BTreeMap::new();
        properties.insert(props::COLLECTIONS.to_string(), Value::Paths(Vec::new()));
        objects.insert(
            service_path(),
            MockObject {
                interface: SERVICE_INTERFACE,
                properties,
            },
        );

        Self {
            aes_supported: true,
            prompts_required: false,
            negotiation_yield: false,
            prompt_behavior: PromptBehavior::default(),
            objects,
            secrets: HashMap::new(),
            sessions: HashMap::new(),
            prompts: HashMap::new(),
            aliases: HashMap::new(),
            sessions_opened: 0,
            last_window_id: None,
            next_id: 0,
        }
    }

    fn child_path(&mut self, parent: &ObjectPath, prefix: &str) -> ObjectPath {
        self.next_id += 1;
        let segment = format!("{}{}", prefix, self.next_id);
        parent
            .join(&segment)
            .unwrap_or_else(|_| ObjectPath::root())
    }

    fn add_collection(&mut self, label: &str, alias: Option<&str>) -> ObjectPath {
        let parent = ObjectPath::new(format!("{}/collection", SERVICE_PATH))
            .unwrap_or_else(|_| service_path());
        let path = self.child_path(&parent, "c");
        let now = Value::U64(now());

        let mut properties = BTreeMap::new();
        properties.insert(props::LABEL.to_string(), Value::from(label));
        properties.insert(props::LOCKED.to_string(), Value::Bool(false));
        properties.insert(props::CREATED.to_string(), now.clone());
        properties.insert(props::MODIFIED.to_string(), now);
        properties.insert(props::ITEMS.to_string(), Value::Paths(Vec::new()));
        self.objects.insert(
            path.clone(),
            MockObject {
                interface: COLLECTION_INTERFACE,
                properties,
            },
        );
        self.update_children(&service_path(), props::COLLECTIONS, COLLECTION_INTERFACE);
        if let Some(alias) = alias.filter(|a| !a.is_empty()) {
            self.aliases.insert(alias.to_string(), path.clone());
        }
        path
    }

    /// The collection an alias path stands for.
    fn resolve_alias(&self, path: &ObjectPath) -> Option<ObjectPath> {
        let alias = path.as_str().strip_prefix(ALIAS_PREFIX)?;
        self.aliases.get(alias).cloned()
    }

    fn add_item(
        &mut self,
        collection: &ObjectPath,
        label: &str,
        attributes: BTreeMap<String, String>,
        secret: Vec<u8>,
        content_type: &str,
    ) -> ObjectPath {
        let path = self.child_path(collection, "i");
        let now = Value::U64(now());

        let mut properties = BTreeMap::new();
        properties.insert(props::LABEL.to_string(), Value::from(label));
        properties.insert(props::ATTRIBUTES.to_string(), Value::Attributes(attributes));
        properties.insert(props::LOCKED.to_string(), Value::Bool(false));
        properties.insert(props::CREATED.to_string(), now.clone());
        properties.insert(props::MODIFIED.to_string(), now);
        self.objects.insert(
            path.clone(),
            MockObject {
                interface: ITEM_INTERFACE,
                properties,
            },
        );
        self.secrets
            .insert(path.clone(), (secret, content_type.to_string()));
        self.update_children(collection, props::ITEMS, ITEM_INTERFACE);
        path
    }

    fn add_prompt(&mut self, result: Value, action: Option<PromptAction>) -> ObjectPath {
        let parent = ObjectPath::new(format!("{}/prompt", SERVICE_PATH))
            .unwrap_or_else(|_| service_path());
        let path = self.child_path(&parent, "p");
        self.prompts
            .insert(path.clone(), MockPrompt { result, action });
        path
    }

    fn remove_object(&mut self, path: &ObjectPath) {
        let children: Vec<ObjectPath> = self
            .objects
            .keys()
            .filter(|p| p.parent().as_ref() == Some(path))
            .cloned()
            .collect();
        for child in children {
            self.remove_object(&child);
        }

        let Some(object) = self.objects.remove(path) else {
            return;
        };
        self.secrets.remove(path);
        self.aliases.retain(|_, target| target != path);

        if let Some(parent) = path.parent() {
            if object.interface == ITEM_INTERFACE {
                self.update_children(&parent, props::ITEMS, ITEM_INTERFACE);
            } else if object.interface == COLLECTION_INTERFACE {
                self.update_children(&service_path(), props::COLLECTIONS, COLLECTION_INTERFACE);
            }
        }
    }

    /// Recompute a property listing the children of `parent` with `interface`.
    fn update_children(&mut self, parent: &ObjectPath, property: &str, interface: &str) {
        let children: Vec<ObjectPath> = self
            .objects
            .iter()
            .filter(|(p, o)| o.interface == interface && is_descendant(p, parent))
            .map(|(p, _)| p.clone())
            .collect();
        if let Some(object) = self.objects.get_mut(parent) {
            object
                .properties
                .insert(property.to_string(), Value::Paths(children));
        }
    }

    fn set_property(&mut self, path: &ObjectPath, name: &str, value: Value) -> bool {
        match self.objects.get_mut(path) {
            Some(object) => {
                object.properties.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    fn property(&self, path: &ObjectPath, name: &str) -> Option<&Value> {
        self.objects.get(path)?.properties.get(name)
    }

    fn is_locked(&self, path: &ObjectPath) -> bool {
        self.property(path, props::LOCKED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn apply(&mut self, action: PromptAction) {
        match action {
            PromptAction::SetLocked(paths, locked) => {
                for path in paths {
                    self.set_property(&path, props::LOCKED, Value::Bool(locked));
                }
            }
            PromptAction::Delete(path) => self.remove_object(&path),
        }
    }
}

fn service_path() -> ObjectPath {
    ObjectPath::new(SERVICE_PATH).unwrap_or_else(|_| ObjectPath::root())
}

fn is_descendant(path: &ObjectPath, ancestor: &ObjectPath) -> bool {
    path.as_str()
        .strip_prefix(ancestor.as_str())
        .is_some_and(|rest| rest.starts_with('/') && rest[1..].matches('/').count() <= 1)
}

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Handle to a mock Secret Service registered on a [`MemoryBus`].
#[derive(Clone)]
pub struct MockService {
    bus_name: String,
    handle: ServiceHandle,
    state: Arc<Mutex<MockState>>,
}

impl MockService {
    /// Register a mock under `org.freedesktop.secrets`.
    pub fn start(bus: &MemoryBus) -> Self {
        Self::start_named(bus, DEFAULT_BUS_NAME)
    }

    /// Register a mock under a custom bus name.
    pub fn start_named(bus: &MemoryBus, bus_name: &str) -> Self {
        let state = Arc::new(Mutex::new(MockState::new()));
        let handler = Arc::new(MockHandler::new(Arc::clone(&state)));
        let handle = bus.register_service(bus_name, handler);
        Self {
            bus_name: bus_name.to_string(),
            handle,
            state,
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn unique_name(&self) -> &str {
        self.handle.unique_name()
    }

    /// Remove the service from the bus.
    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    /// Whether `OpenSession` accepts the encrypted algorithm.
    pub fn set_aes_supported(&self, supported: bool) {
        self.state.lock().aes_supported = supported;
    }

    /// Whether unlock, lock, delete and create-collection go through a prompt.
    pub fn set_prompts_required(&self, required: bool) {
        self.state.lock().prompts_required = required;
    }

    /// Make `OpenSession` yield to the scheduler before replying.
    pub fn set_negotiation_yield(&self, enabled: bool) {
        self.state.lock().negotiation_yield = enabled;
    }

    pub fn set_prompt_behavior(&self, behavior: PromptBehavior) {
        self.state.lock().prompt_behavior = behavior;
    }

    /// Add a collection, reachable under `/org/freedesktop/secrets/aliases/<alias>`
    /// when an alias is given.
    pub fn add_collection(&self, label: &str, alias: Option<&str>) -> ObjectPath {
        self.state.lock().add_collection(label, alias)
    }

    /// Add an item holding `secret` to a collection.
    pub fn add_item(
        &self,
        collection: &ObjectPath,
        label: &str,
        attributes: &[(&str, &str)],
        secret: &[u8],
        content_type: &str,
    ) -> ObjectPath {
        let attributes = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state
            .lock()
            .add_item(collection, label, attributes, secret.to_vec(), content_type)
    }

    /// Add a standalone prompt that completes with `result`.
    pub fn add_prompt(&self, result: Value) -> ObjectPath {
        self.state.lock().add_prompt(result, None)
    }

    pub fn set_locked(&self, path: &ObjectPath, locked: bool) {
        self.state
            .lock()
            .set_property(path, props::LOCKED, Value::Bool(locked));
    }

    /// Current value of an object's property.
    pub fn property(&self, path: &ObjectPath, name: &str) -> Option<Value> {
        self.state.lock().property(path, name).cloned()
    }

    /// Change a property without emitting `PropertiesChanged`.
    pub fn set_property_silently(&self, path: &ObjectPath, name: &str, value: Value) {
        self.state.lock().set_property(path, name, value);
    }

    /// Stored plaintext of an item.
    pub fn item_secret(&self, path: &ObjectPath) -> Option<Vec<u8>> {
        self.state.lock().secrets.get(path).map(|(s, _)| s.clone())
    }

    pub fn has_object(&self, path: &ObjectPath) -> bool {
        self.state.lock().objects.contains_key(path)
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    /// Window id passed to the most recent `Prompt` call.
    pub fn last_window_id(&self) -> Option<String> {
        self.state.lock().last_window_id.clone()
    }
}

impl std::fmt::Debug for MockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockService")
            .field("bus_name", &self.bus_name)
            .field("unique_name", &self.handle.unique_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_are_listed() {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let collection = mock.add_collection("Login", None);
        let item = mock.add_item(&collection, "Mail", &[("user", "alice")], b"pw", "text/plain");

        assert_eq!(
            mock.property(&service_path(), props::COLLECTIONS),
            Some(Value::Paths(vec![collection.clone()]))
        );
        assert_eq!(
            mock.property(&collection, props::ITEMS),
            Some(Value::Paths(vec![item.clone()]))
        );
        assert_eq!(mock.item_secret(&item), Some(b"pw".to_vec()));
    }

    #[test]
    fn test_alias_paths_resolve() {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let login = mock.add_collection("Login", Some("default"));
        mock.add_collection("Work", None);

        let state = mock.state.lock();
        let default = ObjectPath::new("/org/freedesktop/secrets/aliases/default").unwrap();
        let session = ObjectPath::new("/org/freedesktop/secrets/aliases/session").unwrap();
        assert_eq!(state.resolve_alias(&default), Some(login));
        assert_eq!(state.resolve_alias(&session), None);
        assert_eq!(state.resolve_alias(&service_path()), None);
    }

    #[test]
    fn test_removing_collection_removes_items() {
        let bus = MemoryBus::new();
        let mock = MockService::start(&bus);
        let collection = mock.add_collection("Login", Some("default"));
        let item = mock.add_item(&collection, "Mail", &[], b"pw", "text/plain");

        mock.state.lock().remove_object(&collection);
        assert!(mock.state.lock().aliases.is_empty());
        assert!(!mock.has_object(&collection));
        assert!(!mock.has_object(&item));
        assert_eq!(
            mock.property(&service_path(), props::COLLECTIONS),
            Some(Value::Paths(vec![]))
        );
    }
}
