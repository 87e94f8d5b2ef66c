//! Connection to the Secret Service.
//!
//! A [`Service`] owns the transfer session and the collection cache for one
//! secret-storage service. The session is negotiated lazily and at most once;
//! concurrent callers wait on a single negotiation. Operations that need the
//! user's consent hand their prompt to the configured [`PromptHandler`].

use parking_lot::Mutex;
use sesame_bus::{Bus, MethodCall, ObjectPath, Value, ZbusBus};
use sesame_core::config::{BusKind, ServiceConfig};
use sesame_core::Config;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::{Result, SecretError, COULD_NOT_COMMUNICATE};
use crate::interfaces::{props, SERVICE_INTERFACE};
use crate::prompt::{DefaultPromptHandler, Prompt, PromptHandler, PromptOutcome};
use crate::properties::ObjectProxy;
use crate::session::{self, Algorithm, Session};
use crate::sync;
use crate::types::ServiceFlags;

type CollectionList = Arc<Vec<Arc<Collection>>>;

/// Proxy for the Secret Service object.
pub struct Service {
    bus: Arc<dyn Bus>,
    config: Config,
    path: ObjectPath,
    proxy: ObjectProxy,
    session: Mutex<Option<Arc<Session>>>,
    negotiation: tokio::sync::Mutex<()>,
    collections: Mutex<Option<CollectionList>>,
    prompt_handler: Arc<dyn PromptHandler>,
}

impl Service {
    /// Connect to the service named in `config`, establishing whatever
    /// `flags` request.
    pub async fn new(bus: Arc<dyn Bus>, config: Config, flags: ServiceFlags) -> Result<Arc<Self>> {
        let handler = Arc::new(DefaultPromptHandler::new(config.prompt.window_id.clone()));
        Self::with_prompt_handler(bus, config, flags, handler).await
    }

    /// Like [`Service::new`], with a custom prompt strategy.
    pub async fn with_prompt_handler(
        bus: Arc<dyn Bus>,
        config: Config,
        flags: ServiceFlags,
        prompt_handler: Arc<dyn PromptHandler>,
    ) -> Result<Arc<Self>> {
        let path = ObjectPath::new(config.service.object_path.as_str())?;
        let proxy = ObjectProxy::new(
            Arc::clone(&bus),
            config.service.bus_name.as_str(),
            path.clone(),
            SERVICE_INTERFACE,
        )
        .await?;
        if !proxy.have_cached_properties() {
            return Err(SecretError::UnknownObject(path.to_string()));
        }

        let service = Arc::new(Self {
            bus,
            config,
            path,
            proxy,
            session: Mutex::new(None),
            negotiation: tokio::sync::Mutex::new(()),
            collections: Mutex::new(None),
            prompt_handler,
        });
        debug!(bus_name = %service.bus_name(), path = %service.path, "Connected to secret service");

        service.ensure(flags).await?;
        Ok(service)
    }

    /// Blocking variant of [`Service::new`].
    pub fn new_sync(bus: Arc<dyn Bus>, config: Config, flags: ServiceFlags) -> Result<Arc<Self>> {
        sync::wait(Self::new(bus, config, flags))
    }

    /// Open the D-Bus connection `config` selects and connect over it.
    pub async fn connect(config: Config, flags: ServiceFlags) -> Result<Arc<Self>> {
        let bus = open_bus(&config.service).await?;
        Self::new(bus, config, flags).await
    }

    /// Blocking variant of [`Service::connect`].
    pub fn connect_sync(config: Config, flags: ServiceFlags) -> Result<Arc<Self>> {
        sync::wait(Self::connect(config, flags))
    }

    pub fn bus_name(&self) -> &str {
        &self.config.service.bus_name
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn bus(&self) -> Arc<dyn Bus> {
        Arc::clone(&self.bus)
    }

    /// Which of the optional parts of the connection are established.
    pub fn flags(&self) -> ServiceFlags {
        let mut flags = ServiceFlags::NONE;
        if self.session.lock().is_some() {
            flags = flags | ServiceFlags::OPEN_SESSION;
        }
        if self.collections.lock().is_some() {
            flags = flags | ServiceFlags::LOAD_COLLECTIONS;
        }
        flags
    }

    /// Establish everything `flags` requests that is not already there.
    pub async fn ensure(self: &Arc<Self>, flags: ServiceFlags) -> Result<()> {
        if flags.contains(ServiceFlags::OPEN_SESSION) {
            self.ensure_session().await?;
        }
        if flags.contains(ServiceFlags::LOAD_COLLECTIONS) && self.collections().is_none() {
            self.ensure_collections().await?;
        }
        Ok(())
    }

    /// Return the transfer session, negotiating it if needed.
    pub async fn ensure_session(&self) -> Result<Arc<Session>> {
        let existing = self.session.lock().clone();
        if let Some(session) = existing {
            return Ok(session);
        }

        let _gate = self.negotiation.lock().await;
        let existing = self.session.lock().clone();
        if let Some(session) = existing {
            return Ok(session);
        }

        let session = session::open(
            self.bus.as_ref(),
            self.bus_name(),
            &self.path,
            self.config.session.algorithm,
        )
        .await?;
        Ok(self.take_session(session))
    }

    /// Blocking variant of [`Service::ensure_session`].
    pub fn ensure_session_sync(&self) -> Result<Arc<Session>> {
        sync::wait(self.ensure_session())
    }

    /// Store a negotiated session unless one is already present, returning
    /// the retained session.
    pub(crate) fn take_session(&self, session: Session) -> Arc<Session> {
        let mut slot = self.session.lock();
        if let Some(retained) = slot.as_ref() {
            debug!(discarded = %session.path(), "Session already established");
            return Arc::clone(retained);
        }

        info!(
            path = %session.path(),
            algorithm = session.algorithm().as_str(),
            "Established transfer session"
        );
        let session = Arc::new(session);
        *slot = Some(Arc::clone(&session));
        session
    }

    /// Algorithm of the current session, if one exists.
    pub fn session_algorithms(&self) -> Option<Algorithm> {
        self.session.lock().as_ref().map(|s| s.algorithm())
    }

    /// Remote path of the current session, if one exists.
    pub fn session_path(&self) -> Option<ObjectPath> {
        self.session.lock().as_ref().map(|s| s.path().clone())
    }

    /// Load a proxy for every collection the service lists.
    ///
    /// Proxies from a previous load are reused for paths that are still
    /// listed.
    pub async fn ensure_collections(self: &Arc<Self>) -> Result<CollectionList> {
        self.proxy.refresh().await?;
        let paths = self
            .proxy
            .cached_property(props::COLLECTIONS)
            .and_then(|v| v.as_paths().map(<[ObjectPath]>::to_vec))
            .unwrap_or_default();
        let previous = self.collections();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let reused = previous
                .as_ref()
                .and_then(|list| list.iter().find(|c| *c.path() == path).cloned());
            let collection = match reused {
                Some(collection) => collection,
                None => Arc::new(Collection::new(self, path).await?),
            };
            loaded.push(collection);
        }

        let loaded = Arc::new(loaded);
        *self.collections.lock() = Some(Arc::clone(&loaded));
        debug!(count = loaded.len(), "Loaded collections");
        Ok(loaded)
    }

    /// Blocking variant of [`Service::ensure_collections`].
    pub fn ensure_collections_sync(self: &Arc<Self>) -> Result<CollectionList> {
        sync::wait(self.ensure_collections())
    }

    /// Cached collections, or `None` if they were never loaded.
    pub fn collections(&self) -> Option<CollectionList> {
        self.collections.lock().clone()
    }

    /// Find items whose attributes include all of `attributes`.
    ///
    /// Returns the unlocked and locked matches.
    pub async fn search_paths(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(Vec<ObjectPath>, Vec<ObjectPath>)> {
        let call = self
            .proxy
            .method("SearchItems")
            .arg(Value::Attributes(attributes.clone()));
        let mut fields = reply_fields(self.call(call).await?, "(aoao)")?;

        let locked = take_paths(fields.pop());
        let unlocked = take_paths(fields.pop());
        Ok((unlocked, locked))
    }

    /// Blocking variant of [`Service::search_paths`].
    pub fn search_paths_sync(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(Vec<ObjectPath>, Vec<ObjectPath>)> {
        sync::wait(self.search_paths(attributes))
    }

    /// Unlock objects, prompting if the service requires it.
    ///
    /// Returns the paths that ended up unlocked.
    pub async fn unlock(&self, paths: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        self.set_locked("Unlock", paths).await
    }

    /// Blocking variant of [`Service::unlock`].
    pub fn unlock_sync(&self, paths: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        sync::wait(self.unlock(paths))
    }

    /// Lock objects, prompting if the service requires it.
    pub async fn lock(&self, paths: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        self.set_locked("Lock", paths).await
    }

    /// Blocking variant of [`Service::lock`].
    pub fn lock_sync(&self, paths: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        sync::wait(self.lock(paths))
    }

    async fn set_locked(&self, member: &str, paths: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        let call = self.proxy.method(member).arg(Value::Paths(paths.to_vec()));
        let mut fields = reply_fields(self.call(call).await?, "(aoo)")?;

        let prompt = take_path(fields.pop());
        let mut done = take_paths(fields.pop());
        if let Some(prompt) = prompt.filter(|p| !p.is_root()) {
            if let Some(Value::Paths(more)) = self.run_prompt(prompt, "ao").await? {
                done.extend(more);
            }
        }
        Ok(done)
    }

    /// Create a collection. Returns `None` when the prompt was dismissed.
    pub async fn create_collection(
        self: &Arc<Self>,
        label: &str,
        alias: Option<&str>,
    ) -> Result<Option<Arc<Collection>>> {
        let mut properties = BTreeMap::new();
        properties.insert(props::COLLECTION_LABEL.to_string(), Value::variant(label));
        let call = self
            .proxy
            .method("CreateCollection")
            .arg(Value::Dict(properties))
            .arg(alias.unwrap_or(""));
        let mut fields = reply_fields(self.call(call).await?, "(oo)")?;

        let prompt = take_path(fields.pop());
        let mut created = take_path(fields.pop()).filter(|p| !p.is_root());
        if created.is_none() {
            if let Some(prompt) = prompt.filter(|p| !p.is_root()) {
                created = match self.run_prompt(prompt, "o").await? {
                    Some(Value::Path(path)) if !path.is_root() => Some(path),
                    _ => None,
                };
            }
        }
        let Some(path) = created else {
            return Ok(None);
        };

        if self.collections().is_some() {
            let list = self.ensure_collections().await?;
            if let Some(collection) = list.iter().find(|c| *c.path() == path) {
                return Ok(Some(Arc::clone(collection)));
            }
        }
        Ok(Some(Arc::new(Collection::new(self, path).await?)))
    }

    /// Blocking variant of [`Service::create_collection`].
    pub fn create_collection_sync(
        self: &Arc<Self>,
        label: &str,
        alias: Option<&str>,
    ) -> Result<Option<Arc<Collection>>> {
        sync::wait(self.create_collection(label, alias))
    }

    /// Run a prompt through this service's prompt handler.
    pub async fn prompt(
        &self,
        prompt: &Prompt,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        self.prompt_handler.prompt(prompt, cancellable).await
    }

    /// Blocking variant of [`Service::prompt`].
    pub fn prompt_sync(
        &self,
        prompt: &Prompt,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        sync::wait(self.prompt(prompt, cancellable))
    }

    /// A prompt object on this service.
    pub fn new_prompt(&self, path: ObjectPath) -> Prompt {
        Prompt::new(self.bus(), self.bus_name(), path)
    }

    /// Run the prompt at `path` and return its result when it was accepted.
    pub(crate) async fn run_prompt(&self, path: ObjectPath, expected: &str) -> Result<Option<Value>> {
        let prompt = self.new_prompt(path);
        if self.prompt(&prompt, None).await?.is_dismissed() {
            return Ok(None);
        }
        Ok(prompt.result_value(expected))
    }

    pub(crate) async fn call(&self, call: MethodCall) -> Result<Value> {
        Ok(self.bus.call(call).await?)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("bus_name", &self.bus_name())
            .field("path", &self.path)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Check a reply's shape and take its fields.
pub(crate) fn reply_fields(reply: Value, signature: &str) -> Result<Vec<Value>> {
    if !reply.is_of_type(signature) {
        debug!(expected = signature, received = %reply.signature(), "Unexpected reply");
        return Err(SecretError::protocol(COULD_NOT_COMMUNICATE));
    }
    reply
        .into_fields()
        .ok_or_else(|| SecretError::protocol(COULD_NOT_COMMUNICATE))
}

pub(crate) fn take_path(value: Option<Value>) -> Option<ObjectPath> {
    match value {
        Some(Value::Path(path)) => Some(path),
        _ => None,
    }
}

fn take_paths(value: Option<Value>) -> Vec<ObjectPath> {
    match value {
        Some(Value::Paths(paths)) => paths,
        _ => Vec::new(),
    }
}

/// Connect to the bus a service configuration names.
///
/// An explicit address wins over the standard bus selection.
pub async fn open_bus(config: &ServiceConfig) -> Result<Arc<dyn Bus>> {
    let bus = match (&config.address, config.bus) {
        (Some(address), _) => ZbusBus::address(address).await?,
        (None, BusKind::Session) => ZbusBus::session().await?,
        (None, BusKind::System) => ZbusBus::system().await?,
    };
    debug!(bus = ?bus, "Opened bus connection");
    Ok(Arc::new(bus))
}
