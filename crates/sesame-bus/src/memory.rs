//! In-process bus.
//!
//! [`MemoryBus`] routes method calls to registered [`ServiceHandler`]s and
//! fans signals out to matching subscriptions. Dispatch happens inline in
//! the caller's task, so it works under any executor, including the private
//! one used by blocking wrappers.
//!
//! It counts what crosses it so tests can assert on protocol behaviour:
//! calls per member, live and released subscriptions and watches, and
//! abandoned calls. Call arguments are not retained unless the `call-log`
//! feature is enabled, and then only for the most recent calls.

use crate::bus::{Bus, NameWatch, Subscription, SubscriptionId, WatchId};
use crate::error::{BusError, Result};
use crate::message::{MethodCall, NameEvent, Signal, SignalRule};
use crate::value::{ObjectPath, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
#[cfg(feature = "call-log")]
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(feature = "call-log")]
const CALL_LOG_CAPACITY: usize = 256;

/// Server side of a peer on a [`MemoryBus`].
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Handle one method call and produce its reply.
    async fn handle(&self, ctx: &ServiceContext, call: &MethodCall) -> Result<Value>;
}

/// Handed to a [`ServiceHandler`] with every call.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    bus: MemoryBus,
    unique_name: String,
}

impl ServiceContext {
    /// Unique name of the handling peer.
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Emit a signal from the handling peer.
    pub fn emit_signal(
        &self,
        path: ObjectPath,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) {
        self.bus.emit(Signal {
            sender: self.unique_name.clone(),
            path,
            interface: interface.to_string(),
            member: member.to_string(),
            body: Value::Struct(args),
        });
    }
}

/// Counters kept by a [`MemoryBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Method calls issued.
    pub calls: usize,
    /// Calls whose future was dropped before a reply.
    pub cancelled_calls: usize,
    /// Calls that failed because their peer disconnected.
    pub disconnected_calls: usize,
    pub released_subscriptions: usize,
    pub released_watches: usize,
    /// Releases of ids that were not live.
    pub stale_releases: usize,
}

struct Peer {
    handler: Arc<dyn ServiceHandler>,
    names: Vec<String>,
    gone: CancellationToken,
}

struct SubscriptionEntry {
    rule: SignalRule,
    tx: mpsc::UnboundedSender<Signal>,
}

struct WatchEntry {
    name: String,
    tx: mpsc::UnboundedSender<NameEvent>,
}

#[derive(Default)]
struct State {
    peers: HashMap<String, Peer>,
    names: HashMap<String, String>,
    subscriptions: HashMap<u64, SubscriptionEntry>,
    watches: HashMap<u64, WatchEntry>,
    member_calls: HashMap<String, usize>,
    #[cfg(feature = "call-log")]
    sent: VecDeque<MethodCall>,
    stats: BusStats,
}

impl State {
    fn resolve(&self, name: &str) -> Option<String> {
        if name.starts_with(':') {
            return self.peers.contains_key(name).then(|| name.to_string());
        }
        self.names.get(name).cloned()
    }

    fn notify_watchers(&self, name: &str, event: &NameEvent) {
        for watch in self.watches.values().filter(|w| w.name == name) {
            let _ = watch.tx.send(event.clone());
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// An in-process bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer owning the well-known `name`.
    ///
    /// An existing owner of `name` loses it.
    pub fn register_service(
        &self,
        name: &str,
        handler: Arc<dyn ServiceHandler>,
    ) -> ServiceHandle {
        let unique_name = format!(":1.{}", self.inner.next_id());
        let mut state = self.inner.state.lock();

        if let Some(previous) = state.names.insert(name.to_string(), unique_name.clone()) {
            warn!(name = %name, previous = %previous, "Replacing owner of bus name");
            if let Some(peer) = state.peers.get_mut(&previous) {
                peer.names.retain(|n| n != name);
            }
        }

        state.peers.insert(
            unique_name.clone(),
            Peer {
                handler,
                names: vec![name.to_string()],
                gone: CancellationToken::new(),
            },
        );
        state.notify_watchers(name, &NameEvent::Appeared(unique_name.clone()));
        debug!(name = %name, unique = %unique_name, "Service registered");

        ServiceHandle {
            bus: self.clone(),
            unique_name,
        }
    }

    /// Deliver a signal to every matching subscription.
    pub fn emit(&self, signal: Signal) {
        let state = self.inner.state.lock();
        for entry in state.subscriptions.values() {
            if !entry.rule.matches_target(&signal) {
                continue;
            }
            let sender_matches = match &entry.rule.sender {
                None => true,
                Some(sender) if *sender == signal.sender => true,
                Some(sender) => state.names.get(sender) == Some(&signal.sender),
            };
            if sender_matches {
                let _ = entry.tx.send(signal.clone());
            }
        }
    }

    fn disconnect(&self, unique_name: &str) {
        let mut state = self.inner.state.lock();
        let Some(peer) = state.peers.remove(unique_name) else {
            return;
        };

        for name in &peer.names {
            state.names.remove(name);
            state.notify_watchers(name, &NameEvent::Vanished);
        }
        state.notify_watchers(unique_name, &NameEvent::Vanished);
        peer.gone.cancel();
        debug!(unique = %unique_name, "Service disconnected");
    }

    /// The most recent calls, oldest first.
    #[cfg(feature = "call-log")]
    pub fn sent_calls(&self) -> Vec<MethodCall> {
        self.inner.state.lock().sent.iter().cloned().collect()
    }

    /// Number of calls issued for a member name.
    pub fn call_count(&self, member: &str) -> usize {
        self.inner
            .state
            .lock()
            .member_calls
            .get(member)
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        self.inner.state.lock().stats
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    pub fn active_watches(&self) -> usize {
        self.inner.state.lock().watches.len()
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryBus")
            .field("peers", &state.peers.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("watches", &state.watches.len())
            .field("stats", &state.stats)
            .finish()
    }
}

/// Marks a call abandoned if dropped before the reply.
struct CallGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.state.lock().stats.cancelled_calls += 1;
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn call(&self, call: MethodCall) -> Result<Value> {
        let (handler, gone, unique_name) = {
            let mut state = self.inner.state.lock();
            *state.member_calls.entry(call.member.clone()).or_default() += 1;
            #[cfg(feature = "call-log")]
            {
                if state.sent.len() == CALL_LOG_CAPACITY {
                    state.sent.pop_front();
                }
                state.sent.push_back(call.clone());
            }
            state.stats.calls += 1;

            let unique_name = state
                .resolve(&call.destination)
                .ok_or_else(|| BusError::NoSuchName(call.destination.clone()))?;
            let peer = state
                .peers
                .get(&unique_name)
                .ok_or_else(|| BusError::NoSuchName(call.destination.clone()))?;
            (Arc::clone(&peer.handler), peer.gone.clone(), unique_name)
        };

        let ctx = ServiceContext {
            bus: self.clone(),
            unique_name,
        };
        let mut guard = CallGuard {
            inner: Arc::clone(&self.inner),
            finished: false,
        };

        let result = tokio::select! {
            biased;
            reply = handler.handle(&ctx, &call) => reply,
            _ = gone.cancelled() => {
                self.inner.state.lock().stats.disconnected_calls += 1;
                Err(BusError::Disconnected)
            }
        };
        guard.finished = true;
        result
    }

    async fn subscribe(&self, rule: SignalRule) -> Result<Subscription> {
        let id = self.inner.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .lock()
            .subscriptions
            .insert(id, SubscriptionEntry { rule, tx });
        Ok(Subscription {
            id: SubscriptionId(id),
            signals: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.inner.state.lock();
        if state.subscriptions.remove(&id.0).is_some() {
            state.stats.released_subscriptions += 1;
        } else {
            warn!(id = id.0, "Released unknown subscription");
            state.stats.stale_releases += 1;
        }
    }

    async fn watch_name(&self, name: &str) -> Result<NameWatch> {
        let id = self.inner.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();

        let initial = match state.resolve(name) {
            Some(owner) => NameEvent::Appeared(owner),
            None => NameEvent::Vanished,
        };
        let _ = tx.send(initial);
        state.watches.insert(
            id,
            WatchEntry {
                name: name.to_string(),
                tx,
            },
        );

        Ok(NameWatch {
            id: WatchId(id),
            events: rx,
        })
    }

    fn unwatch_name(&self, id: WatchId) {
        let mut state = self.inner.state.lock();
        if state.watches.remove(&id.0).is_some() {
            state.stats.released_watches += 1;
        } else {
            warn!(id = id.0, "Released unknown name watch");
            state.stats.stale_releases += 1;
        }
    }

    async fn name_owner(&self, name: &str) -> Option<String> {
        self.inner.state.lock().resolve(name)
    }
}

/// Registration of a peer on a [`MemoryBus`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    bus: MemoryBus,
    unique_name: String,
}

impl ServiceHandle {
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Remove the peer from the bus.
    ///
    /// Watchers of its names see it vanish and calls still in flight fail
    /// with [`BusError::Disconnected`]. Calling this twice is a no-op.
    pub fn disconnect(&self) {
        self.bus.disconnect(&self.unique_name);
    }
}
