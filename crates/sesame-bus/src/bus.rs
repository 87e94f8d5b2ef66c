//! The transport seam.

use crate::error::Result;
use crate::message::{MethodCall, NameEvent, Signal, SignalRule};
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Identifies a signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Identifies a name-owner watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// A live signal subscription. Signals arrive in emission order.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub signals: mpsc::UnboundedReceiver<Signal>,
}

/// A live name-owner watch.
///
/// The current state of the name is delivered as the first event.
#[derive(Debug)]
pub struct NameWatch {
    pub id: WatchId,
    pub events: mpsc::UnboundedReceiver<NameEvent>,
}

/// An object/method/signal bus connection.
///
/// Subscriptions and watches are not released on drop; callers hand their
/// ids back through [`Bus::unsubscribe`] and [`Bus::unwatch_name`].
#[async_trait]
pub trait Bus: Send + Sync + fmt::Debug {
    /// Invoke a method and wait for its reply.
    ///
    /// The reply is the struct of out arguments. Dropping the returned
    /// future abandons the call.
    async fn call(&self, call: MethodCall) -> Result<Value>;

    /// Subscribe to signals matching `rule`.
    ///
    /// The rule is in effect once this returns, so signals emitted after
    /// that point are delivered.
    async fn subscribe(&self, rule: SignalRule) -> Result<Subscription>;

    /// Release a subscription.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Watch ownership of a bus name.
    async fn watch_name(&self, name: &str) -> Result<NameWatch>;

    /// Release a name watch.
    fn unwatch_name(&self, id: WatchId);

    /// Current unique owner of a name, if any.
    async fn name_owner(&self, name: &str) -> Option<String>;
}
