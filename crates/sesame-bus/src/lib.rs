//! # sesame-bus
//!
//! The object/method/signal transport used by Sesame.
//!
//! - **Values**: typed wire values built on `zvariant` ([`Value`], [`ObjectPath`])
//! - **Messages**: method calls, signals, and match rules
//! - **Bus**: the [`Bus`] trait every transport implements
//! - **ZbusBus**: the D-Bus transport over a `zbus` connection
//! - **MemoryBus**: an in-process bus with call and subscription accounting

pub mod bus;
pub mod dbus;
pub mod error;
pub mod memory;
pub mod message;
pub mod value;

pub use bus::{Bus, NameWatch, Subscription, SubscriptionId, WatchId};
pub use dbus::ZbusBus;
pub use error::{BusError, Result};
pub use memory::{BusStats, MemoryBus, ServiceContext, ServiceHandle, ServiceHandler};
pub use message::{MethodCall, NameEvent, Signal, SignalRule};
pub use value::{ObjectPath, Value};
