//! D-Bus transport.
//!
//! [`ZbusBus`] implements [`Bus`] over a `zbus` connection. Calls go out
//! as method calls with their arguments as the message body, subscriptions
//! become match rules, and name watches follow `NameOwnerChanged` from the
//! bus daemon.
//!
//! Signal forwarding runs on the connection's own executor, so a bus can be
//! shared between async callers and the blocking wrappers, whose runtimes
//! come and go with each call.

use crate::bus::{Bus, NameWatch, Subscription, SubscriptionId, WatchId};
use crate::error::{names, BusError, Result};
use crate::message::{MethodCall, NameEvent, Signal, SignalRule};
use crate::value::{to_structure, ObjectPath, Value};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::{Connection, MatchRule, Message, MessageStream};

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// A [`Bus`] backed by a D-Bus connection.
pub struct ZbusBus {
    conn: Connection,
    tasks: Mutex<HashMap<u64, zbus::Task<()>>>,
    next_id: AtomicU64,
}

impl ZbusBus {
    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Connect to the session bus.
    pub async fn session() -> Result<Self> {
        let conn = Connection::session().await.map_err(map_error)?;
        Ok(Self::from_connection(conn))
    }

    /// Connect to the system bus.
    pub async fn system() -> Result<Self> {
        let conn = Connection::system().await.map_err(map_error)?;
        Ok(Self::from_connection(conn))
    }

    /// Connect to the bus at a D-Bus address such as `unix:path=/run/bus`.
    pub async fn address(address: &str) -> Result<Self> {
        let conn = zbus::connection::Builder::address(address)
            .map_err(map_error)?
            .build()
            .await
            .map_err(map_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn match_stream(&self, rule: &SignalRule) -> Result<MessageStream> {
        let mut builder = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(rule.interface.as_str())
            .map_err(map_error)?;
        if let Some(sender) = &rule.sender {
            builder = builder.sender(sender.as_str()).map_err(map_error)?;
        }
        if let Some(path) = &rule.path {
            builder = builder.path(path.as_str()).map_err(map_error)?;
        }
        if let Some(member) = &rule.member {
            builder = builder.member(member.as_str()).map_err(map_error)?;
        }
        if let Some(arg0) = &rule.arg0 {
            builder = builder.arg(0, arg0.as_str()).map_err(map_error)?;
        }

        MessageStream::for_match_rule(builder.build(), &self.conn, None)
            .await
            .map_err(map_error)
    }

    /// Keep a forwarding task alive until its id is released.
    fn track(&self, id: u64, task: zbus::Task<()>) {
        self.tasks.lock().insert(id, task);
    }

    /// Stop a forwarding task. Returns whether the id was live.
    fn release(&self, id: u64) -> bool {
        // Dropping the task cancels it; do that outside the lock
        let task = self.tasks.lock().remove(&id);
        task.is_some()
    }
}

#[async_trait]
impl Bus for ZbusBus {
    async fn call(&self, call: MethodCall) -> Result<Value> {
        let destination = Some(call.destination.as_str());
        let interface = Some(call.interface.as_str());
        let reply = if call.args.is_empty() {
            self.conn
                .call_method(destination, call.path.as_str(), interface, call.member.as_str(), &())
                .await
        } else {
            let body = to_structure(&call.args)?;
            self.conn
                .call_method(destination, call.path.as_str(), interface, call.member.as_str(), &body)
                .await
        }
        .map_err(map_error)?;

        body_value(&reply)
    }

    async fn subscribe(&self, rule: SignalRule) -> Result<Subscription> {
        let mut stream = self.match_stream(&rule).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();

        let task = self.conn.executor().spawn(
            async move {
                while let Some(Ok(message)) = stream.next().await {
                    let Some(signal) = to_signal(&message) else {
                        continue;
                    };
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
            },
            "sesame-signals",
        );
        self.track(id, task);
        debug!(id, interface = %rule.interface, "Subscribed to signals");

        Ok(Subscription {
            id: SubscriptionId(id),
            signals: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if !self.release(id.0) {
            warn!(id = id.0, "Released unknown subscription");
        }
    }

    async fn watch_name(&self, name: &str) -> Result<NameWatch> {
        let rule = SignalRule::new(DBUS_INTERFACE)
            .sender(DBUS_NAME)
            .path(ObjectPath::new(DBUS_PATH)?)
            .member("NameOwnerChanged")
            .arg0(name);
        // Subscribe before asking for the owner so no change is missed
        let mut stream = self.match_stream(&rule).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = match self.name_owner(name).await {
            Some(owner) => NameEvent::Appeared(owner),
            None => NameEvent::Vanished,
        };
        let _ = tx.send(initial);

        let id = self.next_id();
        let task = self.conn.executor().spawn(
            async move {
                while let Some(Ok(message)) = stream.next().await {
                    let Some(event) = to_signal(&message).as_ref().and_then(name_event) else {
                        continue;
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            },
            "sesame-name-watch",
        );
        self.track(id, task);

        Ok(NameWatch {
            id: WatchId(id),
            events: rx,
        })
    }

    fn unwatch_name(&self, id: WatchId) {
        if !self.release(id.0) {
            warn!(id = id.0, "Released unknown name watch");
        }
    }

    async fn name_owner(&self, name: &str) -> Option<String> {
        let call = MethodCall::new(
            DBUS_NAME,
            ObjectPath::new(DBUS_PATH).ok()?,
            DBUS_INTERFACE,
            "GetNameOwner",
        )
        .arg(name);

        match self.call(call).await {
            Ok(reply) => {
                let owner = reply.into_fields()?.into_iter().next()?;
                owner.as_str().map(str::to_string)
            }
            Err(e) if e.name() == Some(names::NAME_HAS_NO_OWNER) => None,
            Err(e) => {
                debug!(name, error = %e, "Couldn't look up name owner");
                None
            }
        }
    }
}

impl fmt::Debug for ZbusBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZbusBus")
            .field("unique_name", &self.conn.unique_name().map(|n| n.to_string()))
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

/// The body of a message as a struct value.
fn body_value(message: &Message) -> Result<Value> {
    let header = message.header();
    let empty = header
        .signature()
        .map_or(true, |signature| signature.as_str().is_empty());
    if empty {
        return Ok(Value::unit());
    }

    let body = message.body();
    let structure: zvariant::Structure<'_> = body.deserialize().map_err(map_error)?;
    Value::from_zvariant(&zvariant::Value::Structure(structure))
}

fn to_signal(message: &Message) -> Option<Signal> {
    let header = message.header();
    let path = ObjectPath::new(header.path()?.as_str()).ok()?;
    let interface = header.interface()?.to_string();
    let member = header.member()?.to_string();
    let sender = header.sender().map(|s| s.to_string()).unwrap_or_default();

    match body_value(message) {
        Ok(body) => Some(Signal {
            sender,
            path,
            interface,
            member,
            body,
        }),
        Err(e) => {
            debug!(%path, %member, error = %e, "Dropping undecodable signal");
            None
        }
    }
}

/// Interpret a `NameOwnerChanged` signal.
fn name_event(signal: &Signal) -> Option<NameEvent> {
    let fields = signal.body.fields()?;
    let new_owner = fields.get(2)?.as_str()?;
    if new_owner.is_empty() {
        Some(NameEvent::Vanished)
    } else {
        Some(NameEvent::Appeared(new_owner.to_string()))
    }
}

fn map_error(e: zbus::Error) -> BusError {
    match e {
        zbus::Error::MethodError(name, detail, _) => {
            BusError::remote(name.to_string(), detail.unwrap_or_default())
        }
        zbus::Error::InputOutput(_) => BusError::Disconnected,
        other => BusError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_changed(name: &str, old: &str, new: &str) -> Signal {
        Signal {
            sender: DBUS_NAME.to_string(),
            path: ObjectPath::new(DBUS_PATH).unwrap(),
            interface: DBUS_INTERFACE.to_string(),
            member: "NameOwnerChanged".to_string(),
            body: Value::tuple([Value::from(name), Value::from(old), Value::from(new)]),
        }
    }

    #[test]
    fn test_name_owner_changed_events() {
        assert_eq!(
            name_event(&owner_changed("org.freedesktop.secrets", "", ":1.7")),
            Some(NameEvent::Appeared(":1.7".to_string()))
        );
        assert_eq!(
            name_event(&owner_changed("org.freedesktop.secrets", ":1.7", "")),
            Some(NameEvent::Vanished)
        );

        let mut malformed = owner_changed("x", "", "");
        malformed.body = Value::tuple([Value::from("x")]);
        assert_eq!(name_event(&malformed), None);
    }

    #[test]
    fn test_remote_errors_keep_their_name() {
        let name = zbus::names::OwnedErrorName::try_from(names::UNKNOWN_METHOD).unwrap();
        let message = Message::method("/org/freedesktop/secrets", "Dismiss")
            .unwrap()
            .build(&())
            .unwrap();
        let err = map_error(zbus::Error::MethodError(
            name,
            Some("No such method 'Dismiss'".to_string()),
            message,
        ));
        assert!(err.is_unknown_method());
        assert_eq!(
            err.to_string(),
            "org.freedesktop.DBus.Error.UnknownMethod: No such method 'Dismiss'"
        );
    }

    #[test]
    fn test_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(map_error(zbus::Error::InputOutput(io.into())).is_disconnected());
        assert!(matches!(
            map_error(zbus::Error::Unsupported),
            BusError::Connection(_)
        ));
    }

    #[test]
    fn test_method_body_is_the_argument_struct() {
        let args = vec![Value::from("plain"), Value::variant("")];
        let body = to_structure(&args).unwrap();
        let message = Message::method("/org/freedesktop/secrets", "OpenSession")
            .unwrap()
            .interface("org.freedesktop.Secret.Service")
            .unwrap()
            .build(&body)
            .unwrap();

        assert_eq!(
            message.header().signature().map(|s| s.as_str().to_string()),
            Some("sv".to_string())
        );
        let decoded = body_value(&message).unwrap();
        assert!(decoded.is_of_type("(sv)"));
        assert_eq!(decoded.fields().unwrap()[0].as_str(), Some("plain"));
    }

    #[test]
    fn test_empty_body_is_unit() {
        let message = Message::method("/org/freedesktop/secrets", "Close")
            .unwrap()
            .build(&())
            .unwrap();
        assert_eq!(body_value(&message).unwrap(), Value::unit());
    }
}
