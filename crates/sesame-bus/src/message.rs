//! Method calls, signals, and match rules.

use crate::value::{ObjectPath, Value};

/// A method call addressed to an object on a named peer.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Bus name of the receiving peer.
    pub destination: String,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    /// In arguments, in order.
    pub args: Vec<Value>,
}

impl MethodCall {
    /// Create a call with no arguments.
    pub fn new(
        destination: impl Into<String>,
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path,
            interface: interface.into(),
            member: member.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// The call body as a struct value.
    pub fn body(&self) -> Value {
        Value::Struct(self.args.clone())
    }
}

/// A signal emitted by a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Unique name of the emitting peer.
    pub sender: String,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    /// Signal arguments as a struct.
    pub body: Value,
}

/// Selects which signals a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRule {
    /// Sender name, well-known or unique. `None` matches any sender.
    pub sender: Option<String>,
    /// Object path. `None` matches any path.
    pub path: Option<ObjectPath>,
    pub interface: String,
    /// Member name. `None` matches every member of the interface.
    pub member: Option<String>,
    /// Required value of the first argument, when it is a string.
    pub arg0: Option<String>,
}

impl SignalRule {
    /// Match every signal of an interface.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            sender: None,
            path: None,
            interface: interface.into(),
            member: None,
            arg0: None,
        }
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn arg0(mut self, value: impl Into<String>) -> Self {
        self.arg0 = Some(value.into());
        self
    }

    /// Check everything except the sender, whose resolution needs the
    /// bus name table.
    pub fn matches_target(&self, signal: &Signal) -> bool {
        self.interface == signal.interface
            && self.path.as_ref().map_or(true, |p| *p == signal.path)
            && self.member.as_ref().map_or(true, |m| *m == signal.member)
            && self.arg0.as_ref().map_or(true, |a| {
                signal.body.fields().and_then(|f| f.first()).and_then(Value::as_str)
                    == Some(a.as_str())
            })
    }
}

/// Ownership change of a watched bus name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameEvent {
    /// The name is owned by the given unique name.
    Appeared(String),
    /// The name has no owner.
    Vanished,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(path: &str, member: &str) -> Signal {
        Signal {
            sender: ":1.1".to_string(),
            path: ObjectPath::new(path).unwrap(),
            interface: "org.freedesktop.Secret.Prompt".to_string(),
            member: member.to_string(),
            body: Value::unit(),
        }
    }

    #[test]
    fn test_method_call_builder() {
        let call = MethodCall::new(
            "org.freedesktop.secrets",
            ObjectPath::new("/org/freedesktop/secrets").unwrap(),
            "org.freedesktop.Secret.Service",
            "OpenSession",
        )
        .arg("plain")
        .arg(Value::variant(""));

        assert_eq!(call.args.len(), 2);
        assert_eq!(call.body().signature(), "(sv)");
    }

    #[test]
    fn test_rule_matching() {
        let rule = SignalRule::new("org.freedesktop.Secret.Prompt")
            .path(ObjectPath::new("/prompt/1").unwrap())
            .member("Completed");

        assert!(rule.matches_target(&signal("/prompt/1", "Completed")));
        assert!(!rule.matches_target(&signal("/prompt/2", "Completed")));
        assert!(!rule.matches_target(&signal("/prompt/1", "Other")));

        let any = SignalRule::new("org.freedesktop.Secret.Prompt");
        assert!(any.matches_target(&signal("/prompt/9", "Other")));
    }

    #[test]
    fn test_rule_matches_first_argument() {
        let rule = SignalRule::new("org.freedesktop.DBus")
            .member("NameOwnerChanged")
            .arg0("org.freedesktop.secrets");
        let mut changed = Signal {
            sender: "org.freedesktop.DBus".to_string(),
            path: ObjectPath::new("/org/freedesktop/DBus").unwrap(),
            interface: "org.freedesktop.DBus".to_string(),
            member: "NameOwnerChanged".to_string(),
            body: Value::tuple([
                Value::from("org.freedesktop.secrets"),
                Value::from(":1.4"),
                Value::from(""),
            ]),
        };
        assert!(rule.matches_target(&changed));

        changed.body = Value::tuple([Value::from("org.example.Other")]);
        assert!(!rule.matches_target(&changed));
        changed.body = Value::unit();
        assert!(!rule.matches_target(&changed));
    }
}
