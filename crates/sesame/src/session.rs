//! Transfer sessions and the secret codec.
//!
//! A [`Session`] is negotiated once per service connection with
//! `OpenSession`. Secrets cross the bus as `(oayays)` structs: the session
//! path, algorithm parameters, the (possibly encrypted) value, and the
//! content type.

use sesame_bus::{Bus, MethodCall, ObjectPath, Value};
use sesame_core::config::AlgorithmPreference;
use sesame_core::SecretBytes;
use tracing::{debug, info};

use crate::crypto::{self, DhKeypair};
use crate::error::{Result, SecretError, COULD_NOT_COMMUNICATE};
use crate::interfaces::{algorithms, SERVICE_INTERFACE};
use crate::types::SecretValue;

/// Signature of an encoded secret.
pub const SECRET_SIGNATURE: &str = "(oayays)";

/// Negotiated transfer algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Plain,
    DhAes,
}

impl Algorithm {
    /// Wire identifier of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => algorithms::PLAIN,
            Self::DhAes => algorithms::DH_AES,
        }
    }
}

/// An established transfer session. Immutable once created.
pub struct Session {
    path: ObjectPath,
    algorithm: Algorithm,
    key: Option<SecretBytes>,
}

impl Session {
    pub(crate) fn plain(path: ObjectPath) -> Self {
        Self {
            path,
            algorithm: Algorithm::Plain,
            key: None,
        }
    }

    pub(crate) fn aes(path: ObjectPath, key: SecretBytes) -> Self {
        Self {
            path,
            algorithm: Algorithm::DhAes,
            key: Some(key),
        }
    }

    /// Remote session object path.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Encode a secret for transfer.
    pub fn encode(&self, value: &SecretValue) -> Result<Value> {
        let (parameters, payload) = match (&self.algorithm, &self.key) {
            (Algorithm::DhAes, Some(key)) => crypto::encrypt(key.expose_secret(), value.get())?,
            _ => (Vec::new(), value.get().to_vec()),
        };

        Ok(Value::tuple([
            Value::Path(self.path.clone()),
            Value::Bytes(parameters),
            Value::Bytes(payload),
            Value::Str(value.content_type().to_string()),
        ]))
    }

    /// Decode a transferred secret.
    ///
    /// Returns `None` when the struct has the wrong shape, names a different
    /// session, or fails the algorithm's checks.
    pub fn decode(&self, wire: &Value) -> Option<SecretValue> {
        if !wire.is_of_type(SECRET_SIGNATURE) {
            debug!(signature = %wire.signature(), "Secret has unexpected signature");
            return None;
        }
        let fields = wire.fields()?;
        let (path, parameters, payload, content_type) = (
            fields[0].as_path()?,
            fields[1].as_bytes()?,
            fields[2].as_bytes()?,
            fields[3].as_str()?,
        );

        if *path != self.path {
            info!(
                expected = %self.path,
                received = %path,
                "Received a secret encoded with the wrong session"
            );
            return None;
        }

        match (&self.algorithm, &self.key) {
            (Algorithm::DhAes, Some(key)) => {
                let plain = crypto::decrypt(key.expose_secret(), parameters, payload);
                if plain.is_none() {
                    info!("Received an invalid encrypted secret");
                }
                plain.map(|data| SecretValue::new(data, content_type))
            }
            _ => {
                if !parameters.is_empty() {
                    info!("Received a plain secret with invalid parameters");
                    return None;
                }
                Some(SecretValue::new(payload, content_type))
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Negotiate a new session with the service object at `service_path`.
pub(crate) async fn open(
    bus: &dyn Bus,
    destination: &str,
    service_path: &ObjectPath,
    preference: AlgorithmPreference,
) -> Result<Session> {
    if preference != AlgorithmPreference::Plain {
        match open_aes(bus, destination, service_path).await {
            Ok(session) => return Ok(session),
            Err(SecretError::Transport(e))
                if e.is_not_supported() && preference == AlgorithmPreference::Auto =>
            {
                debug!("Service does not support encrypted sessions, falling back to plain");
            }
            Err(e) => return Err(e),
        }
    }
    open_plain(bus, destination, service_path).await
}

async fn open_aes(bus: &dyn Bus, destination: &str, service_path: &ObjectPath) -> Result<Session> {
    let keypair = DhKeypair::generate();
    let call = MethodCall::new(destination, service_path.clone(), SERVICE_INTERFACE, "OpenSession")
        .arg(algorithms::DH_AES)
        .arg(Value::variant(keypair.public_bytes().to_vec()));

    let reply = bus.call(call).await?;
    let (output, path) = parse_open_reply(reply)?;

    let peer = output
        .as_variant()
        .and_then(Value::as_bytes)
        .ok_or_else(|| SecretError::protocol(COULD_NOT_COMMUNICATE))?;
    let key = keypair
        .derive_session_key(peer)
        .ok_or_else(|| SecretError::protocol(COULD_NOT_COMMUNICATE))?;

    debug!(path = %path, "Opened encrypted session");
    Ok(Session::aes(path, key))
}

async fn open_plain(
    bus: &dyn Bus,
    destination: &str,
    service_path: &ObjectPath,
) -> Result<Session> {
    let call = MethodCall::new(destination, service_path.clone(), SERVICE_INTERFACE, "OpenSession")
        .arg(algorithms::PLAIN)
        .arg(Value::variant(""));

    let reply = bus.call(call).await?;
    let (_, path) = parse_open_reply(reply)?;

    debug!(path = %path, "Opened plain session");
    Ok(Session::plain(path))
}

/// Split a `(vo)` reply, rejecting the empty session path.
fn parse_open_reply(reply: Value) -> Result<(Value, ObjectPath)> {
    if !reply.is_of_type("(vo)") {
        return Err(SecretError::protocol(COULD_NOT_COMMUNICATE));
    }
    let mut fields = reply
        .into_fields()
        .ok_or_else(|| SecretError::protocol(COULD_NOT_COMMUNICATE))?;
    let path = match fields.pop() {
        Some(Value::Path(path)) if !path.is_root() => path,
        _ => return Err(SecretError::protocol(COULD_NOT_COMMUNICATE)),
    };
    let output = fields
        .pop()
        .ok_or_else(|| SecretError::protocol(COULD_NOT_COMMUNICATE))?;
    Ok((output, path))
}
