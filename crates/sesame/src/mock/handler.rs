//! Method dispatch for the mock service.

use async_trait::async_trait;
use parking_lot::Mutex;
use sesame_bus::error::names;
use sesame_bus::{BusError, MethodCall, ObjectPath, ServiceContext, ServiceHandler, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{MockState, PromptAction, PromptBehavior};
use crate::crypto::DhKeypair;
use crate::interfaces::{
    algorithms, props, COLLECTION_INTERFACE, ITEM_INTERFACE, PROMPT_INTERFACE,
    PROPERTIES_INTERFACE, SERVICE_INTERFACE, SESSION_INTERFACE,
};
use crate::session::Session;
use crate::types::SecretValue;

type Reply = sesame_bus::Result<Value>;

const IS_LOCKED: &str = "org.freedesktop.Secret.Error.IsLocked";
const NO_SESSION: &str = "org.freedesktop.Secret.Error.NoSession";

pub(super) struct MockHandler {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl ServiceHandler for MockHandler {
    async fn handle(&self, ctx: &ServiceContext, call: &MethodCall) -> Reply {
        let resolved = self.state.lock().resolve_alias(&call.path);
        let aliased;
        let call = match resolved {
            Some(path) => {
                aliased = MethodCall {
                    path,
                    ..call.clone()
                };
                &aliased
            }
            None => call,
        };

        match (call.interface.as_str(), call.member.as_str()) {
            (SERVICE_INTERFACE, "OpenSession") => {
                let should_yield = self.state.lock().negotiation_yield;
                if should_yield {
                    tokio::task::yield_now().await;
                }
                self.open_session(call)
            }
            (PROMPT_INTERFACE, "Prompt") => {
                let hang = self.prompt(ctx, call)?;
                if hang {
                    std::future::pending::<()>().await;
                }
                Ok(Value::unit())
            }
            _ => self.dispatch(ctx, call),
        }
    }
}

impl MockHandler {
    pub(super) fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }

    fn dispatch(&self, ctx: &ServiceContext, call: &MethodCall) -> Reply {
        match (call.interface.as_str(), call.member.as_str()) {
            (SERVICE_INTERFACE, "SearchItems") => self.search_items(call),
            (SERVICE_INTERFACE, "Unlock") => self.set_locked(call, false),
            (SERVICE_INTERFACE, "Lock") => self.set_locked(call, true),
            (SERVICE_INTERFACE, "CreateCollection") => self.create_collection(call),
            (PROPERTIES_INTERFACE, "GetAll") => self.get_all(call),
            (PROPERTIES_INTERFACE, "Set") => self.set(ctx, call),
            (ITEM_INTERFACE, "GetSecret") => self.get_secret(call),
            (ITEM_INTERFACE, "SetSecret") => self.set_secret(call),
            (ITEM_INTERFACE, "Delete") | (COLLECTION_INTERFACE, "Delete") => self.delete(call),
            (COLLECTION_INTERFACE, "CreateItem") => self.create_item(call),
            (PROMPT_INTERFACE, "Dismiss") => self.dismiss(ctx, call),
            (SESSION_INTERFACE, "Close") => {
                self.state.lock().sessions.remove(&call.path);
                Ok(Value::unit())
            }
            (interface, member) => Err(BusError::remote(
                names::UNKNOWN_METHOD,
                format!("No such method '{}' on interface '{}'", member, interface),
            )),
        }
    }

    fn open_session(&self, call: &MethodCall) -> Reply {
        let algorithm = arg(call, 0)?.as_str().unwrap_or_default().to_string();
        let mut state = self.state.lock();
        let parent = ObjectPath::new("/org/freedesktop/secrets/session")?;

        let (output, session_path, session) = match algorithm.as_str() {
            algorithms::PLAIN => {
                let path = state.child_path(&parent, "s");
                (Value::variant(""), path.clone(), Session::plain(path))
            }
            algorithms::DH_AES if state.aes_supported => {
                let peer = arg(call, 1)?
                    .as_variant()
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| invalid_args("Expected a public key"))?;
                let keypair = DhKeypair::generate();
                let key = keypair
                    .derive_session_key(peer)
                    .ok_or_else(|| invalid_args("Invalid public key"))?;
                let path = state.child_path(&parent, "s");
                (
                    Value::variant(keypair.public_bytes().to_vec()),
                    path.clone(),
                    Session::aes(path, key),
                )
            }
            other => {
                return Err(BusError::remote(
                    names::NOT_SUPPORTED,
                    format!("Algorithm '{}' is not supported", other),
                ))
            }
        };

        state.sessions.insert(session_path.clone(), session);
        state.sessions_opened += 1;
        Ok(Value::tuple([output, Value::Path(session_path)]))
    }

    fn search_items(&self, call: &MethodCall) -> Reply {
        let wanted = arg(call, 0)?
            .as_attributes()
            .ok_or_else(|| invalid_args("Expected attributes"))?;
        let state = self.state.lock();

        let mut unlocked = Vec::new();
        let mut locked = Vec::new();
        for (path, object) in &state.objects {
            if object.interface != ITEM_INTERFACE {
                continue;
            }
            let attributes = object
                .properties
                .get(props::ATTRIBUTES)
                .and_then(Value::as_attributes);
            let matches = attributes.is_some_and(|have| {
                wanted.iter().all(|(k, v)| have.get(k) == Some(v))
            });
            if !matches {
                continue;
            }
            if state.is_locked(path) {
                locked.push(path.clone());
            } else {
                unlocked.push(path.clone());
            }
        }

        Ok(Value::tuple([Value::Paths(unlocked), Value::Paths(locked)]))
    }

    fn set_locked(&self, call: &MethodCall, locked: bool) -> Reply {
        let objects = arg(call, 0)?
            .as_paths()
            .ok_or_else(|| invalid_args("Expected object paths"))?;
        let mut state = self.state.lock();
        let objects: Vec<ObjectPath> = objects
            .iter()
            .map(|path| state.resolve_alias(path).unwrap_or_else(|| path.clone()))
            .collect();

        if state.prompts_required {
            let prompt = state.add_prompt(
                Value::Paths(objects.clone()),
                Some(PromptAction::SetLocked(objects, locked)),
            );
            return Ok(Value::tuple([Value::Paths(Vec::new()), Value::Path(prompt)]));
        }

        state.apply(PromptAction::SetLocked(objects.clone(), locked));
        Ok(Value::tuple([
            Value::Paths(objects),
            Value::Path(ObjectPath::root()),
        ]))
    }

    fn create_collection(&self, call: &MethodCall) -> Reply {
        let properties = arg(call, 0)?
            .as_dict()
            .ok_or_else(|| invalid_args("Expected properties"))?;
        let label = properties
            .get(props::COLLECTION_LABEL)
            .cloned()
            .map(Value::into_unwrapped)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let alias = call.args.get(1).and_then(Value::as_str).map(str::to_string);

        let mut state = self.state.lock();
        let path = state.add_collection(&label, alias.as_deref());

        if state.prompts_required {
            let prompt = state.add_prompt(Value::Path(path), None);
            return Ok(Value::tuple([
                Value::Path(ObjectPath::root()),
                Value::Path(prompt),
            ]));
        }
        Ok(Value::tuple([Value::Path(path), Value::Path(ObjectPath::root())]))
    }

    fn get_all(&self, call: &MethodCall) -> Reply {
        let interface = arg(call, 0)?.as_str().unwrap_or_default();
        let state = self.state.lock();
        let object = state.objects.get(&call.path).ok_or_else(|| unknown_object(&call.path))?;

        if object.interface != interface {
            return Err(invalid_args(format!("No such interface '{}'", interface)));
        }
        Ok(Value::tuple([Value::Dict(object.properties.clone())]))
    }

    fn set(&self, ctx: &ServiceContext, call: &MethodCall) -> Reply {
        let interface = arg(call, 0)?.as_str().unwrap_or_default().to_string();
        let name = arg(call, 1)?.as_str().unwrap_or_default().to_string();
        let value = arg(call, 2)?.clone().into_unwrapped();

        if name != props::LABEL && name != props::ATTRIBUTES {
            return Err(invalid_args(format!("Property '{}' is read-only", name)));
        }
        if !self.state.lock().set_property(&call.path, &name, value.clone()) {
            return Err(unknown_object(&call.path));
        }

        let mut changed = BTreeMap::new();
        changed.insert(name, Value::variant(value));
        ctx.emit_signal(
            call.path.clone(),
            PROPERTIES_INTERFACE,
            "PropertiesChanged",
            vec![
                Value::Str(interface),
                Value::Dict(changed),
                Value::Strings(Vec::new()),
            ],
        );
        Ok(Value::unit())
    }

    fn get_secret(&self, call: &MethodCall) -> Reply {
        let session_path = arg(call, 0)?
            .as_path()
            .ok_or_else(|| invalid_args("Expected a session path"))?;
        let state = self.state.lock();

        let (data, content_type) = state
            .secrets
            .get(&call.path)
            .ok_or_else(|| unknown_object(&call.path))?;
        if state.is_locked(&call.path) {
            return Err(BusError::remote(IS_LOCKED, "Cannot get secret of a locked object"));
        }
        let session = state
            .sessions
            .get(session_path)
            .ok_or_else(|| BusError::remote(NO_SESSION, "The session does not exist"))?;

        let wire = session
            .encode(&SecretValue::new(data.clone(), content_type.as_str()))
            .map_err(|e| BusError::remote(names::FAILED, e.to_string()))?;
        Ok(Value::tuple([wire]))
    }

    fn set_secret(&self, call: &MethodCall) -> Reply {
        let mut state = self.state.lock();
        if !state.secrets.contains_key(&call.path) {
            return Err(unknown_object(&call.path));
        }
        let value = decode_secret(&state, arg(call, 0)?)?;
        state.secrets.insert(
            call.path.clone(),
            (value.get().to_vec(), value.content_type().to_string()),
        );
        Ok(Value::unit())
    }

    fn delete(&self, call: &MethodCall) -> Reply {
        let mut state = self.state.lock();
        if !state.objects.contains_key(&call.path) {
            return Err(unknown_object(&call.path));
        }

        if state.prompts_required {
            let prompt = state.add_prompt(
                Value::from(""),
                Some(PromptAction::Delete(call.path.clone())),
            );
            return Ok(Value::tuple([Value::Path(prompt)]));
        }

        state.remove_object(&call.path);
        Ok(Value::tuple([Value::Path(ObjectPath::root())]))
    }

    fn create_item(&self, call: &MethodCall) -> Reply {
        let properties = arg(call, 0)?
            .as_dict()
            .ok_or_else(|| invalid_args("Expected properties"))?;
        let replace = arg(call, 2)?.as_bool().unwrap_or(false);
        let label = properties
            .get(props::ITEM_LABEL)
            .cloned()
            .map(Value::into_unwrapped)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let attributes = properties
            .get(props::ITEM_ATTRIBUTES)
            .cloned()
            .map(Value::into_unwrapped)
            .and_then(|v| v.as_attributes().cloned())
            .unwrap_or_default();

        let mut state = self.state.lock();
        if !state.objects.contains_key(&call.path) {
            return Err(unknown_object(&call.path));
        }
        if state.is_locked(&call.path) {
            return Err(BusError::remote(IS_LOCKED, "Collection is locked"));
        }
        let value = decode_secret(&state, arg(call, 1)?)?;

        let existing = replace
            .then(|| {
                state
                    .objects
                    .iter()
                    .find(|(path, object)| {
                        object.interface == ITEM_INTERFACE
                            && path.parent().as_ref() == Some(&call.path)
                            && object
                                .properties
                                .get(props::ATTRIBUTES)
                                .and_then(Value::as_attributes)
                                == Some(&attributes)
                    })
                    .map(|(path, _)| path.clone())
            })
            .flatten();

        let path = match existing {
            Some(path) => {
                state.set_property(&path, props::LABEL, Value::Str(label));
                state.secrets.insert(
                    path.clone(),
                    (value.get().to_vec(), value.content_type().to_string()),
                );
                path
            }
            None => state.add_item(
                &call.path,
                &label,
                attributes,
                value.get().to_vec(),
                value.content_type(),
            ),
        };

        Ok(Value::tuple([Value::Path(path), Value::Path(ObjectPath::root())]))
    }

    /// Returns whether the `Prompt` call should never reply.
    fn prompt(&self, ctx: &ServiceContext, call: &MethodCall) -> sesame_bus::Result<bool> {
        let window_id = arg(call, 0)?.as_str().unwrap_or_default().to_string();
        let mut state = self.state.lock();
        state.last_window_id = Some(window_id);

        if !state.prompts.contains_key(&call.path) {
            return Err(unknown_object(&call.path));
        }

        match state.prompt_behavior {
            PromptBehavior::Accept => {
                if let Some(prompt) = state.prompts.remove(&call.path) {
                    if let Some(action) = prompt.action {
                        state.apply(action);
                    }
                    completed(ctx, &call.path, false, prompt.result);
                }
                Ok(false)
            }
            PromptBehavior::Dismiss => {
                state.prompts.remove(&call.path);
                completed(ctx, &call.path, true, Value::from(""));
                Ok(false)
            }
            PromptBehavior::Malformed => {
                state.prompts.remove(&call.path);
                ctx.emit_signal(
                    call.path.clone(),
                    PROMPT_INTERFACE,
                    "Completed",
                    vec![Value::from("oops")],
                );
                Ok(false)
            }
            PromptBehavior::Fail => Err(BusError::remote(names::FAILED, "Prompt failed")),
            PromptBehavior::Hang | PromptBehavior::DismissUnsupported => Ok(false),
            PromptBehavior::HangCall => Ok(true),
        }
    }

    fn dismiss(&self, ctx: &ServiceContext, call: &MethodCall) -> Reply {
        let mut state = self.state.lock();
        if state.prompt_behavior == PromptBehavior::DismissUnsupported {
            return Err(BusError::remote(
                names::UNKNOWN_METHOD,
                "No such method 'Dismiss'",
            ));
        }
        if state.prompts.remove(&call.path).is_some() {
            completed(ctx, &call.path, true, Value::from(""));
        }
        Ok(Value::unit())
    }
}

fn arg(call: &MethodCall, index: usize) -> sesame_bus::Result<&Value> {
    call.args
        .get(index)
        .ok_or_else(|| invalid_args(format!("Missing argument {}", index)))
}

fn decode_secret(state: &MockState, wire: &Value) -> sesame_bus::Result<SecretValue> {
    let session_path = wire
        .fields()
        .and_then(|f| f.first())
        .and_then(Value::as_path)
        .ok_or_else(|| invalid_args("Expected a secret"))?;
    let session = state
        .sessions
        .get(session_path)
        .ok_or_else(|| BusError::remote(NO_SESSION, "The session does not exist"))?;
    session
        .decode(wire)
        .ok_or_else(|| invalid_args("The secret was transferred or encrypted in an invalid way"))
}

fn completed(ctx: &ServiceContext, path: &ObjectPath, dismissed: bool, result: Value) {
    ctx.emit_signal(
        path.clone(),
        PROMPT_INTERFACE,
        "Completed",
        vec![Value::Bool(dismissed), Value::variant(result)],
    );
}

fn invalid_args(message: impl Into<String>) -> BusError {
    BusError::remote(names::INVALID_ARGS, message)
}

fn unknown_object(path: &ObjectPath) -> BusError {
    BusError::remote(names::UNKNOWN_OBJECT, format!("No such object '{}'", path))
}
