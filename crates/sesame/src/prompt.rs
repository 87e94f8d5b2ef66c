//! Prompt completion.
//!
//! Some service operations cannot finish without asking the user, and hand
//! back the path of a prompt object instead. Performing the prompt means
//! calling `Prompt` on it and waiting for its `Completed` signal. Along the
//! way the operation can also end because the caller cancels it (the prompt
//! is then dismissed remotely) or because the service leaves the bus.
//!
//! A prompt can be performed once. Whatever ends the operation, the signal
//! subscription and the name watch are released exactly once, including when
//! the future is dropped before it finishes.

use async_trait::async_trait;
use futures::future::{BoxFuture, OptionFuture};
use parking_lot::Mutex;
use sesame_bus::{
    Bus, BusError, MethodCall, NameEvent, NameWatch, ObjectPath, Signal, SignalRule,
    Subscription, SubscriptionId, Value, WatchId,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SecretError};
use crate::interfaces::PROMPT_INTERFACE;
use crate::sync;

/// How a performed prompt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user completed the prompt.
    Accepted,
    /// The prompt was dismissed, cancelled, or its service went away.
    Dismissed,
}

impl PromptOutcome {
    fn from_dismissed(dismissed: bool) -> Self {
        if dismissed {
            Self::Dismissed
        } else {
            Self::Accepted
        }
    }

    pub fn is_dismissed(&self) -> bool {
        matches!(self, Self::Dismissed)
    }
}

#[derive(Default)]
struct PromptState {
    triggered: bool,
    result: Option<Value>,
}

/// A remote prompt object.
pub struct Prompt {
    bus: Arc<dyn Bus>,
    service_name: String,
    path: ObjectPath,
    state: Mutex<PromptState>,
}

impl Prompt {
    pub fn new(bus: Arc<dyn Bus>, service_name: impl Into<String>, path: ObjectPath) -> Self {
        Self {
            bus,
            service_name: service_name.into(),
            path,
            state: Mutex::new(PromptState::default()),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Perform the prompt and wait for it to complete.
    ///
    /// `window_id` identifies the parent window for the prompt, if any.
    /// Cancelling `cancellable` asks the service to dismiss the prompt. An
    /// error from the `Prompt` call itself is returned after the operation
    /// completes as dismissed.
    pub async fn perform(
        &self,
        window_id: Option<&str>,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        {
            let mut state = self.state.lock();
            if state.triggered {
                warn!(path = %self.path, "Prompt was already performed");
                return Err(SecretError::AlreadyTriggered);
            }
            state.triggered = true;
        }

        let (mut op, mut signals, mut events, watched) = match self.listen().await {
            Ok(listening) => listening,
            Err(e) => {
                self.state.lock().triggered = false;
                return Err(e);
            }
        };

        let prompt_call = MethodCall::new(
            self.service_name.as_str(),
            self.path.clone(),
            PROMPT_INTERFACE,
            "Prompt",
        )
        .arg(window_id.unwrap_or(""));
        debug!(path = %self.path, owner = %watched, "Performing prompt");

        let mut prompting: Option<BoxFuture<'_, sesame_bus::Result<Value>>> =
            Some(self.bus.call(prompt_call));
        let mut dismissing: Option<BoxFuture<'_, sesame_bus::Result<Value>>> = None;

        let cancelled = async {
            match cancellable {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);
        let mut cancel_requested = false;

        loop {
            tokio::select! {
                biased;

                Some(signal) = signals.recv() => {
                    if !signal.body.is_of_type("(bv)") {
                        warn!(
                            path = %self.path,
                            signature = %signal.body.signature(),
                            "Prompt completed with an invalid signal"
                        );
                        return Ok(op.complete(true));
                    }

                    let mut fields = signal.body.into_fields().unwrap_or_default();
                    let result = fields.pop().map(Value::into_unwrapped);
                    let dismissed = fields.pop().and_then(|v| v.as_bool()).unwrap_or(true);
                    self.state.lock().result = result;

                    debug!(path = %self.path, dismissed, "Prompt completed");
                    return Ok(op.complete(dismissed));
                }

                Some(event) = events.recv() => {
                    if event == NameEvent::Vanished {
                        debug!(path = %self.path, "Prompt service vanished");
                        // In-flight calls are dropped with the operation
                        return Ok(op.complete(true));
                    }
                }

                Some(reply) = OptionFuture::from(prompting.as_mut()) => {
                    prompting = None;
                    if let Err(e) = reply {
                        if e.is_cancelled() {
                            continue;
                        }
                        op.complete(true);
                        return Err(e.into());
                    }
                    debug!(path = %self.path, "Prompt shown, waiting for completion");
                }

                Some(reply) = OptionFuture::from(dismissing.as_mut()) => {
                    dismissing = None;
                    match reply {
                        Err(e) if !is_swallowed_dismiss_error(&e) => {
                            op.complete(true);
                            return Err(e.into());
                        }
                        _ => {
                            debug!(path = %self.path, "Prompt dismissed");
                            return Ok(op.complete(true));
                        }
                    }
                }

                _ = &mut cancelled, if !cancel_requested => {
                    cancel_requested = true;
                    debug!(path = %self.path, "Prompt cancelled, dismissing");
                    let call = MethodCall::new(
                        self.service_name.as_str(),
                        self.path.clone(),
                        PROMPT_INTERFACE,
                        "Dismiss",
                    );
                    dismissing = Some(self.bus.call(call));
                }

                else => {
                    return Ok(op.complete(true));
                }
            }
        }
    }

    /// Subscribe to completion and watch the service before prompting.
    async fn listen(
        &self,
    ) -> Result<(
        PendingOperation,
        mpsc::UnboundedReceiver<Signal>,
        mpsc::UnboundedReceiver<NameEvent>,
        String,
    )> {
        let owner = self.bus.name_owner(&self.service_name).await;
        let watched = owner.unwrap_or_else(|| self.service_name.clone());
        let mut op = PendingOperation::new(Arc::clone(&self.bus));

        let rule = SignalRule::new(PROMPT_INTERFACE)
            .sender(watched.clone())
            .path(self.path.clone())
            .member("Completed");
        let Subscription { id, signals } = self.bus.subscribe(rule).await?;
        op.subscription = Some(id);

        // A failed watch drops `op`, which releases the subscription
        let NameWatch { id, events } = self.bus.watch_name(&watched).await?;
        op.watch = Some(id);

        Ok((op, signals, events, watched))
    }

    /// Blocking variant of [`Prompt::perform`].
    pub fn perform_sync(
        &self,
        window_id: Option<&str>,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        sync::wait(self.perform(window_id, cancellable))
    }

    /// The value delivered with the completion signal, if it has the
    /// expected signature.
    pub fn result_value(&self, expected: &str) -> Option<Value> {
        let state = self.state.lock();
        let value = state.result.as_ref()?;
        if value.is_of_type(expected) {
            Some(value.clone())
        } else {
            warn!(
                path = %self.path,
                expected,
                received = %value.signature(),
                "Prompt result has unexpected type"
            );
            None
        }
    }
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("service_name", &self.service_name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn is_swallowed_dismiss_error(e: &BusError) -> bool {
    e.is_unknown_method() || e.is_cancelled() || e.is_disconnected()
}

/// Resources held while a prompt is outstanding.
struct PendingOperation {
    bus: Arc<dyn Bus>,
    subscription: Option<SubscriptionId>,
    watch: Option<WatchId>,
    dismissed: bool,
    completed: bool,
}

impl PendingOperation {
    fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            subscription: None,
            watch: None,
            dismissed: false,
            completed: false,
        }
    }

    fn complete(&mut self, dismissed: bool) -> PromptOutcome {
        if !self.completed {
            self.completed = true;
            self.dismissed = dismissed;
            self.release();
        }
        PromptOutcome::from_dismissed(self.dismissed)
    }

    fn release(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe(id);
        }
        if let Some(id) = self.watch.take() {
            self.bus.unwatch_name(id);
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if !self.completed {
            debug!("Prompt operation dropped before completion");
        }
        self.release();
    }
}

/// Strategy for running prompts on behalf of a service.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn prompt(
        &self,
        prompt: &Prompt,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome>;
}

/// Performs prompts with a fixed parent window.
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptHandler {
    window_id: Option<String>,
}

impl DefaultPromptHandler {
    pub fn new(window_id: Option<String>) -> Self {
        Self { window_id }
    }
}

#[async_trait]
impl PromptHandler for DefaultPromptHandler {
    async fn prompt(
        &self,
        prompt: &Prompt,
        cancellable: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        prompt.perform(self.window_id.as_deref(), cancellable).await
    }
}
