//! Prompt completion through the service connection.
//!
//! These tests drive prompt-requiring operations against the mock service
//! and check every way a prompt can end.

use async_trait::async_trait;
use sesame::mock::PromptBehavior;
use sesame::{Item, Prompt, PromptHandler, PromptOutcome, SecretError, Service, ServiceFlags};
use sesame_bus::Value;
use sesame_core::Config;
use sesame_integration_tests::Harness;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_delete_through_prompt() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let item = Item::new(&service, path.clone()).await?;

    h.mock.set_prompts_required(true);
    assert!(item.delete().await?);
    assert!(!h.mock.has_object(&path));
    assert_eq!(h.bus.call_count("Prompt"), 1);
    assert_eq!(h.bus.active_subscriptions(), 2);
    assert_eq!(h.bus.active_watches(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_dismisses_prompt() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_prompt_behavior(PromptBehavior::Hang);
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let prompt = service.new_prompt(h.mock.add_prompt(Value::from("unused")));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let outcome = service.prompt(&prompt, Some(&token)).await?;
    assert_eq!(outcome, PromptOutcome::Dismissed);
    assert_eq!(h.bus.call_count("Dismiss"), 1);
    assert_eq!(prompt.result_value("s"), None);
    Ok(())
}

#[tokio::test]
async fn test_cancel_when_dismiss_unsupported() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_prompt_behavior(PromptBehavior::DismissUnsupported);
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let prompt = service.new_prompt(h.mock.add_prompt(Value::from("unused")));

    let token = CancellationToken::new();
    token.cancel();
    let outcome = service.prompt(&prompt, Some(&token)).await?;
    assert!(outcome.is_dismissed());
    Ok(())
}

#[tokio::test]
async fn test_service_vanishing_completes_prompt() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_prompt_behavior(PromptBehavior::HangCall);
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let prompt = service.new_prompt(h.mock.add_prompt(Value::from("unused")));

    let mock = h.mock.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        mock.disconnect();
    });

    let outcome = service.prompt(&prompt, None).await?;
    assert_eq!(outcome, PromptOutcome::Dismissed);
    assert_eq!(h.bus.active_watches(), 0);
    Ok(())
}

#[tokio::test]
async fn test_prompt_performed_once() -> anyhow::Result<()> {
    let h = Harness::new();
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let prompt = service.new_prompt(h.mock.add_prompt(Value::from("done")));

    assert_eq!(service.prompt(&prompt, None).await?, PromptOutcome::Accepted);
    let calls = h.bus.call_count("Prompt");
    assert!(matches!(
        service.prompt(&prompt, None).await,
        Err(SecretError::AlreadyTriggered)
    ));
    assert_eq!(h.bus.call_count("Prompt"), calls);
    Ok(())
}

#[tokio::test]
async fn test_failed_prompt_call_surfaces_error() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_prompt_behavior(PromptBehavior::Fail);
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let prompt = service.new_prompt(h.mock.add_prompt(Value::from("unused")));

    let err = service.prompt(&prompt, None).await.unwrap_err();
    assert_eq!(
        err.as_transport().and_then(|e| e.name()),
        Some("org.freedesktop.DBus.Error.Failed")
    );
    assert_eq!(h.bus.active_watches(), 0);
    Ok(())
}

/// Accepts every prompt without calling the service.
struct CountingHandler {
    prompts: AtomicUsize,
}

#[async_trait]
impl PromptHandler for CountingHandler {
    async fn prompt(
        &self,
        _prompt: &Prompt,
        _cancellable: Option<&CancellationToken>,
    ) -> sesame::Result<PromptOutcome> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(PromptOutcome::Accepted)
    }
}

#[tokio::test]
async fn test_custom_prompt_handler() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let handler = Arc::new(CountingHandler {
        prompts: AtomicUsize::new(0),
    });
    let service = Service::with_prompt_handler(
        h.bus(),
        Config::default(),
        ServiceFlags::NONE,
        handler.clone(),
    )
    .await?;
    let item = Item::new(&service, path.clone()).await?;

    h.mock.set_prompts_required(true);
    assert!(item.delete().await?);
    assert_eq!(handler.prompts.load(Ordering::SeqCst), 1);
    assert_eq!(h.bus.call_count("Prompt"), 0);
    // The service only deletes once its prompt runs
    assert!(h.mock.has_object(&path));
    Ok(())
}
