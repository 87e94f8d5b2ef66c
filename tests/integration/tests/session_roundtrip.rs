//! Secret transfer over negotiated sessions.
//!
//! These tests store and retrieve secrets through the mock service with
//! each transfer algorithm and check how negotiation behaves.

use sesame::{Algorithm, Item, SecretError, SecretValue, ServiceFlags};
use sesame_bus::{Bus, MethodCall};
use sesame_core::config::{AlgorithmPreference, ConfigBuilder};
use sesame_core::Config;
use sesame_integration_tests::{attributes, Harness};

#[tokio::test]
async fn test_encrypted_get_and_set() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let service = h.connect(Config::default(), ServiceFlags::OPEN_SESSION).await?;
    assert_eq!(service.session_algorithms(), Some(Algorithm::DhAes));

    let item = Item::new(&service, path.clone()).await?;
    assert_eq!(item.get_secret().await?.get_text(), Some("hunter2"));

    item.set_secret(&SecretValue::text("correct horse")).await?;
    assert_eq!(h.mock.item_secret(&path), Some(b"correct horse".to_vec()));
    assert_eq!(item.get_secret().await?.get_text(), Some("correct horse"));
    Ok(())
}

#[tokio::test]
async fn test_plain_get_and_set() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let config = ConfigBuilder::new().algorithm(AlgorithmPreference::Plain).build();
    let service = h.connect(config, ServiceFlags::NONE).await?;

    let item = Item::new(&service, path).await?;
    assert_eq!(item.get_secret().await?.get(), b"hunter2");
    assert_eq!(service.session_algorithms(), Some(Algorithm::Plain));
    Ok(())
}

#[tokio::test]
async fn test_falls_back_to_plain() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_aes_supported(false);
    let path = h.add_login("Mail", "alice", "hunter2");
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;

    let item = Item::new(&service, path).await?;
    assert_eq!(item.get_secret().await?.get_text(), Some("hunter2"));
    assert_eq!(service.session_algorithms(), Some(Algorithm::Plain));
    assert_eq!(h.bus.call_count("OpenSession"), 2);
    Ok(())
}

#[tokio::test]
async fn test_no_fallback_when_encryption_required() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_aes_supported(false);
    let config = ConfigBuilder::new().algorithm(AlgorithmPreference::DhAes).build();
    let service = h.connect(config, ServiceFlags::NONE).await?;

    let err = service.ensure_session().await.unwrap_err();
    assert!(err.as_transport().is_some_and(|e| e.is_not_supported()));
    assert_eq!(service.session_path(), None);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_callers_negotiate_once() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_negotiation_yield(true);
    let first = h.add_login("Mail", "alice", "one");
    let second = h.add_login("Chat", "alice", "two");
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;

    let a = Item::new(&service, first).await?;
    let b = Item::new(&service, second).await?;
    let (one, two) = tokio::join!(a.get_secret(), b.get_secret());

    assert_eq!(one?.get_text(), Some("one"));
    assert_eq!(two?.get_text(), Some("two"));
    assert_eq!(h.bus.call_count("OpenSession"), 1);
    assert_eq!(h.mock.sessions_opened(), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_and_search() -> anyhow::Result<()> {
    let h = Harness::new();
    let service = h.connect(Config::default(), ServiceFlags::LOAD_COLLECTIONS).await?;
    let collections = service.collections().expect("collections loaded");
    let login = collections.first().expect("login collection");

    let item = login
        .create_item(
            "Build token",
            &attributes(&[("service", "ci"), ("user", "bot")]),
            &SecretValue::new(b"\x01\x02\x03".to_vec(), "application/octet-stream"),
            false,
        )
        .await?
        .expect("no prompt needed");

    let (unlocked, locked) = service.search_paths(&attributes(&[("service", "ci")])).await?;
    assert_eq!(unlocked, vec![item.path().clone()]);
    assert!(locked.is_empty());

    let secret = item.get_secret().await?;
    assert_eq!(secret.get(), b"\x01\x02\x03");
    assert_eq!(secret.content_type(), "application/octet-stream");
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_reported() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let item = Item::new(&service, path).await?;

    // Closing the remote session leaves the client holding a stale path
    let session = service.ensure_session().await?;
    h.bus
        .call(MethodCall::new(
            h.mock.bus_name(),
            session.path().clone(),
            sesame::interfaces::SESSION_INTERFACE,
            "Close",
        ))
        .await?;

    match item.get_secret().await {
        Err(SecretError::Transport(e)) => {
            assert_eq!(e.name(), Some("org.freedesktop.Secret.Error.NoSession"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_binary_text_plain_roundtrip() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "old");
    let service = h.connect(Config::default(), ServiceFlags::OPEN_SESSION).await?;
    let item = Item::new(&service, path).await?;

    item.set_secret(&SecretValue::new(vec![0x01, 0x02, 0x03], "text/plain"))
        .await?;
    let back = item.get_secret().await?;
    assert_eq!(back.get(), &[0x01, 0x02, 0x03]);
    assert_eq!(back.content_type(), "text/plain");
    Ok(())
}
