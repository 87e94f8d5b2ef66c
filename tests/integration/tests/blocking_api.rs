//! Blocking variants driven from plain threads.

use sesame::{registry, sync, Item, SecretError, SecretValue, Service, ServiceFlags};
use sesame_core::Config;
use sesame_integration_tests::{attributes, Harness};
use std::sync::Arc;
use std::thread;

#[test]
fn test_blocking_roundtrip() -> anyhow::Result<()> {
    let h = Harness::new();
    let path = h.add_login("Mail", "alice", "hunter2");
    let service = Service::new_sync(h.bus(), Config::default(), ServiceFlags::OPEN_SESSION)?;

    let item = Item::new_sync(&service, path.clone())?;
    assert_eq!(item.get_secret_sync()?.get_text(), Some("hunter2"));
    item.set_secret_sync(&SecretValue::text("swordfish"))?;
    assert_eq!(h.mock.item_secret(&path), Some(b"swordfish".to_vec()));

    let (unlocked, _) = service.search_paths_sync(&attributes(&[("user", "alice")]))?;
    assert_eq!(unlocked, vec![path]);
    Ok(())
}

#[test]
fn test_threads_negotiate_once() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_negotiation_yield(true);
    let service = Service::new_sync(h.bus(), Config::default(), ServiceFlags::NONE)?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.ensure_session_sync())
        })
        .collect();

    let mut paths = Vec::new();
    for handle in handles {
        let session = handle.join().expect("thread panicked")?;
        paths.push(session.path().clone());
    }

    assert!(paths.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.bus.call_count("OpenSession"), 1);
    Ok(())
}

#[test]
fn test_blocking_prompt_and_collections() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.set_prompts_required(true);
    let service = Service::new_sync(h.bus(), Config::default(), ServiceFlags::LOAD_COLLECTIONS)?;

    let created = service
        .create_collection_sync("Work", None)?
        .expect("prompt accepted");
    assert_eq!(created.label().as_deref(), Some("Work"));
    assert_eq!(service.collections().map(|c| c.len()), Some(2));

    let locked = service.lock_sync(&[created.path().clone()])?;
    assert_eq!(locked, vec![created.path().clone()]);
    created.refresh_sync()?;
    assert!(created.locked());
    Ok(())
}

#[test]
fn test_registry_blocking() -> anyhow::Result<()> {
    registry::clear();
    let h = Harness::new();
    let first = registry::get_sync(h.bus(), ServiceFlags::NONE)?;
    let second = registry::get_sync(h.bus(), ServiceFlags::OPEN_SESSION)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.session_path().is_some());
    registry::clear();
    Ok(())
}

#[tokio::test]
async fn test_blocking_inside_runtime_is_refused() {
    assert!(matches!(
        sync::block_on(async { 1 }),
        Err(SecretError::Runtime(_))
    ));
}
