//! Password storage by attributes against the mock service.

use sesame::mock::PromptBehavior;
use sesame::password::{self, AttributeType, Schema, SchemaFlags, SCHEMA_ATTRIBUTE};
use sesame::{Service, ServiceFlags};
use sesame_core::Config;
use sesame_integration_tests::{attributes, Harness};
use std::thread;

fn network_schema() -> Schema {
    Schema::new(
        "org.example.Network",
        SchemaFlags::NONE,
        [
            ("server", AttributeType::String),
            ("port", AttributeType::Integer),
            ("secure", AttributeType::Boolean),
        ],
    )
}

#[tokio::test]
async fn test_store_lookup_remove() -> anyhow::Result<()> {
    let h = Harness::new();
    let service = h.connect(Config::default(), ServiceFlags::OPEN_SESSION).await?;
    let schema = network_schema();
    let attrs = attributes(&[("server", "imap.example.com"), ("port", "993"), ("secure", "true")]);

    assert!(password::store(&service, &schema, &attrs, None, "Mail server", "p4ss").await?);
    let item = h.mock.property(&h.login, "Items").expect("items listed");
    assert_eq!(item.as_paths().map(|p| p.len()), Some(1));

    let found = password::lookup(&service, &schema, &attributes(&[("server", "imap.example.com")])).await?;
    assert_eq!(found.as_deref(), Some("p4ss"));

    assert!(password::remove(&service, &schema, &attrs).await?);
    assert_eq!(password::lookup(&service, &schema, &attrs).await?, None);
    assert!(!password::remove(&service, &schema, &attrs).await?);
    Ok(())
}

#[tokio::test]
async fn test_unrelated_items_are_not_matched() -> anyhow::Result<()> {
    let h = Harness::new();
    h.add_login("Mail", "alice", "hunter2");
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;

    let loose = Schema::new("org.example.Login", SchemaFlags::ALLOW_UNDEFINED, []);
    assert_eq!(password::lookup(&service, &loose, &attributes(&[("user", "alice")])).await?, None);

    let unnamed = Schema::new(
        "org.example.Login",
        SchemaFlags::ALLOW_UNDEFINED | SchemaFlags::DONT_MATCH_NAME,
        [],
    );
    let found = password::lookup(&service, &unnamed, &attributes(&[("user", "alice")])).await?;
    assert_eq!(found.as_deref(), Some("hunter2"));
    Ok(())
}

#[tokio::test]
async fn test_dismissed_delete_keeps_password() -> anyhow::Result<()> {
    let h = Harness::new();
    h.mock.add_item(
        &h.login,
        "Router",
        &[(SCHEMA_ATTRIBUTE, "org.example.Network"), ("server", "router.lan")],
        b"admin",
        "text/plain",
    );
    h.mock.set_prompts_required(true);
    h.mock.set_prompt_behavior(PromptBehavior::Dismiss);
    let service = h.connect(Config::default(), ServiceFlags::NONE).await?;
    let schema = network_schema();
    let attrs = attributes(&[("server", "router.lan")]);

    assert!(!password::remove(&service, &schema, &attrs).await?);
    assert_eq!(password::lookup(&service, &schema, &attrs).await?.as_deref(), Some("admin"));
    Ok(())
}

#[test]
fn test_blocking_from_threads() -> anyhow::Result<()> {
    let h = Harness::new();
    let service = Service::new_sync(h.bus(), Config::default(), ServiceFlags::NONE)?;

    let handles: Vec<_> = (0..4)
        .map(|port| {
            let service = service.clone();
            thread::spawn(move || {
                let schema = network_schema();
                let attrs = attributes(&[("server", "db.lan"), ("port", &port.to_string())]);
                let secret = format!("secret-{}", port);
                password::store_sync(&service, &schema, &attrs, None, "Database", &secret)?;
                password::lookup_sync(&service, &schema, &attrs)
            })
        })
        .collect();

    for (port, handle) in handles.into_iter().enumerate() {
        let found = handle.join().expect("thread panicked")?;
        assert_eq!(found, Some(format!("secret-{}", port)));
    }
    Ok(())
}
