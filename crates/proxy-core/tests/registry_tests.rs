//! Application registry driven by an in-process event source

mod common;

use std::sync::Arc;

use ariproxy_core::ari::{ConnectionState, ManualEventSource, StreamItem};
use ariproxy_core::backend::SessionManager;
use ariproxy_core::errors::ProxyError;
use ariproxy_core::proxy::{ApplicationRegistry, CorrelationKey, ProxyOptions};
use ariproxy_core::transport::{MemoryQueueTransport, QueueTransport};
use common::*;

struct Fixture {
    transport: Arc<MemoryQueueTransport>,
    backend: Arc<SessionManager>,
    events: Arc<ManualEventSource>,
    registry: ApplicationRegistry,
}

fn fixture() -> Fixture {
    let transport = Arc::new(MemoryQueueTransport::new());
    let backend = Arc::new(SessionManager::new(transport.clone(), backend_config(), "srv"));
    let events = Arc::new(ManualEventSource::new());
    let registry = ApplicationRegistry::new(
        backend.clone(),
        MockRestClient::new(),
        events.clone(),
        ProxyOptions::default(),
    );
    Fixture {
        transport,
        backend,
        events,
        registry,
    }
}

#[tokio::test]
async fn test_create_declares_control_queue_and_subscribes() {
    let f = fixture();
    f.registry.create("app1").await.unwrap();

    assert!(f.transport.queue_exists("app1").await.unwrap());
    assert!(f.events.is_subscribed("app1"));
    assert!(f.registry.contains("app1").await);

    let result = f.registry.create("app1").await;
    assert!(matches!(result, Err(ProxyError::ApplicationExists(name)) if name == "app1"));
}

#[tokio::test]
async fn test_events_flow_through_dispatcher() {
    let f = fixture();
    let proxy = f.registry.create("app1").await.unwrap();

    f.events
        .send("app1", StreamItem::ConnectionState(ConnectionState::Connected))
        .await
        .unwrap();
    f.events.send_event("app1", stasis_start("app1", "C1")).await.unwrap();
    f.events.send_event("app1", stasis_start("app1", "C2")).await.unwrap();

    let watched = proxy.clone();
    wait_until(|| watched.stats().dialogues_created == 2).await;

    let summaries = f.registry.list().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "app1");
    assert_eq!(summaries[0].dialogue_count, 2);

    let dialogues = f.registry.dialogues("app1").await.unwrap();
    assert_eq!(dialogues.len(), 2);
    assert!(dialogues[0].created <= dialogues[1].created);
    assert!(dialogues.iter().all(|d| d.application == "app1"));
}

#[tokio::test]
async fn test_remove_keeps_dialogues_open() {
    let f = fixture();
    let proxy = f.registry.create("app1").await.unwrap();
    f.events.send_event("app1", stasis_start("app1", "C1")).await.unwrap();

    let watched = proxy.clone();
    wait_until(|| watched.stats().dialogues_created == 1).await;

    f.registry.remove("app1").await.unwrap();

    assert!(!proxy.is_running());
    assert!(!f.events.is_subscribed("app1"));
    assert!(!f.registry.contains("app1").await);
    assert_eq!(f.backend.active_count(), 1);

    assert!(matches!(
        f.registry.remove("app1").await,
        Err(ProxyError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        f.registry.dialogues("app1").await,
        Err(ProxyError::ApplicationNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_is_sorted() {
    let f = fixture();
    for name in ["zeta", "alpha", "mid"] {
        f.registry.create(name).await.unwrap();
    }

    let names: Vec<String> = f.registry.list().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);

    f.registry.shutdown().await;
    assert!(f.registry.list().await.is_empty());
    assert!(!f.events.is_subscribed("alpha"));
}

#[tokio::test]
async fn test_close_dialogue_drops_keys() {
    let f = fixture();
    let proxy = f.registry.create("app1").await.unwrap();
    f.events.send_event("app1", stasis_start("app1", "C1")).await.unwrap();
    f.events.send_event("app1", stasis_start("app1", "C2")).await.unwrap();

    let watched = proxy.clone();
    wait_until(|| watched.stats().dialogues_created == 2).await;

    let dialogue = proxy
        .correlation()
        .resolve(&CorrelationKey::channel("C1"))
        .expect("dialogue for C1");
    let id = dialogue.id().to_string();

    f.registry.close_dialogue("app1", &id).await.unwrap();

    assert!(dialogue.is_closed());
    assert!(!proxy.correlation().contains_key(&CorrelationKey::channel("C1")));
    assert_eq!(f.backend.active_count(), 1);
    assert_eq!(f.registry.dialogues("app1").await.unwrap().len(), 1);

    let dropped = proxy.stats().events_dropped;
    proxy.handle_event(channel_event("ChannelDtmfReceived", "C1")).await;
    assert_eq!(proxy.stats().events_dropped, dropped + 1);

    assert!(matches!(
        f.registry.close_dialogue("app1", &id).await,
        Err(ProxyError::DialogueNotFound(_))
    ));
    assert!(matches!(
        f.registry.close_dialogue("missing", &id).await,
        Err(ProxyError::ApplicationNotFound(_))
    ));
}
