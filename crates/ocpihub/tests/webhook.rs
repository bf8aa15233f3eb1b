use std::sync::Arc;

use ocpihub_testing::{MemoryStore, RecordingTransport};
use serde_json::json;

use ocpihub::model::Webhook;
use ocpihub::store::HubStore;
use ocpihub::webhook::WebhookDispatcher;

fn hook(id: &str, url: &str, events: &[&str]) -> Webhook {
    Webhook {
        id: id.into(),
        api_key: format!("key-{id}"),
        events: events.iter().map(|e| e.to_string()).collect(),
        url: url.into(),
    }
}

fn setup() -> (MemoryStore, Arc<RecordingTransport>, WebhookDispatcher) {
    let store = MemoryStore::new();
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = WebhookDispatcher::new(
        Arc::new(store.clone()),
        Arc::clone(&transport) as Arc<dyn ocpihub::webhook::WebhookTransport>,
    );
    (store, transport, dispatcher)
}

#[tokio::test]
async fn delivers_only_to_matching_subscriptions() {
    let (store, transport, dispatcher) = setup();
    store
        .upsert_webhook(&hook("a", "http://a.example", &["location.updated"]))
        .await
        .unwrap();
    store
        .upsert_webhook(&hook("b", "http://b.example", &["session.updated"]))
        .await
        .unwrap();

    dispatcher
        .notify("location.updated", json!({"id": "loc-1"}))
        .await;
    transport.wait_for_calls(1).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "http://a.example");
    assert_eq!(calls[0].api_key, "key-a");
    assert_eq!(calls[0].event, "location.updated");
    assert_eq!(calls[0].payload, json!({"id": "loc-1"}));
}

#[tokio::test]
async fn one_failing_endpoint_does_not_affect_the_others() {
    let (store, transport, dispatcher) = setup();
    store
        .upsert_webhook(&hook("a", "http://a.example", &["session.updated"]))
        .await
        .unwrap();
    store
        .upsert_webhook(&hook("b", "http://b.example", &["session.updated"]))
        .await
        .unwrap();
    transport.fail_url("http://a.example");

    dispatcher.notify("session.updated", json!({"id": "s-1"})).await;
    transport.wait_for_calls(2).await;

    let mut urls: Vec<String> = transport.calls().into_iter().map(|c| c.url).collect();
    urls.sort();
    assert_eq!(urls, vec!["http://a.example", "http://b.example"]);
}

#[tokio::test]
async fn event_matching_is_exact() {
    let (store, transport, dispatcher) = setup();
    store
        .upsert_webhook(&hook("a", "http://a.example", &["location.updated"]))
        .await
        .unwrap();

    dispatcher.notify("location", json!({})).await;
    dispatcher.notify("location.updated.extra", json!({})).await;
    tokio::task::yield_now().await;

    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn lookup_failure_is_absorbed() {
    let (store, transport, dispatcher) = setup();
    store
        .upsert_webhook(&hook("a", "http://a.example", &["session.updated"]))
        .await
        .unwrap();
    store.fail_on("webhook.search");

    // Must return normally; eventing is best-effort.
    dispatcher.notify("session.updated", json!({})).await;
    tokio::task::yield_now().await;

    assert!(transport.calls().is_empty());
}
