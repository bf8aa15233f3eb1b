//! Best-effort webhook fan-out.
//!
//! Delivery is at-most-once: no retry, no dead-letter. Each matching
//! endpoint is invoked on its own detached task, so one endpoint's failure
//! or slowness never affects the others and is never surfaced to the
//! caller of [`WebhookDispatcher::notify`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::store::HubStore;

/// Outbound transport. The dispatcher only observes failure for logging.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn call(
        &self,
        url: &str,
        api_key: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

pub struct WebhookDispatcher {
    store: Arc<dyn HubStore>,
    transport: Arc<dyn WebhookTransport>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn HubStore>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self { store, transport }
    }

    /// Fan an event out to every registration subscribed to it.
    ///
    /// Returns once the deliveries are launched; it does not wait for them.
    pub async fn notify(&self, event: &str, payload: serde_json::Value) {
        let hooks = match self.store.webhooks_for_event(event).await {
            Ok(hooks) => hooks,
            Err(err) => {
                error!(event, error = %err, "webhook lookup failed");
                return;
            }
        };
        debug!(event, matches = hooks.len(), "dispatching webhooks");

        for hook in hooks {
            let transport = Arc::clone(&self.transport);
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(err) = transport
                    .call(&hook.url, &hook.api_key, &event, &payload)
                    .await
                {
                    warn!(
                        webhook = %hook.id,
                        url = %hook.url,
                        event,
                        error = %err,
                        "webhook delivery failed"
                    );
                }
            });
        }
    }
}
