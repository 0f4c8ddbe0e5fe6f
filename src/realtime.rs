//! Live event fan-out to connected operator consoles.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::ports::LiveBus;

pub fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

#[derive(Default)]
pub struct RealtimeHub {
    clients: Mutex<HashMap<usize, mpsc::UnboundedSender<String>>>,
    next_client_id: AtomicUsize,
}

impl RealtimeHub {
    /// Adds a client and returns its id with the stream of frames to forward.
    pub async fn register(&self) -> (usize, mpsc::UnboundedReceiver<String>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.clients.lock().await.insert(client_id, tx);
        (client_id, rx)
    }

    pub async fn unregister(&self, client_id: usize) {
        self.clients.lock().await.remove(&client_id);
    }

    pub async fn emit_to_client<T: Serialize>(&self, client_id: usize, event: &str, data: T) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let tx = self.clients.lock().await.get(&client_id).cloned();
        if let Some(sender) = tx {
            let _ = sender.send(payload);
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

#[async_trait]
impl LiveBus for RealtimeHub {
    async fn publish(&self, event: &str, payload: Value) {
        let Some(frame) = event_payload(event, payload) else {
            return;
        };
        let mut clients = self.clients.lock().await;
        clients.retain(|_, sender| sender.send(frame.clone()).is_ok());
        debug!(event, clients = clients.len(), "live event published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_every_client() {
        let hub = RealtimeHub::default();
        let (_, mut first) = hub.register().await;
        let (_, mut second) = hub.register().await;

        hub.publish("chats:updated", json!({ "recipient": "521" }))
            .await;

        for rx in [&mut first, &mut second] {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["event"], "chats:updated");
            assert_eq!(frame["data"]["recipient"], "521");
        }
    }

    #[tokio::test]
    async fn closed_clients_are_pruned() {
        let hub = RealtimeHub::default();
        let (_, rx) = hub.register().await;
        let (kept, _kept_rx) = hub.register().await;
        drop(rx);

        hub.publish("message:new", json!({})).await;
        assert_eq!(hub.client_count().await, 1);

        hub.unregister(kept).await;
        assert_eq!(hub.client_count().await, 0);
    }
}
