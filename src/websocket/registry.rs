use super::{ConnectionInfo, WebSocketRequest};
use crate::metrics::metrics;
use dashmap::DashMap;
use tokio::sync::mpsc;

pub const DEFAULT_SEND_QUEUE: usize = 256;

/// Frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

#[derive(Clone, Debug)]
pub struct ActiveWebSocketConnection {
    pub info: ConnectionInfo,
    /// False while an `on_connect` hook still has to see the first client message.
    pub initialized: bool,
    pub save_last_request: bool,
    pub last_request: Option<WebSocketRequest>,
    sender: mpsc::Sender<OutboundFrame>,
}

/// Live client connections keyed by connection id.
pub struct ConnectionRegistry {
    connections: DashMap<String, ActiveWebSocketConnection>,
    max_send_queue: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE)
    }
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Registers a connection and returns the receiving end of its outbound queue.
    pub fn register(
        &self,
        info: ConnectionInfo,
        initialized: bool,
        save_last_request: bool,
    ) -> mpsc::Receiver<OutboundFrame> {
        let (sender, receiver) = mpsc::channel(self.max_send_queue);
        let id = info.id.clone();
        let connection = ActiveWebSocketConnection {
            info,
            initialized,
            save_last_request,
            last_request: None,
            sender,
        };
        if self.connections.insert(id, connection).is_none() {
            metrics().websocket_opened();
        }
        receiver
    }

    pub fn remove(&self, id: &str) -> Option<ActiveWebSocketConnection> {
        let removed = self.connections.remove(id).map(|(_, connection)| connection);
        if removed.is_some() {
            metrics().websocket_closed();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<ActiveWebSocketConnection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Returns true only for the call that flipped the flag.
    pub fn mark_initialized(&self, id: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(mut entry) if !entry.initialized => {
                entry.initialized = true;
                true
            }
            _ => false,
        }
    }

    /// Stores the request when the connection's route asks for it.
    pub fn save_last_request(&self, id: &str, request: &WebSocketRequest) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            if entry.save_last_request {
                entry.last_request = Some(request.clone());
            }
        }
    }

    pub fn last_request(&self, id: &str) -> Option<WebSocketRequest> {
        self.connections
            .get(id)
            .and_then(|entry| entry.last_request.clone())
    }

    /// Queues a text frame. Returns false when the connection is gone or its queue is full.
    pub fn send(&self, id: &str, text: impl Into<String>) -> bool {
        self.enqueue(id, OutboundFrame::Text(text.into()))
    }

    /// Asks the socket writer to close the connection; the socket loop removes the entry.
    pub fn close(&self, id: &str) -> bool {
        self.enqueue(id, OutboundFrame::Close)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn enqueue(&self, id: &str, frame: OutboundFrame) -> bool {
        let Some(sender) = self.connections.get(id).map(|entry| entry.sender.clone()) else {
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    target: "retransmit::websocket",
                    event = "send_queue_full",
                    connection = %id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> ConnectionInfo {
        ConnectionInfo {
            id: id.to_string(),
            route: "/feed".to_string(),
            path: "/feed".to_string(),
            remote_address: None,
            remote_port: None,
        }
    }

    #[tokio::test]
    async fn send_reaches_the_outbound_queue() {
        let registry = ConnectionRegistry::new(4);
        let mut outbound = registry.register(info("one"), true, false);

        assert!(registry.send("one", "hello"));
        assert!(registry.close("one"));
        assert!(!registry.send("missing", "hello"));

        assert_eq!(outbound.recv().await, Some(OutboundFrame::Text("hello".into())));
        assert_eq!(outbound.recv().await, Some(OutboundFrame::Close));
    }

    #[test]
    fn initialization_flips_once() {
        let registry = ConnectionRegistry::default();
        let _outbound = registry.register(info("one"), false, false);

        assert!(registry.mark_initialized("one"));
        assert!(!registry.mark_initialized("one"));
        assert!(registry.get("one").is_some_and(|conn| conn.initialized));
    }

    #[test]
    fn last_request_is_kept_only_when_enabled() {
        let registry = ConnectionRegistry::default();
        let _saving = registry.register(info("saving"), true, true);
        let _plain = registry.register(info("plain"), true, false);

        let request = WebSocketRequest::message(info("saving"), "hi");
        registry.save_last_request("saving", &request);
        registry.save_last_request("plain", &request);

        assert_eq!(registry.last_request("saving"), Some(request));
        assert_eq!(registry.last_request("plain"), None);

        assert!(registry.remove("saving").is_some());
        assert_eq!(registry.len(), 1);
    }
}
