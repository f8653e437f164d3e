//! Telegram adapter: long-polls the Bot API's `getUpdates` method (spec
//! §4.1). The only adapter wired to a real transport; every other channel
//! adapter in this crate is a stub pending the same treatment (declared a
//! Non-goal in SPEC_FULL.md §12).

use super::{AdapterConfig, AdapterHealth, AdapterStatus, Backoff, ChannelAdapter, DedupWindow, InboundCallback};
use crate::error::{CellError, CellResult};
use crate::types::{Channel, Content, InboundMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;

struct Inner {
    bot_token: String,
    status: RwLock<AdapterStatus>,
    dedup: DedupWindow,
    backoff: Mutex<Backoff>,
    running: AtomicBool,
    offset: AtomicI64,
    http: reqwest::Client,
}

pub struct TelegramAdapter {
    inner: Arc<Inner>,
}

impl TelegramAdapter {
    pub fn new(config: &AdapterConfig) -> CellResult<Self> {
        let bot_token = config.get("bot_token")?.to_string();
        Ok(Self {
            inner: Arc::new(Inner {
                bot_token,
                status: RwLock::new(AdapterStatus {
                    channel: Channel::Telegram,
                    health: AdapterHealth::Offline,
                    last_error: None,
                }),
                dedup: DedupWindow::new(2_000),
                backoff: Mutex::new(Backoff::new()),
                running: AtomicBool::new(false),
                offset: AtomicI64::new(0),
                http: reqwest::Client::new(),
            }),
        })
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn start(&self, on_inbound: InboundCallback) -> CellResult<()> {
        if self.inner.bot_token.is_empty() {
            return Err(CellError::ChannelStartup("empty bot token".to_string()));
        }
        self.inner.backoff.lock().unwrap().reset();
        self.inner.running.store(true, Ordering::SeqCst);
        {
            let mut status = self.inner.status.write().await;
            status.health = AdapterHealth::Online;
            status.last_error = None;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            poll_loop(inner, on_inbound).await;
        });
        Ok(())
    }

    async fn send(&self, conversation_key: &str, content: &str) -> CellResult<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(CellError::ChannelSendFailed(format!(
                "telegram adapter not started, cannot send to {conversation_key}"
            )));
        }
        let url = format!("{API_BASE}/bot{}/sendMessage", self.inner.bot_token);
        let body = serde_json::json!({"chat_id": conversation_key, "text": content});
        self.inner
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CellError::ChannelSendFailed(e.to_string()))?;
        Ok(())
    }

    async fn status(&self) -> AdapterStatus {
        self.inner.status.read().await.clone()
    }

    async fn stop(&self) -> CellResult<()> {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut status = self.inner.status.write().await;
        status.health = AdapterHealth::Offline;
        Ok(())
    }
}

/// Long-poll `getUpdates`, normalize each message, dedup it against the
/// replay window, and await `on_inbound` before advancing the offset so a
/// crash mid-handling re-delivers the same update on restart.
async fn poll_loop(inner: Arc<Inner>, on_inbound: InboundCallback) {
    while inner.running.load(Ordering::SeqCst) {
        let offset = inner.offset.load(Ordering::SeqCst);
        let url = format!("{API_BASE}/bot{}/getUpdates", inner.bot_token);
        let response = inner
            .http
            .get(&url)
            .query(&[
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await;

        let updates = match response {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => body,
                Err(e) => {
                    mark_degraded(&inner, e.to_string()).await;
                    backoff_sleep(&inner).await;
                    continue;
                }
            },
            Err(e) => {
                mark_degraded(&inner, e.to_string()).await;
                backoff_sleep(&inner).await;
                continue;
            }
        };

        mark_online(&inner).await;

        let Some(results) = updates.get("result").and_then(|v| v.as_array()) else {
            continue;
        };
        for update in results {
            let Some(update_id) = update.get("update_id").and_then(|v| v.as_i64()) else {
                continue;
            };
            inner.offset.store(update_id + 1, Ordering::SeqCst);

            let Some(message) = update.get("message") else {
                continue;
            };
            let Some(message_id) = message.get("message_id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let dedup_key = format!("{update_id}:{message_id}");
            if !inner.dedup.observe(&dedup_key) {
                continue;
            }
            let Some(chat_id) = message
                .get("chat")
                .and_then(|c| c.get("id"))
                .and_then(|v| v.as_i64())
            else {
                continue;
            };
            let sender = message
                .get("from")
                .and_then(|f| f.get("id"))
                .and_then(|v| v.as_i64())
                .map(|id| id.to_string())
                .unwrap_or_else(|| chat_id.to_string());
            let text = message
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let msg = InboundMessage {
                channel: Channel::Telegram,
                channel_message_id: dedup_key,
                sender,
                conversation_key: chat_id.to_string(),
                content: Content {
                    text,
                    attachments: Vec::new(),
                },
                received_at: chrono::Utc::now(),
                raw: update.clone(),
            };
            on_inbound(msg).await;
        }
    }
}

async fn mark_online(inner: &Arc<Inner>) {
    inner.backoff.lock().unwrap().reset();
    let mut status = inner.status.write().await;
    status.health = AdapterHealth::Online;
    status.last_error = None;
}

async fn mark_degraded(inner: &Arc<Inner>, error: String) {
    tracing::warn!(error = %error, "telegram getUpdates failed");
    let mut status = inner.status.write().await;
    status.health = AdapterHealth::Degraded;
    status.last_error = Some(error);
}

async fn backoff_sleep(inner: &Arc<Inner>) {
    let delay = inner.backoff.lock().unwrap().next_delay();
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token() -> AdapterConfig {
        let mut fields = std::collections::HashMap::new();
        fields.insert("bot_token".to_string(), "123:abc".to_string());
        AdapterConfig { fields }
    }

    fn noop_callback() -> InboundCallback {
        Arc::new(|_msg: InboundMessage| Box::pin(async {}))
    }

    #[tokio::test]
    async fn start_succeeds_with_token() {
        let adapter = TelegramAdapter::new(&config_with_token()).unwrap();
        adapter.start(noop_callback()).await.unwrap();
        assert_eq!(adapter.status().await.health, AdapterHealth::Online);
        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn send_before_start_fails() {
        let adapter = TelegramAdapter::new(&config_with_token()).unwrap();
        let result = adapter.send("conv-1", "hi").await;
        assert!(matches!(result, Err(CellError::ChannelSendFailed(_))));
    }

    #[test]
    fn missing_token_is_rejected_at_construction() {
        let config = AdapterConfig::default();
        let result = TelegramAdapter::new(&config);
        assert!(result.is_err());
    }

    #[test]
    fn dedup_rejects_same_update_and_message_id_pair() {
        let dedup = DedupWindow::new(16);
        assert!(dedup.observe("5:100"));
        assert!(!dedup.observe("5:100"));
    }
}
