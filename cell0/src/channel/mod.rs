//! Channel Adapter layer (spec §4.1, C7).
//!
//! Every adapter normalizes its native transport into `InboundMessage` and
//! exposes the same four-method contract. Grounded on the teacher's
//! `ChannelAdapterManager`/`ChannelAdapter` split in spirit (manager owns
//! lifecycle + routing, adapter owns transport), adapted to this core's
//! governed-pipeline model: adapters never call agents directly, they only
//! hand `InboundMessage`s to whatever callback the gateway installs.

mod backoff;
mod bluebubbles;
mod discord;
mod dedup;
mod google_chat;
mod matrix;
mod signal;
mod slack;
mod teams;
mod telegram;
mod webchat;
mod whatsapp;

pub use backoff::Backoff;
pub use bluebubbles::BluebubblesAdapter;
pub use dedup::DedupWindow;
pub use discord::DiscordAdapter;
pub use google_chat::GoogleChatAdapter;
pub use matrix::MatrixAdapter;
pub use signal::SignalAdapter;
pub use slack::SlackAdapter;
pub use teams::TeamsAdapter;
pub use telegram::TelegramAdapter;
pub use webchat::WebchatAdapter;
pub use whatsapp::WhatsappAdapter;

use crate::error::CellResult;
use crate::types::{Channel, InboundMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-adapter credentials/endpoints, loaded from `CellConfig` or env. Kept
/// as a loose string map rather than one struct per channel: each adapter
/// only reads the handful of keys its transport needs, and new channels
/// don't require a config-schema migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn get(&self, key: &str) -> CellResult<&str> {
        self.fields
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| crate::error::CellError::ChannelStartup(format!("missing '{key}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub channel: Channel,
    pub health: AdapterHealth,
    pub last_error: Option<String>,
}

/// Callback invoked per normalized inbound message. Returns a future the
/// adapter must await before proceeding to the next message: the gateway's
/// implementation of this callback only resolves once the message has been
/// durably appended to its session log, so an adapter that awaits it before
/// acknowledging/advancing its transport offset never loses a message to a
/// crash between receipt and durable append (spec §4.2 crash-safety).
pub type InboundCallback =
    Arc<dyn Fn(InboundMessage) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

/// The contract every channel adapter fulfills (spec §4.1).
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Acquire the inbound transport. Fails with `ChannelStartup` if
    /// credentials/pairing are missing.
    async fn start(&self, on_inbound: InboundCallback) -> CellResult<()>;

    /// Enqueue outbound content; at-least-once delivery or `ChannelSendFailed`
    /// after the adapter's retry budget is exhausted.
    async fn send(&self, conversation_key: &str, content: &str) -> CellResult<()>;

    async fn status(&self) -> AdapterStatus;

    async fn stop(&self) -> CellResult<()>;
}
