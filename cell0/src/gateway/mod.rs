//! Gateway (spec §4.2, C8): binds HTTP, serves the SPA and the `/events`
//! WebSocket, resolves `InboundMessage -> Session`, exposes typed RPC to the
//! portal and channel adapters, and enforces request authentication.
//!
//! Grounded on the teacher's `chat/gateway.rs` `ChatGateway::start`: build a
//! state struct, wire the capability marketplace and session registry,
//! construct an `axum::Router`, bind, serve. This core additionally owns the
//! channel adapters and routes every inbound message through the COL
//! pipeline rather than directly to a run store.

mod auth;
mod routes;
mod ws;

pub use auth::AuthContext;

use crate::capabilities::CapabilityMarketplace;
use crate::channel::ChannelAdapter;
use crate::col::{ColPipeline, IntentRequest};
use crate::config::GatewayConfig;
use crate::error::{CellError, CellResult};
use crate::ethics::{self, ActionProposal, EthicsLedger};
use crate::eventbus::{Event, EventBus, EventKind};
use crate::identity::IdentityAllowlist;
use crate::session::{SessionKey, SessionRegistry};
use crate::types::{CapabilityTag, Channel, Content, Domain, EthicsRecord, InboundMessage, Role};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub sessions: SessionRegistry,
    pub pipeline: Arc<ColPipeline>,
    pub bus: Arc<EventBus>,
    pub identity: Arc<IdentityAllowlist>,
    pub ledger: Arc<EthicsLedger>,
    pub capabilities: Arc<CapabilityMarketplace>,
    pub adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    pub allow_local_admin: bool,
    pub admin_tokens: Vec<String>,
    bound_port: AtomicU16,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        sessions: SessionRegistry,
        pipeline: Arc<ColPipeline>,
        bus: Arc<EventBus>,
        identity: Arc<IdentityAllowlist>,
        ledger: Arc<EthicsLedger>,
        capabilities: Arc<CapabilityMarketplace>,
        adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
        allow_local_admin: bool,
        admin_tokens: Vec<String>,
    ) -> Self {
        Self {
            config,
            sessions,
            pipeline,
            bus,
            identity,
            ledger,
            capabilities,
            adapters,
            allow_local_admin,
            admin_tokens,
            bound_port: AtomicU16::new(0),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }
}

/// Scan `start..=end` for the first port this process can bind (spec §4.2:
/// "if taken, scan upward through the range").
pub async fn bind_with_scan(host: &str, start: u16, end: u16) -> CellResult<(TcpListener, u16)> {
    for port in start..=end {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| CellError::Validation(format!("invalid bind address: {e}")))?;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(_) => continue,
        }
    }
    Err(CellError::ChannelStartup(format!(
        "no free port in {start}..={end}"
    )))
}

fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/system/health", axum::routing::get(routes::healthz))
        .route("/api/system/status", axum::routing::get(routes::status))
        .route("/events", axum::routing::get(ws::events_ws))
        .route("/api/rpc/send", axum::routing::post(routes::rpc_send))
        .route(
            "/api/rpc/get_secret",
            axum::routing::post(routes::rpc_get_secret),
        )
        .route("/api/rpc/search", axum::routing::post(routes::rpc_search))
        .route(
            "/api/chat/messages",
            axum::routing::post(routes::post_message),
        )
        .route("/webhook/:channel", axum::routing::post(routes::webhook))
        .nest_service("/", tower_http::services::ServeDir::new("portal/dist"))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_layer,
        ))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind, start every configured channel adapter, and serve until the process
/// stops. Failure semantics (spec §4.2): the callback handed to each adapter
/// awaits `handle_inbound` to completion -- including the session-log append
/// -- before returning, so an adapter must not ack/advance its transport
/// offset until that await resolves.
pub async fn serve(state: Arc<GatewayState>) -> CellResult<()> {
    let (listener, port) = bind_with_scan(
        &state.config.host,
        state.config.port_range_start,
        state.config.port_range_end,
    )
    .await?;
    state.bound_port.store(port, Ordering::SeqCst);
    tracing::info!(port, "gateway bound");

    for (channel, adapter) in state.adapters.clone() {
        let state_for_cb = state.clone();
        let callback: crate::channel::InboundCallback = Arc::new(move |msg: InboundMessage| {
            let state = state_for_cb.clone();
            Box::pin(async move {
                if let Err(e) = handle_inbound(state, msg).await {
                    tracing::warn!(error = %e, "inbound message handling failed");
                }
            })
        });
        if let Err(e) = adapter.start(callback).await {
            tracing::error!(channel = %channel, error = %e, "channel adapter failed to start");
        }
    }

    let flush_state = state.clone();
    let flush_interval = std::time::Duration::from_millis(state.config.flush_interval_ms);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(flush_interval);
        loop {
            tick.tick().await;
            flush_state.sessions.flush_all().await;
        }
    });

    let heartbeat_state = state.clone();
    let heartbeat_interval = std::time::Duration::from_millis(state.config.heartbeat_interval_ms);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(heartbeat_interval);
        loop {
            tick.tick().await;
            heartbeat_state
                .bus
                .publish(Event::new(EventKind::Heartbeat, serde_json::json!({})));
        }
    });

    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(CellError::internal)?;
    Ok(())
}

/// Deterministic keyword-based domain bootstrap for a brand-new session
/// (spec §4.2 step 2: classify the domain on the first message of a new
/// key). Distinct from `col::classify`, which assigns an `IntentType`
/// *within* an already-known domain; this assigns the domain itself, once,
/// before the session exists.
fn classify_domain(text: &str) -> Domain {
    let lowered = text.to_lowercase();
    const KEYWORDS: &[(&str, Domain)] = &[
        ("invoice", Domain::Finance),
        ("payment", Domain::Finance),
        ("bank", Domain::Finance),
        ("doctor", Domain::Health),
        ("symptom", Domain::Health),
        ("medication", Domain::Health),
        ("message", Domain::Communication),
        ("email", Domain::Communication),
        ("schedule", Domain::Scheduling),
        ("calendar", Domain::Scheduling),
        ("research", Domain::Research),
        ("paper", Domain::Research),
        ("deploy", Domain::Development),
        ("code", Domain::Development),
        ("contract", Domain::Legal),
        ("legal", Domain::Legal),
        ("flight", Domain::Travel),
        ("hotel", Domain::Travel),
        ("thermostat", Domain::Household),
        ("household", Domain::Household),
        ("learn", Domain::Learning),
        ("course", Domain::Learning),
        ("password", Domain::Security),
        ("security", Domain::Security),
    ];
    KEYWORDS
        .iter()
        .find(|(kw, _)| lowered.contains(kw))
        .map(|(_, domain)| *domain)
        .unwrap_or(Domain::CatchAll)
}

/// Resolve an inbound message to a session and run it through COL end to end
/// (spec §4.2 steps 1-3, §4.4).
pub async fn handle_inbound(state: Arc<GatewayState>, msg: InboundMessage) -> CellResult<()> {
    let Some(identity) = state.identity.resolve(msg.channel, &msg.sender) else {
        record_unknown_sovereign(&state, &msg).await;
        return Err(CellError::Unauthorized);
    };

    let key = SessionKey {
        sovereign_id: identity.sovereign_id.clone(),
        domain: classify_domain(&msg.content.text),
        conversation_key: msg.conversation_key.clone(),
    };
    let session = state
        .sessions
        .get_or_create(&key, identity.policy_profile)
        .await;

    state
        .sessions
        .mutate(&session.id, |s| {
            s.push_log(Role::User, msg.content.text.clone());
        })
        .await;

    let request = IntentRequest {
        session_id: session.id.clone(),
        sovereign_id: identity.sovereign_id.clone(),
        sovereign_known: true,
        domain: session.domain,
        canonicalized_text: msg.canonicalized_text(),
        proposed_action: msg.content.text.clone(),
        capability: CapabilityTag::from("communicate"),
        payload: serde_json::json!({"text": msg.content.text, "channel": msg.channel}),
        actor_agent_id: "gateway".to_string(),
        admin_bypass: false,
        estimated_tokens: (msg.content.text.len() / 4 + 1) as u64,
    };

    match state.pipeline.run(request).await {
        Ok(result) => {
            if let Some(adapter) = state.adapters.get(&msg.channel) {
                let reply = result
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if !reply.is_empty() {
                    let _ = adapter.send(&msg.conversation_key, reply).await;
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, session_id = %session.id, "COL pipeline rejected inbound message");
            Err(e)
        }
    }
}

async fn record_unknown_sovereign(state: &GatewayState, msg: &InboundMessage) {
    let proposal = ActionProposal {
        operation_id: format!("unknown-sovereign-{}", msg.channel_message_id),
        actor_agent_id: "gateway".to_string(),
        sovereign_known: false,
        action_text: format!("inbound message from unallowlisted sender {}", msg.sender),
        destructive: false,
        admin_bypass: false,
    };
    let (rule_decisions, decision, reason) = ethics::evaluate(&proposal);
    let record = EthicsRecord {
        ts: chrono::Utc::now(),
        operation_id: proposal.operation_id.clone(),
        actor_agent_id: proposal.actor_agent_id.clone(),
        proposed_action: proposal.action_text.clone(),
        rule_decisions,
        decision,
        reason,
    };
    let _ = state.ledger.append(&record).await;
}

/// Normalize a bare text message into a full `InboundMessage` (used by the
/// webchat/portal routes, which have no adapter-native envelope).
pub(crate) fn synthesize_inbound(
    channel: Channel,
    sender: String,
    conversation_key: String,
    text: String,
) -> InboundMessage {
    InboundMessage {
        channel,
        channel_message_id: format!("{channel}-{}", uuid::Uuid::new_v4()),
        sender,
        conversation_key,
        content: Content {
            text,
            attachments: Vec::new(),
        },
        received_at: chrono::Utc::now(),
        raw: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentMesh};
    use crate::budget::BudgetLimits;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::types::{AgentDescriptor, AgentStatus, PolicyProfile};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn classify_domain_matches_known_keywords() {
        assert_eq!(classify_domain("please pay this invoice"), Domain::Finance);
        assert_eq!(classify_domain("book a flight to rome"), Domain::Travel);
        assert_eq!(classify_domain("no keyword here at all"), Domain::CatchAll);
    }

    #[tokio::test]
    async fn bind_with_scan_finds_a_free_port() {
        let (_listener, port) = bind_with_scan("127.0.0.1", 18789, 18799).await.unwrap();
        assert!((18789..=18799).contains(&port));
    }

    #[tokio::test]
    async fn bind_with_scan_skips_an_already_bound_port() {
        let held = tokio::net::TcpListener::bind("127.0.0.1:18791").await.unwrap();
        let (_listener, port) = bind_with_scan("127.0.0.1", 18791, 18799).await.unwrap();
        assert_ne!(port, 18791);
        drop(held);
    }

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn id(&self) -> &str {
            "echo"
        }

        async fn handle(
            &self,
            _intent: crate::agents::Intent,
            _fence: crate::agents::Fence,
        ) -> CellResult<crate::agents::AgentResult> {
            Ok(crate::agents::AgentResult {
                payload: serde_json::json!({"text": "ack"}),
            })
        }
    }

    struct RecordingAdapter {
        sent: AsyncMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel(&self) -> Channel {
            Channel::Webchat
        }

        async fn start(&self, _on_inbound: crate::channel::InboundCallback) -> CellResult<()> {
            Ok(())
        }

        async fn send(&self, conversation_key: &str, content: &str) -> CellResult<()> {
            self.sent
                .lock()
                .await
                .push((conversation_key.to_string(), content.to_string()));
            Ok(())
        }

        async fn status(&self) -> crate::channel::AdapterStatus {
            crate::channel::AdapterStatus {
                channel: Channel::Webchat,
                health: crate::channel::AdapterHealth::Online,
                last_error: None,
            }
        }

        async fn stop(&self) -> CellResult<()> {
            Ok(())
        }
    }

    fn build_state() -> Arc<GatewayState> {
        let mesh = Arc::new(AgentMesh::new());
        let mut caps = BTreeSet::new();
        caps.insert(CapabilityTag::from("communicate"));
        mesh.register(
            Arc::new(EchoAgent),
            AgentDescriptor {
                id: "echo".into(),
                name: "echo".into(),
                domain: Domain::CatchAll,
                capabilities: caps,
                priority: 1,
                load_factor: 0.0,
                status: AgentStatus::Online,
            },
        );

        let (ledger, _tmp) = EthicsLedger::in_memory_for_tests().unwrap();
        let ledger = Arc::new(ledger);
        let sessions = SessionRegistry::new();
        let bus = Arc::new(EventBus::new(10, 3));
        let capabilities = Arc::new(CapabilityMarketplace::new());
        let checkpoints: Arc<dyn crate::checkpoint::CheckpointStore> =
            Arc::new(InMemoryCheckpointStore::new());

        let pipeline = Arc::new(ColPipeline::new(
            sessions.clone(),
            mesh,
            ledger.clone(),
            checkpoints,
            bus.clone(),
            capabilities.clone(),
            Arc::new(crate::skills::SkillRegistry::new()),
            None,
            std::env::temp_dir().join("cell0-gateway-test-state"),
            4,
            BudgetLimits { tokens: 100_000 },
        ));

        let identity = IdentityAllowlist::empty();
        let _ = identity.upsert(crate::identity::IdentityEntry {
            sovereign_id: "sov-1".into(),
            channel: Channel::Webchat,
            sender: "user-1".into(),
            policy_profile: PolicyProfile::Standard,
        });

        let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(
            Channel::Webchat,
            Arc::new(RecordingAdapter {
                sent: AsyncMutex::new(Vec::new()),
            }),
        );

        Arc::new(GatewayState::new(
            GatewayConfig::default(),
            sessions,
            pipeline,
            bus,
            Arc::new(identity),
            ledger,
            capabilities,
            adapters,
            false,
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn handle_inbound_rejects_unallowlisted_sender() {
        let state = build_state();
        let msg = synthesize_inbound(
            Channel::Webchat,
            "unknown-sender".into(),
            "conv-1".into(),
            "hello".into(),
        );
        let err = handle_inbound(state, msg).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn handle_inbound_routes_known_sender_through_col() {
        let state = build_state();
        let msg = synthesize_inbound(
            Channel::Webchat,
            "user-1".into(),
            "conv-1".into(),
            "hello there".into(),
        );
        handle_inbound(state, msg).await.unwrap();
    }
}
