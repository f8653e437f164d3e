//! Process-lifetime wiring (spec §6 `start`): construct every subsystem from
//! a validated `CellConfig` and run the gateway and the meta-agent loop
//! concurrently until either exits.
//!
//! Grounded on the teacher's binary-entrypoint wiring (`chat` crate's
//! `main.rs`/`run` split): one function builds the full dependency graph,
//! the binary itself stays a thin `clap`-dispatch shell.

use crate::agents::{Agent, AgentMesh, AgentResult, Fence, Intent};
use crate::budget::BudgetLimits;
use crate::capabilities::{CapabilityMarketplace, NoopProvider};
use crate::channel::{
    AdapterConfig, BluebubblesAdapter, ChannelAdapter, DiscordAdapter, GoogleChatAdapter,
    MatrixAdapter, SignalAdapter, SlackAdapter, TeamsAdapter, TelegramAdapter, WebchatAdapter,
    WhatsappAdapter,
};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::col::ColPipeline;
use crate::config::CellConfig;
use crate::error::{CellError, CellResult};
use crate::ethics::EthicsLedger;
use crate::eventbus::EventBus;
use crate::gateway::{self, GatewayState};
use crate::identity::IdentityAllowlist;
use crate::meta_agent::{MetaAgentLoop, MetaAgentMetrics};
use crate::session::{SessionKey, SessionRegistry};
use crate::skills::SkillRegistry;
use crate::types::{AgentDescriptor, AgentStatus, CapabilityTag, Channel, Domain, PolicyProfile};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Bridges the agent mesh's "communicate" capability onto whatever `llm`
/// provider is registered in the marketplace. This is the only agent this
/// core ships by default; everything domain-specific is a capability
/// provider or an admin-registered skill, never a built-in agent (spec §1
/// Non-goals: "bundled domain skills").
struct ConversationAgent {
    capabilities: Arc<CapabilityMarketplace>,
}

#[async_trait]
impl Agent for ConversationAgent {
    fn id(&self) -> &str {
        "conversation"
    }

    async fn handle(&self, intent: Intent, _fence: Fence) -> CellResult<AgentResult> {
        let payload = self
            .capabilities
            .call("llm", "complete", intent.payload)
            .await?;
        Ok(AgentResult { payload })
    }
}

fn register_builtin_agents(mesh: &AgentMesh, capabilities: Arc<CapabilityMarketplace>) {
    let mut caps = BTreeSet::new();
    caps.insert(CapabilityTag::from("communicate"));
    mesh.register(
        Arc::new(ConversationAgent { capabilities }),
        AgentDescriptor {
            id: "conversation".to_string(),
            name: "conversation".to_string(),
            domain: Domain::CatchAll,
            capabilities: caps,
            priority: 1,
            load_factor: 0.0,
            status: AgentStatus::Online,
        },
    );
}

/// Construct every configured channel adapter, skipping (with a warning)
/// any whose credentials aren't present in the environment-derived config.
/// A bare-bones deployment still comes up with at least `Webchat`, which
/// needs no external transport.
fn build_adapters() -> HashMap<Channel, Arc<dyn ChannelAdapter>> {
    let config = AdapterConfig::default();
    let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();

    macro_rules! try_register {
        ($ctor:expr) => {
            match $ctor {
                Ok(adapter) => {
                    let adapter: Arc<dyn ChannelAdapter> = Arc::new(adapter);
                    adapters.insert(adapter.channel(), adapter);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "channel adapter unavailable, skipping");
                }
            }
        };
    }

    try_register!(WebchatAdapter::new(&config));
    try_register!(WhatsappAdapter::new(&config));
    try_register!(TelegramAdapter::new(&config));
    try_register!(SlackAdapter::new(&config));
    try_register!(DiscordAdapter::new(&config));
    try_register!(SignalAdapter::new(&config));
    try_register!(MatrixAdapter::new(&config));
    try_register!(TeamsAdapter::new(&config));
    try_register!(GoogleChatAdapter::new(&config));
    try_register!(BluebubblesAdapter::new(&config));

    adapters
}

/// Build the full dependency graph from `config` and run until the gateway
/// or the meta-agent loop returns (normally only on a fatal startup error;
/// `stop` tears the process down with a signal, not a return from here).
pub async fn run_foreground(config: CellConfig) -> CellResult<()> {
    let state_dir = std::path::PathBuf::from(&config.storage.state_dir);
    std::fs::create_dir_all(&state_dir).map_err(CellError::internal)?;

    let identity = Arc::new(IdentityAllowlist::load(&state_dir).map_err(CellError::internal)?);
    let ledger = Arc::new(
        EthicsLedger::open(&state_dir)
            .map_err(|e| CellError::internal(anyhow::anyhow!(e.to_string())))?,
    );
    let sessions = SessionRegistry::new_with_persistence(state_dir.join("runtime").join("sessions.jsonl"));
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(state_dir.clone()));
    let bus = Arc::new(EventBus::new(
        config.gateway.event_replay_buffer_size,
        config.gateway.missed_heartbeats_before_close,
    ));

    let capabilities = Arc::new(CapabilityMarketplace::new());
    for name in ["llm", "search", "tts", "secrets", "vectors"] {
        capabilities.register(Arc::new(NoopProvider::new(name)));
    }

    let mesh = Arc::new(AgentMesh::new());
    register_builtin_agents(&mesh, capabilities.clone());

    // Registration is static at startup (spec §4.7); this core ships no
    // built-in skills, only the registration/sandbox contract -- admin
    // capability routes register into this same registry at runtime.
    let skills = Arc::new(SkillRegistry::new());
    let idempotency: Arc<dyn crate::col::IdempotencyStore> =
        Arc::new(crate::col::FileIdempotencyStore::new(state_dir.clone()));

    let pipeline = Arc::new(ColPipeline::new(
        sessions.clone(),
        mesh,
        ledger.clone(),
        checkpoints,
        bus.clone(),
        capabilities.clone(),
        skills,
        Some(idempotency),
        state_dir.clone(),
        4,
        BudgetLimits::default(),
    ));

    let adapters = build_adapters();

    let gateway_state = Arc::new(GatewayState::new(
        config.gateway.clone(),
        sessions.clone(),
        pipeline.clone(),
        bus,
        identity,
        ledger,
        capabilities,
        adapters,
        config.allow_local_admin,
        config.admin_tokens.clone(),
    ));

    if !config.meta_agent.enabled {
        return gateway::serve(gateway_state).await;
    }

    let meta_key = SessionKey {
        sovereign_id: "cell0-meta-agent".to_string(),
        domain: Domain::System,
        conversation_key: "meta".to_string(),
    };
    let meta_session = sessions.get_or_create(&meta_key, PolicyProfile::Admin).await;
    let metrics = Arc::new(MetaAgentMetrics::new());
    let meta_loop = MetaAgentLoop::new(config.meta_agent.cron.clone(), pipeline, metrics, meta_session.id);

    tokio::select! {
        res = gateway::serve(gateway_state) => res,
        res = meta_loop.run_forever() => res,
    }
}
