//! Cross-module integration tests for the full `ColPipeline::run` path
//! (spec §8 testable properties), exercising STOP -> CLASSIFY -> LOAD ->
//! APPLY -> EXECUTE together rather than each phase's already-covered unit
//! behavior in isolation.

use cell0::agents::{Agent, AgentMesh, AgentResult, Fence, Intent};
use cell0::budget::BudgetLimits;
use cell0::capabilities::CapabilityMarketplace;
use cell0::checkpoint::InMemoryCheckpointStore;
use cell0::col::{ColPipeline, IntentRequest};
use cell0::error::CellError;
use cell0::ethics::EthicsLedger;
use cell0::eventbus::EventBus;
use cell0::session::{SessionKey, SessionRegistry};
use cell0::types::{AgentDescriptor, AgentStatus, CapabilityTag, Domain, PolicyProfile};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        "echo"
    }

    async fn handle(&self, intent: Intent, _fence: Fence) -> cell0::error::CellResult<AgentResult> {
        Ok(AgentResult { payload: intent.payload })
    }
}

async fn build_pipeline() -> (Arc<ColPipeline>, SessionRegistry, String) {
    let sessions = SessionRegistry::new();
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

    let (ledger, _dir) = EthicsLedger::in_memory_for_tests().unwrap();
    let checkpoints: Arc<dyn cell0::checkpoint::CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let bus = Arc::new(EventBus::new(32, 3));
    let capabilities = Arc::new(CapabilityMarketplace::new());

    let pipeline = Arc::new(ColPipeline::new(
        sessions.clone(),
        mesh,
        Arc::new(ledger),
        checkpoints,
        bus,
        capabilities,
        4,
        BudgetLimits { tokens: 10_000 },
    ));

    let key = SessionKey {
        sovereign_id: "sov-1".to_string(),
        domain: Domain::System,
        conversation_key: "conv-1".to_string(),
    };
    let session = sessions.get_or_create(&key, PolicyProfile::Standard).await;

    (pipeline, sessions, session.id)
}

fn base_request(session_id: &str, text: &str) -> IntentRequest {
    IntentRequest {
        session_id: session_id.to_string(),
        sovereign_id: "sov-1".to_string(),
        sovereign_known: true,
        domain: Domain::System,
        canonicalized_text: text.to_string(),
        proposed_action: text.to_string(),
        capability: CapabilityTag::from("communicate"),
        payload: serde_json::json!({"text": text}),
        actor_agent_id: "echo".to_string(),
        admin_bypass: false,
        estimated_tokens: 50,
    }
}

#[tokio::test]
async fn unknown_sender_is_denied_end_to_end() {
    let (pipeline, _sessions, session_id) = build_pipeline().await;
    let mut request = base_request(&session_id, "send message hello");
    request.sovereign_known = false;

    let result = pipeline.run(request).await;
    assert!(matches!(result, Err(CellError::PolicyDenied { .. })));
}

#[tokio::test]
async fn destructive_action_persists_checkpoint_id_on_session() {
    let (pipeline, sessions, session_id) = build_pipeline().await;
    let request = base_request(&session_id, "please delete the stale report");

    let result = pipeline.run(request).await.unwrap();
    assert_eq!(result.payload, serde_json::json!({"text": "please delete the stale report"}));

    let updated = sessions.get(&session_id).await.unwrap();
    assert!(
        updated.last_checkpoint_id.is_some(),
        "a destructive APPLY must leave a checkpoint id on the session"
    );
}

#[tokio::test]
async fn duplicate_in_flight_intents_coalesce_to_one_execution() {
    let (pipeline, _sessions, session_id) = build_pipeline().await;
    let request_a = base_request(&session_id, "send message the weekly update");
    let request_b = base_request(&session_id, "send message the weekly update");

    let pipeline_a = pipeline.clone();
    let pipeline_b = pipeline.clone();
    let (result_a, result_b) = tokio::join!(
        tokio::spawn(async move { pipeline_a.run(request_a).await }),
        tokio::spawn(async move { pipeline_b.run(request_b).await }),
    );

    let a = result_a.unwrap().unwrap();
    let b = result_b.unwrap().unwrap();
    assert_eq!(a.payload, b.payload);
}

#[tokio::test]
async fn run_parallel_preserves_submission_order_in_results() {
    let (pipeline, _sessions, session_id) = build_pipeline().await;
    let requests = vec![
        base_request(&session_id, "read file alpha"),
        base_request(&session_id, "read file beta"),
        base_request(&session_id, "read file gamma"),
    ];

    let results = pipeline.run_parallel(requests).await;
    assert_eq!(results.len(), 3);
    let texts: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().payload["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        texts,
        vec!["read file alpha", "read file beta", "read file gamma"]
    );
}
