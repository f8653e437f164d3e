//! The COL pipeline (spec §4.4, C5): STOP -> CLASSIFY -> LOAD -> APPLY ->
//! EXECUTE. Every inbound intent, whether from a channel adapter or the
//! meta-agent, traverses this pipeline -- there is no privileged bypass.
//!
//! Grounded on the teacher's `governance_kernel.rs` phase-based risk
//! assessment, composed here with this core's own session/budget/ethics/
//! checkpoint/agent-mesh modules. Per-session execution is serialized with
//! one `tokio::Mutex` per session id; across sessions, pipelines run
//! concurrently bounded by a semaphore standing in for the "global worker
//! pool" the spec describes.

mod apply;
mod classify;
mod execute;
mod load;
mod stop;

pub use apply::{apply, ApplyContext, ApplyResult};
pub use classify::{classify, Classification};
pub use execute::{execute, ExecuteContext};
pub use load::{load, LoadResult};
pub use stop::{
    intent_fingerprint, CoalescingRegistry, FileIdempotencyStore, IdempotencyStore,
    IdempotentRecord, InMemoryIdempotencyStore, PersistedOutcome, StopOutcome,
};

use crate::agents::{AgentMesh, AgentResult, RoutingStrategy};
use crate::budget::{BudgetContext, BudgetLimits, ExhaustionPolicy};
use crate::capabilities::CapabilityMarketplace;
use crate::checkpoint::CheckpointStore;
use crate::error::{CellError, CellResult};
use crate::ethics::EthicsLedger;
use crate::eventbus::EventBus;
use crate::session::{Session, SessionRegistry};
use crate::skills::SkillRegistry;
use crate::types::{CapabilityTag, Domain};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Everything one run of the pipeline needs from its caller.
pub struct IntentRequest {
    pub session_id: String,
    pub sovereign_id: String,
    pub sovereign_known: bool,
    pub domain: Domain,
    pub canonicalized_text: String,
    pub proposed_action: String,
    pub capability: CapabilityTag,
    pub payload: serde_json::Value,
    pub actor_agent_id: String,
    pub admin_bypass: bool,
    pub estimated_tokens: u64,
}

pub struct ColPipeline {
    sessions: SessionRegistry,
    mesh: Arc<AgentMesh>,
    ledger: Arc<EthicsLedger>,
    checkpoints: Arc<dyn CheckpointStore>,
    bus: Arc<EventBus>,
    capabilities: Arc<CapabilityMarketplace>,
    skills: Arc<SkillRegistry>,
    /// Root every session's filesystem jail is scoped under:
    /// `state_dir/runtime/sessions/<id>/` (spec §8 scenario 6).
    state_dir: PathBuf,
    coalescing: CoalescingRegistry,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    budgets: DashMap<String, Arc<Mutex<BudgetContext>>>,
    default_budget_limits: BudgetLimits,
    /// Stand-in for the "global worker pool" bounding cross-session
    /// concurrency (spec §4.4 "Ordering & tie-breaks").
    worker_pool: Arc<Semaphore>,
    parallel_child_seq: AtomicU64,
}

impl ColPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: SessionRegistry,
        mesh: Arc<AgentMesh>,
        ledger: Arc<EthicsLedger>,
        checkpoints: Arc<dyn CheckpointStore>,
        bus: Arc<EventBus>,
        capabilities: Arc<CapabilityMarketplace>,
        skills: Arc<SkillRegistry>,
        idempotency: Option<Arc<dyn IdempotencyStore>>,
        state_dir: PathBuf,
        max_concurrent_pipelines: usize,
        default_budget_limits: BudgetLimits,
    ) -> Self {
        let coalescing = match idempotency {
            Some(store) => CoalescingRegistry::with_durable_store(store),
            None => CoalescingRegistry::new(),
        };
        Self {
            sessions,
            mesh,
            ledger,
            checkpoints,
            bus,
            capabilities,
            skills,
            state_dir,
            coalescing,
            session_locks: DashMap::new(),
            budgets: DashMap::new(),
            default_budget_limits,
            worker_pool: Arc::new(Semaphore::new(max_concurrent_pipelines.max(1))),
            parallel_child_seq: AtomicU64::new(0),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run the full STOP -> CLASSIFY -> LOAD -> APPLY -> EXECUTE pipeline for
    /// one intent, serialized against any other intent in the same session.
    pub async fn run(&self, request: IntentRequest) -> CellResult<Arc<AgentResult>> {
        let _permit = self
            .worker_pool
            .acquire()
            .await
            .map_err(CellError::internal)?;

        // STOP
        let fingerprint = intent_fingerprint(
            &request.sovereign_id,
            &format!("{:?}", request.domain),
            &request.canonicalized_text,
        );
        let operation_id = match self.coalescing.stop(&fingerprint).await {
            StopOutcome::Coalesced { mut receiver } => {
                let outcome = receiver.recv().await.map_err(CellError::internal)?;
                return clone_outcome(&*outcome);
            }
            StopOutcome::Replayed {
                operation_id,
                result,
            } => {
                tracing::debug!(operation_id, fingerprint, "replaying durably recorded result");
                return result;
            }
            StopOutcome::Lead { operation_id } => operation_id,
        };

        let result = self.run_owned(&request, &operation_id).await;
        self.coalescing
            .complete(&fingerprint, &operation_id, clone_outcome(&result))
            .await;
        result
    }

    async fn run_owned(
        &self,
        request: &IntentRequest,
        operation_id: &str,
    ) -> CellResult<Arc<AgentResult>> {
        let session_lock = self.lock_for(&request.session_id);
        let _session_guard = session_lock.lock().await;

        let session = self
            .sessions
            .get(&request.session_id)
            .await
            .ok_or_else(|| CellError::NotFound(format!("session {}", request.session_id)))?;

        // CLASSIFY
        let classification = classify(
            &request.canonicalized_text,
            request.domain,
            Some(&*self.capabilities),
            "llm",
        )
        .await;

        // LOAD
        let load_result = load(
            &session,
            classification.intent_type,
            classification.domain,
            4_000,
        );
        if !load_result.policy_notes.is_empty() {
            tracing::debug!(operation_id, notes = ?load_result.policy_notes, "LOAD resolved policy notes");
        }

        // APPLY
        let budget_lock = self
            .budgets
            .entry(request.session_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(BudgetContext::new(
                    self.default_budget_limits,
                    ExhaustionPolicy::HardStop,
                )))
            })
            .clone();
        let mut budget = budget_lock.lock().await;

        let apply_result = apply::apply(
            ApplyContext {
                operation_id,
                actor_agent_id: &request.actor_agent_id,
                proposed_action: &request.proposed_action,
                intent_type: classification.intent_type,
                estimated_tokens: request.estimated_tokens,
                sovereign_known: request.sovereign_known,
                admin_bypass: request.admin_bypass,
            },
            &mut budget,
            &self.ledger,
            &*self.checkpoints,
            &session,
        )
        .await?;

        if !apply_result.executable {
            return Err(CellError::PolicyDenied {
                rule: "apply".to_string(),
                reason: apply_result.reason,
            });
        }

        if let Some(checkpoint_id) = &apply_result.checkpoint_id {
            let checkpoint_id = checkpoint_id.clone();
            self.sessions
                .mutate(&request.session_id, |s: &mut Session| {
                    s.parent_checkpoint_id = s.last_checkpoint_id.clone();
                    s.last_checkpoint_id = Some(checkpoint_id);
                })
                .await;
        }

        // EXECUTE
        let jail_root = if load_result.sandbox_class == crate::types::SandboxClass::FilesystemJail {
            Some(
                self.state_dir
                    .join("runtime")
                    .join("sessions")
                    .join(&request.session_id),
            )
        } else {
            None
        };
        let result = execute::execute(
            ExecuteContext {
                session_id: &request.session_id,
                sovereign_id: &request.sovereign_id,
                operation_id,
                capability: request.capability.clone(),
                payload: request.payload.clone(),
                estimated_tokens: request.estimated_tokens,
                routing_strategy: RoutingStrategy::LeastLoaded,
                sandbox_class: load_result.sandbox_class,
                jail_root,
                skills: Some(&self.skills),
            },
            &self.mesh,
            &self.sessions,
            &self.bus,
            &mut budget,
        )
        .await?;

        Ok(Arc::new(result))
    }

    /// PARALLEL sub-intents (spec §4.4): spawn one child pipeline per item,
    /// join on completion with deterministic ordering by child index.
    pub async fn run_parallel(
        self: &Arc<Self>,
        requests: Vec<IntentRequest>,
    ) -> Vec<CellResult<Arc<AgentResult>>> {
        let mut handles = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let pipeline = self.clone();
            let child_seq = self.parallel_child_seq.fetch_add(1, Ordering::SeqCst);
            handles.push(tokio::spawn(async move {
                tracing::debug!(child_seq, index, "spawning PARALLEL child pipeline");
                (index, pipeline.run(request).await)
            }));
        }

        let mut by_index: HashMap<usize, CellResult<Arc<AgentResult>>> = HashMap::new();
        for handle in handles {
            match handle.await {
                Ok((index, result)) => {
                    by_index.insert(index, result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "PARALLEL child pipeline task panicked");
                }
            }
        }

        let max_index = by_index.keys().copied().max().unwrap_or(0);
        (0..=max_index)
            .filter_map(|i| by_index.remove(&i))
            .collect()
    }
}

/// `CellError` wraps `anyhow::Error`, which isn't `Clone`, so a coalesced
/// result is re-materialized from its rendered message rather than cloned
/// structurally.
fn clone_outcome(result: &CellResult<Arc<AgentResult>>) -> CellResult<Arc<AgentResult>> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(CellError::internal(anyhow::anyhow!(e.to_string()))),
    }
}
