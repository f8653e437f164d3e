//! Meta-Agent loop (spec §4.6, C6): OBSERVE -> REFLECT -> GOAL-SET -> ACT ->
//! EVALUATE on a cron cadence. Every ACT step is a normal intent run through
//! the COL pipeline -- there is no privileged bypass, so meta-agent actions
//! inherit I1-I5 exactly like a channel-originated message.
//!
//! Grounded on the teacher's `chat/scheduler.rs` cron-driven loop (`croner`
//! parse + `find_next_occurrence`), adapted from a run-triggering scheduler
//! into a fixed five-phase self-improvement loop.

mod goal;

pub use goal::{GoalDomain, GoalManager};

use crate::col::{ColPipeline, IntentRequest};
use crate::error::{CellError, CellResult};
use crate::types::{CapabilityTag, Domain, GoalState};
use chrono::{DateTime, Utc};
use croner::Cron;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Abstraction over wall-clock time so the cron cadence is testable without
/// a real multi-minute sleep.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep_until(&self, when: DateTime<Utc>);
}

pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, when: DateTime<Utc>) {
        let now = Utc::now();
        if when > now {
            let dur = (when - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(dur).await;
        }
    }
}

/// Point-in-time counters the OBSERVE phase snapshots (spec §4.6 step 1
/// "latencies, failure counts, policy blocks, token burn, unresolved
/// goals"). A real deployment feeds these from the gateway and event bus;
/// tests populate them directly.
#[derive(Default)]
pub struct MetaAgentMetrics {
    failure_count: AtomicU64,
    policy_block_count: AtomicU64,
    token_burn: AtomicU64,
    latency_ms_sum: AtomicU64,
    latency_samples: AtomicU64,
}

impl MetaAgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_block(&self) {
        self.policy_block_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, n: u64) {
        self.token_burn.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_latency_ms(&self, ms: u64) {
        self.latency_ms_sum.fetch_add(ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let sum = self.latency_ms_sum.load(Ordering::Relaxed);
        MetricsSnapshot {
            failure_count: self.failure_count.load(Ordering::Relaxed),
            policy_block_count: self.policy_block_count.load(Ordering::Relaxed),
            token_burn: self.token_burn.load(Ordering::Relaxed),
            avg_latency_ms: if samples == 0 { 0 } else { sum / samples },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub failure_count: u64,
    pub policy_block_count: u64,
    pub token_burn: u64,
    pub avg_latency_ms: u64,
}

/// One full OBSERVE..EVALUATE pass (spec §4.6 step 5 "write a run summary").
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ran_at: DateTime<Utc>,
    pub observed: MetricsSnapshot,
    pub goals_proposed: Vec<String>,
    pub goals_acted_on: Vec<String>,
    pub goals_completed: Vec<String>,
}

/// Fixed thresholds the REFLECT phase compares metrics against. A tenant
/// could eventually make these configurable; the spec only requires that
/// some declared threshold exists.
struct Thresholds {
    max_avg_latency_ms: u64,
    max_failure_count: u64,
    max_policy_block_count: u64,
}

const THRESHOLDS: Thresholds = Thresholds {
    max_avg_latency_ms: 2_000,
    max_failure_count: 10,
    max_policy_block_count: 20,
};

pub struct MetaAgentLoop {
    cron: String,
    pipeline: Arc<ColPipeline>,
    goals: GoalManager,
    metrics: Arc<MetaAgentMetrics>,
    clock: Arc<dyn Clock>,
    sovereign_id: String,
    session_id: String,
}

impl MetaAgentLoop {
    pub fn new(
        cron: String,
        pipeline: Arc<ColPipeline>,
        metrics: Arc<MetaAgentMetrics>,
        session_id: String,
    ) -> Self {
        Self {
            cron,
            pipeline,
            goals: GoalManager::new(),
            metrics,
            clock: Arc::new(SystemClock),
            sovereign_id: "cell0-meta-agent".to_string(),
            session_id,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn goals(&self) -> &GoalManager {
        &self.goals
    }

    pub fn metrics(&self) -> &MetaAgentMetrics {
        &self.metrics
    }

    /// Drive the loop forever on the configured cron cadence. Returns only
    /// if the cron expression itself is invalid, a configuration error the
    /// caller should surface at startup rather than retry.
    pub async fn run_forever(&self) -> CellResult<()> {
        let schedule = Cron::new(&self.cron)
            .with_seconds_optional()
            .parse()
            .map_err(|e| CellError::Validation(format!("invalid meta_agent cron '{}': {e}", self.cron)))?;

        loop {
            let now = self.clock.now();
            let next = schedule
                .find_next_occurrence(&now, false)
                .map_err(|e| CellError::internal(anyhow::anyhow!(e.to_string())))?;
            self.clock.sleep_until(next).await;
            let summary = self.run_once().await;
            tracing::info!(
                goals_proposed = summary.goals_proposed.len(),
                goals_acted_on = summary.goals_acted_on.len(),
                goals_completed = summary.goals_completed.len(),
                "meta-agent run complete"
            );
        }
    }

    /// OBSERVE -> REFLECT -> GOAL-SET -> ACT -> EVALUATE, once. Exposed
    /// directly so tests and an admin-triggered `cell0 meta run-once` can
    /// drive a single pass without waiting on the cron cadence.
    pub async fn run_once(&self) -> RunSummary {
        let observed = self.metrics.snapshot();

        let mut reflections: Vec<(GoalDomain, String, u8)> = Vec::new();
        if observed.avg_latency_ms > THRESHOLDS.max_avg_latency_ms {
            reflections.push((
                GoalDomain::Latency,
                format!("average latency {}ms exceeds threshold {}ms", observed.avg_latency_ms, THRESHOLDS.max_avg_latency_ms),
                8,
            ));
        }
        if observed.failure_count > THRESHOLDS.max_failure_count {
            reflections.push((
                GoalDomain::ErrorRate,
                format!("failure count {} exceeds threshold {}", observed.failure_count, THRESHOLDS.max_failure_count),
                7,
            ));
        }
        if observed.policy_block_count > THRESHOLDS.max_policy_block_count {
            reflections.push((
                GoalDomain::PolicyBlocks,
                format!("policy block count {} exceeds threshold {}", observed.policy_block_count, THRESHOLDS.max_policy_block_count),
                6,
            ));
        }

        let mut goals_proposed = Vec::new();
        for (domain, description, priority) in reflections {
            let goal = self.goals.propose(domain, description, priority, None);
            goals_proposed.push(goal.id);
        }

        let mut goals_acted_on = Vec::new();
        let mut goals_completed = Vec::new();
        for goal in self.goals.active() {
            self.goals.transition(&goal.id, GoalState::Active);
            goals_acted_on.push(goal.id.clone());

            let request = IntentRequest {
                session_id: self.session_id.clone(),
                sovereign_id: self.sovereign_id.clone(),
                sovereign_known: true,
                domain: Domain::System,
                canonicalized_text: format!("meta-agent improvement: {}", goal.description),
                proposed_action: goal.description.clone(),
                capability: CapabilityTag::from("meta.improve"),
                payload: serde_json::json!({"goal_id": goal.id, "domain": goal.domain}),
                actor_agent_id: "meta-agent".to_string(),
                admin_bypass: false,
                estimated_tokens: 200,
            };

            self.goals.transition(&goal.id, GoalState::Evaluating);
            match self.pipeline.run(request).await {
                Ok(_) => {
                    self.goals.transition(&goal.id, GoalState::Completed);
                    goals_completed.push(goal.id);
                }
                Err(e) => {
                    tracing::warn!(goal_id = %goal.id, error = %e, "meta-agent action did not complete");
                    self.goals.transition(&goal.id, GoalState::Active);
                }
            }
        }

        RunSummary {
            ran_at: self.clock.now(),
            observed,
            goals_proposed,
            goals_acted_on,
            goals_completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentMesh, AgentResult, Intent};
    use crate::budget::{BudgetLimits, ExhaustionPolicy};
    use crate::capabilities::CapabilityMarketplace;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::ethics::EthicsLedger;
    use crate::eventbus::EventBus;
    use crate::session::{SessionKey, SessionRegistry};
    use crate::types::{AgentDescriptor, AgentStatus, PolicyProfile};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct AckAgent;

    #[async_trait]
    impl Agent for AckAgent {
        fn id(&self) -> &str {
            "meta-improver"
        }

        async fn handle(&self, intent: Intent, _fence: crate::agents::Fence) -> CellResult<AgentResult> {
            Ok(AgentResult { payload: intent.payload })
        }
    }

    /// Builds a `ColPipeline` with a meta-agent session already seeded, and
    /// returns that session's id for the caller to construct a `MetaAgentLoop`.
    async fn build_pipeline() -> (Arc<ColPipeline>, String) {
        let mesh = Arc::new(AgentMesh::new());
        let mut caps = BTreeSet::new();
        caps.insert(CapabilityTag::from("meta.improve"));
        mesh.register(
            Arc::new(AckAgent),
            AgentDescriptor {
                id: "meta-improver".into(),
                name: "meta-improver".into(),
                domain: Domain::System,
                capabilities: caps,
                priority: 1,
                load_factor: 0.0,
                status: AgentStatus::Online,
            },
        );

        let (ledger, _dir) = EthicsLedger::in_memory_for_tests().unwrap();
        let sessions = SessionRegistry::new();
        let key = SessionKey {
            sovereign_id: "cell0-meta-agent".into(),
            domain: Domain::System,
            conversation_key: "meta".into(),
        };
        let session = sessions.get_or_create(&key, PolicyProfile::Standard).await;
        let session_id = session.id.clone();

        let pipeline = Arc::new(ColPipeline::new(
            sessions,
            mesh,
            Arc::new(ledger),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(EventBus::new(10, 3)),
            Arc::new(CapabilityMarketplace::new()),
            Arc::new(crate::skills::SkillRegistry::new()),
            None,
            std::env::temp_dir().join("cell0-meta-agent-test-state"),
            4,
            BudgetLimits { tokens: 100_000 },
        ));
        (pipeline, session_id)
    }

    struct FixedClock(std::sync::Mutex<DateTime<Utc>>);

    #[async_trait]
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }

        async fn sleep_until(&self, _when: DateTime<Utc>) {}
    }

    #[tokio::test]
    async fn run_once_with_no_threshold_breach_proposes_nothing() {
        let (pipeline, session_id) = build_pipeline().await;

        let metrics = Arc::new(MetaAgentMetrics::new());
        let loop_ = MetaAgentLoop::new("0 */5 * * * *".into(), pipeline, metrics, session_id);
        let summary = loop_.run_once().await;
        assert!(summary.goals_proposed.is_empty());
        assert!(summary.goals_acted_on.is_empty());
    }

    #[tokio::test]
    async fn breached_threshold_proposes_and_completes_goal_through_col() {
        let (pipeline, session_id) = build_pipeline().await;

        let metrics = Arc::new(MetaAgentMetrics::new());
        metrics.record_latency_ms(5_000);
        let loop_ = MetaAgentLoop::new("0 */5 * * * *".into(), pipeline, metrics, session_id);

        let summary = loop_.run_once().await;
        assert_eq!(summary.goals_proposed.len(), 1);
        assert_eq!(summary.goals_completed.len(), 1);
        let goal = loop_.goals().get(&summary.goals_proposed[0]).unwrap();
        assert_eq!(goal.state, GoalState::Completed);
    }

    #[test]
    fn invalid_cron_is_rejected_before_the_loop_ever_sleeps() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (pipeline, session_id) = build_pipeline().await;
            let metrics = Arc::new(MetaAgentMetrics::new());
            let loop_ = MetaAgentLoop::new("not a cron".into(), pipeline, metrics, session_id)
                .with_clock(Arc::new(FixedClock(std::sync::Mutex::new(Utc::now()))));
            assert!(loop_.run_forever().await.is_err());
        });
    }
}
