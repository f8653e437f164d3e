//! APPLY phase (spec §4.4): compute executability from token budget,
//! EthicsConsensus, and the destructive-action checkpoint requirement (I4, I5).

use crate::budget::{BudgetCheckResult, BudgetContext};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::ethics::{evaluate, ActionProposal, EthicsLedger};
use crate::session::Session;
use crate::types::{EthicsDecision, EthicsRecord, IntentType};

#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub executable: bool,
    pub reason: String,
    pub checkpoint_id: Option<String>,
}

pub struct ApplyContext<'a> {
    pub operation_id: &'a str,
    pub actor_agent_id: &'a str,
    pub proposed_action: &'a str,
    pub intent_type: IntentType,
    pub estimated_tokens: u64,
    pub sovereign_known: bool,
    pub admin_bypass: bool,
}

/// Runs the three APPLY checks in spec order: budget, ethics, destructive
/// checkpoint. A budget exhaustion or ethics deny short-circuits before the
/// checkpoint is ever taken.
pub async fn apply(
    ctx: ApplyContext<'_>,
    budget: &mut BudgetContext,
    ledger: &EthicsLedger,
    checkpoint_store: &dyn CheckpointStore,
    session: &Session,
) -> crate::error::CellResult<ApplyResult> {
    match budget.check(ctx.estimated_tokens) {
        BudgetCheckResult::Exhausted { .. } => {
            return Ok(ApplyResult {
                executable: false,
                reason: "token budget exhausted".to_string(),
                checkpoint_id: None,
            });
        }
        BudgetCheckResult::Warning { percent } => {
            tracing::warn!(operation_id = ctx.operation_id, percent, "token budget nearing exhaustion");
        }
        BudgetCheckResult::Ok => {}
    }

    let destructive = ctx.intent_type.is_destructive_by_default();

    let proposal = ActionProposal {
        operation_id: ctx.operation_id.to_string(),
        actor_agent_id: ctx.actor_agent_id.to_string(),
        sovereign_known: ctx.sovereign_known,
        action_text: ctx.proposed_action.to_string(),
        destructive,
        admin_bypass: ctx.admin_bypass,
    };
    let (rule_decisions, decision, reason) = evaluate(&proposal);

    let record = EthicsRecord {
        ts: chrono::Utc::now(),
        operation_id: ctx.operation_id.to_string(),
        actor_agent_id: ctx.actor_agent_id.to_string(),
        proposed_action: ctx.proposed_action.to_string(),
        rule_decisions,
        decision,
        reason: reason.clone(),
    };
    ledger
        .append(&record)
        .await
        .map_err(crate::error::CellError::internal)?;

    if decision == EthicsDecision::Deny {
        return Ok(ApplyResult {
            executable: false,
            reason: format!("ethics denied: {reason}"),
            checkpoint_id: None,
        });
    }
    if decision == EthicsDecision::Defer {
        return Ok(ApplyResult {
            executable: false,
            reason: format!("ethics deferred: {reason}"),
            checkpoint_id: None,
        });
    }

    let checkpoint_id = if destructive {
        let checkpoint = Checkpoint::create(session, session.last_checkpoint_id.clone(), "pre-destructive-apply")?;
        let id = checkpoint.id.clone();
        checkpoint_store.store(checkpoint)?;
        Some(id)
    } else {
        None
    };

    budget.debit(ctx.estimated_tokens);

    Ok(ApplyResult {
        executable: true,
        reason: "approved".to_string(),
        checkpoint_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetLimits, ExhaustionPolicy};
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::types::{Domain, PolicyProfile};

    fn sample_session() -> Session {
        Session::new("sess-1".into(), "sov-1".into(), Domain::System, "conv-1".into(), PolicyProfile::Standard)
    }

    #[tokio::test]
    async fn destructive_approved_action_produces_checkpoint() {
        let (ledger, _dir) = EthicsLedger::in_memory_for_tests().unwrap();
        let store = InMemoryCheckpointStore::new();
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 1_000 }, ExhaustionPolicy::HardStop);
        let session = sample_session();

        let ctx = ApplyContext {
            operation_id: "op-1",
            actor_agent_id: "agent-1",
            proposed_action: "delete stale report",
            intent_type: IntentType::SystemWrite,
            estimated_tokens: 50,
            sovereign_known: true,
            admin_bypass: false,
        };
        let result = apply(ctx, &mut budget, &ledger, &store, &session).await.unwrap();
        assert!(result.executable);
        assert!(result.checkpoint_id.is_some());
        assert!(ledger.has_allow("op-1"));
    }

    #[tokio::test]
    async fn unknown_sovereign_is_denied_and_never_checkpoints() {
        let (ledger, _dir) = EthicsLedger::in_memory_for_tests().unwrap();
        let store = InMemoryCheckpointStore::new();
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 1_000 }, ExhaustionPolicy::HardStop);
        let session = sample_session();

        let ctx = ApplyContext {
            operation_id: "op-2",
            actor_agent_id: "agent-1",
            proposed_action: "read file",
            intent_type: IntentType::SystemRead,
            estimated_tokens: 10,
            sovereign_known: false,
            admin_bypass: false,
        };
        let result = apply(ctx, &mut budget, &ledger, &store, &session).await.unwrap();
        assert!(!result.executable);
        assert!(result.checkpoint_id.is_none());
    }

    #[tokio::test]
    async fn exhausted_budget_short_circuits_before_ethics_runs() {
        let (ledger, _dir) = EthicsLedger::in_memory_for_tests().unwrap();
        let store = InMemoryCheckpointStore::new();
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 10 }, ExhaustionPolicy::HardStop);
        let session = sample_session();

        let ctx = ApplyContext {
            operation_id: "op-3",
            actor_agent_id: "agent-1",
            proposed_action: "summarize document",
            intent_type: IntentType::Reason,
            estimated_tokens: 50,
            sovereign_known: true,
            admin_bypass: false,
        };
        let result = apply(ctx, &mut budget, &ledger, &store, &session).await.unwrap();
        assert!(!result.executable);
        assert!(!ledger.has_allow("op-3"));
    }
}
