//! Goal lifecycle bookkeeping (spec §4.6 GOAL-SET).
//!
//! Grounded on the teacher's `chat/run.rs` run-store pattern: an in-memory
//! map guarded by a lock, mutated only by the owning loop.

use crate::types::{Goal, GoalState};
use std::collections::HashMap;
use std::sync::RwLock;

/// One of the 17 domains a Goal may be proposed in (spec §4.6). Distinct
/// from the channel-routing `Domain` enum in `types.rs`, which scopes agent
/// capability routing rather than meta-agent self-improvement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalDomain {
    Latency,
    ErrorRate,
    PolicyBlocks,
    TokenBudget,
    ChannelHealth,
    SandboxViolations,
    CheckpointHygiene,
    EthicsDeferrals,
    SessionHygiene,
    AgentLoad,
    RoutingQuality,
    CapabilityCoverage,
    MemoryGrowth,
    IdentityDrift,
    EventBusBackpressure,
    ScheduleReliability,
    Security,
}

impl GoalDomain {
    pub const ALL: [GoalDomain; 17] = [
        GoalDomain::Latency,
        GoalDomain::ErrorRate,
        GoalDomain::PolicyBlocks,
        GoalDomain::TokenBudget,
        GoalDomain::ChannelHealth,
        GoalDomain::SandboxViolations,
        GoalDomain::CheckpointHygiene,
        GoalDomain::EthicsDeferrals,
        GoalDomain::SessionHygiene,
        GoalDomain::AgentLoad,
        GoalDomain::RoutingQuality,
        GoalDomain::CapabilityCoverage,
        GoalDomain::MemoryGrowth,
        GoalDomain::IdentityDrift,
        GoalDomain::EventBusBackpressure,
        GoalDomain::ScheduleReliability,
        GoalDomain::Security,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoalDomain::Latency => "latency",
            GoalDomain::ErrorRate => "error_rate",
            GoalDomain::PolicyBlocks => "policy_blocks",
            GoalDomain::TokenBudget => "token_budget",
            GoalDomain::ChannelHealth => "channel_health",
            GoalDomain::SandboxViolations => "sandbox_violations",
            GoalDomain::CheckpointHygiene => "checkpoint_hygiene",
            GoalDomain::EthicsDeferrals => "ethics_deferrals",
            GoalDomain::SessionHygiene => "session_hygiene",
            GoalDomain::AgentLoad => "agent_load",
            GoalDomain::RoutingQuality => "routing_quality",
            GoalDomain::CapabilityCoverage => "capability_coverage",
            GoalDomain::MemoryGrowth => "memory_growth",
            GoalDomain::IdentityDrift => "identity_drift",
            GoalDomain::EventBusBackpressure => "event_bus_backpressure",
            GoalDomain::ScheduleReliability => "schedule_reliability",
            GoalDomain::Security => "security",
        }
    }
}

/// In-memory goal store, single-writer (the meta-agent loop itself).
pub struct GoalManager {
    goals: RwLock<HashMap<String, Goal>>,
}

impl GoalManager {
    pub fn new() -> Self {
        Self {
            goals: RwLock::new(HashMap::new()),
        }
    }

    pub fn propose(&self, domain: GoalDomain, description: String, priority: u8, parent_goal_id: Option<String>) -> Goal {
        let now = chrono::Utc::now();
        let goal = Goal {
            id: format!("goal_{}", uuid::Uuid::new_v4()),
            domain: domain.as_str().to_string(),
            description,
            priority: priority.clamp(1, 10),
            state: GoalState::Proposed,
            parent_goal_id,
            created_at: now,
            updated_at: now,
        };
        self.goals.write().unwrap().insert(goal.id.clone(), goal.clone());
        goal
    }

    pub fn transition(&self, id: &str, state: GoalState) -> Option<Goal> {
        let mut goals = self.goals.write().unwrap();
        let goal = goals.get_mut(id)?;
        goal.state = state;
        goal.updated_at = chrono::Utc::now();
        Some(goal.clone())
    }

    pub fn active(&self) -> Vec<Goal> {
        self.goals
            .read()
            .unwrap()
            .values()
            .filter(|g| matches!(g.state, GoalState::Proposed | GoalState::Active | GoalState::Evaluating))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Goal> {
        self.goals.read().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Goal> {
        self.goals.read().unwrap().values().cloned().collect()
    }
}

impl Default for GoalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propose_then_transition_updates_state() {
        let manager = GoalManager::new();
        let goal = manager.propose(GoalDomain::Latency, "reduce p99 latency".into(), 5, None);
        assert_eq!(goal.state, GoalState::Proposed);

        let updated = manager.transition(&goal.id, GoalState::Active).unwrap();
        assert_eq!(updated.state, GoalState::Active);
        assert!(manager.active().iter().any(|g| g.id == goal.id));
    }

    #[test]
    fn completed_goals_are_excluded_from_active() {
        let manager = GoalManager::new();
        let goal = manager.propose(GoalDomain::ErrorRate, "lower 5xx rate".into(), 3, None);
        manager.transition(&goal.id, GoalState::Completed);
        assert!(!manager.active().iter().any(|g| g.id == goal.id));
    }
}
