//! Token budget enforcement for COL's APPLY phase (spec §4.4 "Token budget").
//!
//! Grounded on the teacher's `budget/mod.rs`: immutable limits, mutable
//! consumption, per-dimension exhaustion policy. Simplified to the single
//! dimension the spec actually governs (tokens) while keeping the same
//! check/record shape so it composes with the rest of APPLY.

mod types;

pub use types::{BudgetCheckResult, BudgetLimits, ExhaustionPolicy};

use types::BudgetConsumed;

#[derive(Debug, Clone)]
pub struct BudgetContext {
    limits: BudgetLimits,
    policy: ExhaustionPolicy,
    consumed: BudgetConsumed,
}

impl BudgetContext {
    pub fn new(limits: BudgetLimits, policy: ExhaustionPolicy) -> Self {
        Self {
            limits,
            policy,
            consumed: BudgetConsumed::default(),
        }
    }

    /// Pre-check before debiting an estimated cost (spec §4.4 APPLY).
    pub fn check(&self, estimated_tokens: u64) -> BudgetCheckResult {
        let projected = self.consumed.tokens + estimated_tokens;
        if projected > self.limits.tokens {
            return BudgetCheckResult::Exhausted {
                policy: self.policy,
            };
        }
        let percent = (projected * 100) / self.limits.tokens.max(1);
        if percent >= 80 {
            BudgetCheckResult::Warning { percent }
        } else {
            BudgetCheckResult::Ok
        }
    }

    /// Debit the estimate (called once APPLY decides to proceed).
    pub fn debit(&mut self, estimated_tokens: u64) {
        self.consumed.tokens += estimated_tokens;
    }

    /// Reconcile with the actual cost once EXECUTE completes (spec §4.4
    /// EXECUTE: "update token budget with actual cost").
    pub fn reconcile(&mut self, estimated_tokens: u64, actual_tokens: u64) {
        self.consumed.tokens = self
            .consumed
            .tokens
            .saturating_sub(estimated_tokens)
            .saturating_add(actual_tokens);
    }

    pub fn remaining(&self) -> u64 {
        self.limits.tokens.saturating_sub(self.consumed.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_denies_when_limit_would_be_exceeded() {
        let mut ctx = BudgetContext::new(
            BudgetLimits { tokens: 100 },
            ExhaustionPolicy::HardStop,
        );
        ctx.debit(90);
        match ctx.check(20) {
            BudgetCheckResult::Exhausted { policy } => assert_eq!(policy, ExhaustionPolicy::HardStop),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn warns_at_80_percent() {
        let ctx = BudgetContext::new(BudgetLimits { tokens: 100 }, ExhaustionPolicy::HardStop);
        match ctx.check(85) {
            BudgetCheckResult::Warning { percent } => assert_eq!(percent, 85),
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn reconcile_replaces_estimate_with_actual() {
        let mut ctx = BudgetContext::new(BudgetLimits { tokens: 1000 }, ExhaustionPolicy::HardStop);
        ctx.debit(100);
        ctx.reconcile(100, 40);
        assert_eq!(ctx.remaining(), 960);
    }
}
