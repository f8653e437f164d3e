//! EXECUTE phase (spec §4.4): dispatch to the agent mesh, stream partial
//! results onto the event bus, append to the session log, reconcile the
//! actual token cost.

use crate::agents::{AgentMesh, AgentResult, Intent, RoutingStrategy};
use crate::budget::BudgetContext;
use crate::error::{CellError, CellResult};
use crate::eventbus::{Event, EventBus, EventKind};
use crate::sandbox::{self, SandboxConfig};
use crate::session::{Session, SessionRegistry};
use crate::skills::{SkillContext, SkillRegistry};
use crate::types::{CapabilityTag, Role, SandboxClass};
use std::path::PathBuf;

pub struct ExecuteContext<'a> {
    pub session_id: &'a str,
    pub sovereign_id: &'a str,
    pub operation_id: &'a str,
    pub capability: CapabilityTag,
    pub payload: serde_json::Value,
    pub estimated_tokens: u64,
    pub routing_strategy: RoutingStrategy,
    /// Sandbox class LOAD resolved for this intent (spec §4.7, §8 scenario 6).
    pub sandbox_class: SandboxClass,
    /// Filesystem jail root to probe/enforce against when `sandbox_class`
    /// is `FilesystemJail`; `state_dir/runtime/sessions/<id>/`.
    pub jail_root: Option<PathBuf>,
    /// Statically-registered skills this capability may resolve to before
    /// falling back to the agent mesh (spec §4.7, C2).
    pub skills: Option<&'a SkillRegistry>,
}

/// Rough actual-cost estimator from the result payload; a real deployment
/// would read token usage from the capability provider's response.
fn estimate_actual_tokens(result: &AgentResult) -> u64 {
    (result.payload.to_string().len() / 4 + 1) as u64
}

pub async fn execute(
    ctx: ExecuteContext<'_>,
    mesh: &AgentMesh,
    sessions: &SessionRegistry,
    bus: &EventBus,
    budget: &mut BudgetContext,
) -> CellResult<AgentResult> {
    bus.publish(Event::new(
        EventKind::ColEvent,
        serde_json::json!({"phase": "execute_start", "operation_id": ctx.operation_id}),
    ));

    if ctx.sandbox_class == SandboxClass::FilesystemJail {
        if let Err(e) = enforce_filesystem_jail(&ctx) {
            sessions
                .mutate(ctx.session_id, |s: &mut Session| s.taint())
                .await;
            budget.reconcile(ctx.estimated_tokens, 0);
            bus.publish(Event::new(
                EventKind::ColEvent,
                serde_json::json!({"operation_id": ctx.operation_id, "status": "sandbox_violation", "error": e.code()}),
            ));
            return Err(e);
        }
    }

    let result = if ctx.skills.is_some_and(|r| r.get(&ctx.capability.0).is_some()) {
        let skill_ctx = SkillContext {
            sovereign_id: ctx.sovereign_id.to_string(),
            session_id: ctx.session_id.to_string(),
            operation_id: ctx.operation_id.to_string(),
            token_budget_remaining: budget.remaining(),
            cancellation: crate::skills::tokio_util::CancellationToken::new(),
        };
        ctx.skills
            .expect("checked Some above")
            .invoke(
                &ctx.capability.0,
                ctx.payload.clone(),
                &skill_ctx,
                ctx.jail_root.as_deref(),
            )
            .await
            .map(|payload| AgentResult { payload })
    } else {
        let intent = Intent {
            operation_id: ctx.operation_id.to_string(),
            session_id: ctx.session_id.to_string(),
            capability: ctx.capability.clone(),
            payload: ctx.payload.clone(),
        };
        mesh.dispatch(ctx.session_id, &ctx.capability, intent, ctx.routing_strategy)
            .await
    };

    match &result {
        Ok(agent_result) => {
            let actual_tokens = estimate_actual_tokens(agent_result);
            budget.reconcile(ctx.estimated_tokens, actual_tokens);
            sessions
                .mutate(ctx.session_id, |s: &mut Session| {
                    s.push_log(Role::Agent, agent_result.payload.to_string());
                    if s.tainted {
                        s.clear_taint();
                    }
                })
                .await;
            bus.publish(Event::new(
                EventKind::AgentEvent,
                serde_json::json!({"operation_id": ctx.operation_id, "status": "completed"}),
            ));
        }
        Err(e) => {
            budget.reconcile(ctx.estimated_tokens, 0);
            if matches!(e, CellError::SandboxViolation(_)) {
                sessions
                    .mutate(ctx.session_id, |s: &mut Session| s.taint())
                    .await;
            }
            bus.publish(Event::new(
                EventKind::ColEvent,
                serde_json::json!({"operation_id": ctx.operation_id, "status": "failed", "error": e.code()}),
            ));
        }
    }

    result
}

/// Self-probes the jail root before dispatch so a missing/escaped root is
/// caught as a `SandboxViolation` ahead of handing control to an agent or
/// skill, mirroring `SkillRegistry::invoke`'s own root probe.
fn enforce_filesystem_jail(ctx: &ExecuteContext<'_>) -> CellResult<()> {
    let root = ctx.jail_root.as_ref().ok_or_else(|| {
        CellError::SandboxViolation("filesystem-jail requires a jail root".to_string())
    })?;
    std::fs::create_dir_all(root).map_err(CellError::internal)?;
    let config = SandboxConfig::filesystem_jail(root);
    sandbox::check_path_access(&config, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use crate::budget::{BudgetLimits, ExhaustionPolicy};
    use crate::types::{AgentDescriptor, AgentStatus, Domain, PolicyProfile};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn id(&self) -> &str {
            "echo"
        }

        async fn handle(&self, intent: Intent, _fence: crate::agents::Fence) -> CellResult<AgentResult> {
            Ok(AgentResult { payload: intent.payload })
        }
    }

    #[tokio::test]
    async fn successful_execute_reconciles_budget_and_logs_reply() {
        let mesh = AgentMesh::new();
        let mut caps = BTreeSet::new();
        caps.insert(CapabilityTag::from("summarize"));
        mesh.register(
            Arc::new(EchoAgent),
            AgentDescriptor {
                id: "echo".into(),
                name: "echo".into(),
                domain: Domain::Research,
                capabilities: caps,
                priority: 1,
                load_factor: 0.0,
                status: AgentStatus::Online,
            },
        );

        let sessions = SessionRegistry::new();
        let key = crate::session::SessionKey {
            sovereign_id: "sov-1".into(),
            domain: Domain::Research,
            conversation_key: "conv-1".into(),
        };
        let session = sessions.get_or_create(&key, PolicyProfile::Standard).await;

        let bus = EventBus::new(10, 3);
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 1_000 }, ExhaustionPolicy::HardStop);

        let ctx = ExecuteContext {
            session_id: &session.id,
            sovereign_id: "sov-1",
            operation_id: "op-1",
            capability: "summarize".into(),
            payload: serde_json::json!({"text": "hi"}),
            estimated_tokens: 100,
            routing_strategy: RoutingStrategy::LeastLoaded,
            sandbox_class: crate::types::SandboxClass::None,
            jail_root: None,
            skills: None,
        };

        let result = execute(ctx, &mesh, &sessions, &bus, &mut budget).await.unwrap();
        assert_eq!(result.payload, serde_json::json!({"text": "hi"}));

        let updated = sessions.get(&session.id).await.unwrap();
        assert_eq!(updated.message_log.len(), 1);
    }

    #[tokio::test]
    async fn filesystem_jail_violation_taints_the_session_and_skips_dispatch() {
        let mesh = AgentMesh::new();
        let sessions = SessionRegistry::new();
        let key = crate::session::SessionKey {
            sovereign_id: "sov-1".into(),
            domain: Domain::System,
            conversation_key: "conv-jail".into(),
        };
        let session = sessions.get_or_create(&key, PolicyProfile::Standard).await;

        let bus = EventBus::new(10, 3);
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 1_000 }, ExhaustionPolicy::HardStop);

        let ctx = ExecuteContext {
            session_id: &session.id,
            sovereign_id: "sov-1",
            operation_id: "op-jail",
            capability: "read_file".into(),
            payload: serde_json::json!({}),
            estimated_tokens: 10,
            routing_strategy: RoutingStrategy::LeastLoaded,
            sandbox_class: crate::types::SandboxClass::FilesystemJail,
            jail_root: None,
            skills: None,
        };

        let result = execute(ctx, &mesh, &sessions, &bus, &mut budget).await;
        assert!(matches!(result, Err(CellError::SandboxViolation(_))));

        let updated = sessions.get(&session.id).await.unwrap();
        assert!(updated.tainted);
    }

    #[tokio::test]
    async fn registered_skill_is_dispatched_before_the_agent_mesh() {
        use crate::skills::{Skill, SkillDescriptor};
        use async_trait::async_trait;

        struct EchoSkill(SkillDescriptor);

        #[async_trait]
        impl Skill for EchoSkill {
            fn descriptor(&self) -> &SkillDescriptor {
                &self.0
            }

            async fn invoke(
                &self,
                input: serde_json::Value,
                _ctx: &crate::skills::SkillContext,
            ) -> CellResult<serde_json::Value> {
                Ok(serde_json::json!({"from": "skill", "echo": input}))
            }
        }

        let mesh = AgentMesh::new();
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill(SkillDescriptor {
            name: "greet".into(),
            required_profile: PolicyProfile::Standard,
            sandbox_class: crate::types::SandboxClass::None,
            policy_tags: vec![],
            capability: "greet".into(),
        })));

        let sessions = SessionRegistry::new();
        let key = crate::session::SessionKey {
            sovereign_id: "sov-1".into(),
            domain: Domain::Communication,
            conversation_key: "conv-skill".into(),
        };
        let session = sessions.get_or_create(&key, PolicyProfile::Standard).await;
        let bus = EventBus::new(10, 3);
        let mut budget = BudgetContext::new(BudgetLimits { tokens: 1_000 }, ExhaustionPolicy::HardStop);

        let ctx = ExecuteContext {
            session_id: &session.id,
            sovereign_id: "sov-1",
            operation_id: "op-skill",
            capability: "greet".into(),
            payload: serde_json::json!({"name": "ada"}),
            estimated_tokens: 10,
            routing_strategy: RoutingStrategy::LeastLoaded,
            sandbox_class: crate::types::SandboxClass::None,
            jail_root: None,
            skills: Some(&registry),
        };

        let result = execute(ctx, &mesh, &sessions, &bus, &mut budget).await.unwrap();
        assert_eq!(result.payload["from"], "skill");
    }
}
