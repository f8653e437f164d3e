//! Skill registration contract (spec §4.7, C2).
//!
//! Grounded on the teacher's `skills/types.rs` `Skill` struct, trimmed to
//! the fields the core actually needs: the core only defines the
//! registration contract and sandbox boundary, not domain-specific skill
//! bodies (spec §1 Non-goals).

use crate::error::{CellError, CellResult};
use crate::sandbox::{self, SandboxConfig};
use crate::types::{CapabilityTag, PolicyProfile, SandboxClass};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub required_profile: PolicyProfile,
    pub sandbox_class: SandboxClass,
    pub policy_tags: Vec<String>,
    pub capability: CapabilityTag,
}

/// Per-call context handed to a skill. Deliberately restricted (spec §9
/// "Pattern: sandbox cycles" — pass a restricted `ctx` handle, not the full
/// gateway object).
pub struct SkillContext {
    pub sovereign_id: String,
    pub session_id: String,
    pub operation_id: String,
    pub token_budget_remaining: u64,
    pub cancellation: tokio_util::CancellationToken,
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn descriptor(&self) -> &SkillDescriptor;

    async fn invoke(
        &self,
        input: serde_json::Value,
        ctx: &SkillContext,
    ) -> CellResult<serde_json::Value>;
}

/// Static-at-startup registry (spec §4.7 "Registration is static at
/// startup; dynamic registration requires admin-profile and an explicit
/// EthicsConsensus entry").
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: Arc<std::sync::RwLock<HashMap<String, Arc<dyn Skill>>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, skill: Arc<dyn Skill>) {
        let name = skill.descriptor().name.clone();
        self.skills.write().unwrap().insert(name, skill);
    }

    /// Admin-only dynamic registration; callers MUST have already logged an
    /// EthicsConsensus entry for this — enforced by `ethics::evaluate`
    /// upstream, not re-checked here.
    pub fn register_dynamic(&self, skill: Arc<dyn Skill>, caller_profile: PolicyProfile) -> CellResult<()> {
        if caller_profile != PolicyProfile::Admin {
            return Err(CellError::Unauthorized);
        }
        self.register(skill);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<SkillDescriptor> {
        self.skills
            .read()
            .unwrap()
            .values()
            .map(|s| s.descriptor().clone())
            .collect()
    }

    /// Invoke a skill by name, enforcing its sandbox class against the
    /// requested jail root before dispatch (spec §4.7, §8 scenario 6).
    pub async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &SkillContext,
        jail_root: Option<&std::path::Path>,
    ) -> CellResult<serde_json::Value> {
        let skill = self
            .get(name)
            .ok_or_else(|| CellError::NotFound(format!("skill {name}")))?;

        if skill.descriptor().sandbox_class == SandboxClass::FilesystemJail {
            let root = jail_root.ok_or_else(|| {
                CellError::SandboxViolation("filesystem-jail requires a jail root".to_string())
            })?;
            let config = SandboxConfig::filesystem_jail(root);
            // Probe the root itself; individual path escapes inside a
            // skill's own implementation must call `sandbox::check_path_access`
            // per access.
            sandbox::check_path_access(&config, root)?;
        }

        skill.invoke(input, ctx).await
    }
}

/// A tiny cooperative cancellation token so skills can check deadlines
/// without pulling in `tokio-util` as a dependency just for this.
pub mod tokio_util {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct CancellationToken(Arc<AtomicBool>);

    impl CancellationToken {
        pub fn new() -> Self {
            Self(Arc::new(AtomicBool::new(false)))
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::SeqCst);
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSkill(SkillDescriptor);

    #[async_trait]
    impl Skill for EchoSkill {
        fn descriptor(&self) -> &SkillDescriptor {
            &self.0
        }

        async fn invoke(
            &self,
            input: serde_json::Value,
            _ctx: &SkillContext,
        ) -> CellResult<serde_json::Value> {
            Ok(input)
        }
    }

    fn ctx() -> SkillContext {
        SkillContext {
            sovereign_id: "sov-1".into(),
            session_id: "sess-1".into(),
            operation_id: "op-1".into(),
            token_budget_remaining: 1000,
            cancellation: tokio_util::CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_to_registered_skill() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill(SkillDescriptor {
            name: "echo".into(),
            required_profile: PolicyProfile::Standard,
            sandbox_class: SandboxClass::None,
            policy_tags: vec![],
            capability: "ccos.echo".into(),
        })));
        let result = registry
            .invoke("echo", serde_json::json!({"x": 1}), &ctx(), None)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn unknown_skill_is_not_found() {
        let registry = SkillRegistry::new();
        let result = registry.invoke("nope", serde_json::json!({}), &ctx(), None).await;
        assert!(matches!(result, Err(CellError::NotFound(_))));
    }

    #[test]
    fn dynamic_registration_requires_admin_profile() {
        let registry = SkillRegistry::new();
        let skill = Arc::new(EchoSkill(SkillDescriptor {
            name: "echo2".into(),
            required_profile: PolicyProfile::Standard,
            sandbox_class: SandboxClass::None,
            policy_tags: vec![],
            capability: "ccos.echo".into(),
        }));
        let err = registry
            .register_dynamic(skill, PolicyProfile::Standard)
            .unwrap_err();
        assert!(matches!(err, CellError::Unauthorized));
    }
}
