//! LOAD phase (spec §4.4): resolve applicable policies, required sandbox
//! class, and a bounded memory context slice.

use crate::session::Session;
use crate::types::{Domain, IntentType, PolicyProfile, SandboxClass};

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub sandbox_class: SandboxClass,
    pub memory_context: Vec<String>,
    pub policy_notes: Vec<String>,
}

/// Sandbox class required for a given (domain, type, profile) triple.
/// Destructive system actions always require at least a filesystem jail;
/// exec-type actions escalate to subprocess; admin profile never downgrades
/// an otherwise-required jail. A tainted session (§8 scenario 6: a prior
/// `SandboxViolation` on this session) never gets `None` either -- the next
/// intent is forced through at least a filesystem jail until the taint is
/// cleared by a clean APPLY pass.
fn required_sandbox(intent_type: IntentType, profile: PolicyProfile, tainted: bool) -> SandboxClass {
    let base = match intent_type {
        IntentType::SystemExec => SandboxClass::SubprocessJail,
        IntentType::SystemWrite => SandboxClass::FilesystemJail,
        IntentType::SystemRead => SandboxClass::FilesystemJail,
        IntentType::Communicate | IntentType::Reason | IntentType::Meta => SandboxClass::None,
    };
    let escalated = if profile == PolicyProfile::Restricted && base == SandboxClass::None {
        SandboxClass::FilesystemJail
    } else {
        base
    };
    if tainted && escalated == SandboxClass::None {
        SandboxClass::FilesystemJail
    } else {
        escalated
    }
}

/// Token-budget-bounded tail of the session log plus matching long-term
/// notes (spec §4.4 "memory context slice ... bounded by a token budget").
pub fn load(
    session: &Session,
    intent_type: IntentType,
    domain: Domain,
    token_budget: u64,
) -> LoadResult {
    let sandbox_class = required_sandbox(intent_type, session.policy_profile, session.tainted);

    let mut memory_context = Vec::new();
    let mut remaining = token_budget;
    for entry in session.message_log.iter().rev() {
        let cost = (entry.content.len() / 4 + 1) as u64;
        if cost > remaining {
            break;
        }
        remaining -= cost;
        memory_context.push(entry.content.clone());
    }
    memory_context.reverse();

    let mut policy_notes = vec![format!("domain={domain:?}")];
    if session.tainted {
        policy_notes.push("session_tainted: forcing fresh policy resolution".to_string());
    }

    LoadResult {
        sandbox_class,
        memory_context,
        policy_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn session() -> Session {
        let mut s = Session::new(
            "sess-1".into(),
            "sov-1".into(),
            Domain::System,
            "conv-1".into(),
            PolicyProfile::Standard,
        );
        s.push_log(Role::User, "hello");
        s.push_log(Role::Agent, "hi there");
        s
    }

    #[test]
    fn exec_intent_requires_subprocess_jail() {
        let result = required_sandbox(IntentType::SystemExec, PolicyProfile::Standard, false);
        assert_eq!(result, SandboxClass::SubprocessJail);
    }

    #[test]
    fn restricted_profile_never_gets_none_sandbox() {
        let result = required_sandbox(IntentType::Communicate, PolicyProfile::Restricted, false);
        assert_eq!(result, SandboxClass::FilesystemJail);
    }

    #[test]
    fn tainted_session_never_gets_none_sandbox() {
        let result = required_sandbox(IntentType::Reason, PolicyProfile::Standard, true);
        assert_eq!(result, SandboxClass::FilesystemJail);
    }

    #[test]
    fn memory_context_is_bounded_by_token_budget() {
        let s = session();
        let result = load(&s, IntentType::Reason, Domain::System, 1);
        assert!(result.memory_context.len() <= 1);
    }
}
