//! EthicsConsensus + the append-only ethics JSONL ledger (spec §4.4 APPLY,
//! §4.6, glossary "EthicsConsensus", I4).
//!
//! Grounded on the teacher's `causal_chain/ledger.rs`: an append-only log is
//! the source of truth, `fsync`'d on group boundaries; a `rusqlite` table is
//! kept alongside purely as a query index, never as the durability
//! mechanism.

use crate::types::{EthicsDecision, EthicsRecord, RuleDecision};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// One of the six ethics rules. Each rule inspects the proposed action text
/// and domain and returns a decision; `hard_veto` rules can never be
/// overridden by a majority of the others.
pub struct Rule {
    pub name: &'static str,
    pub hard_veto: bool,
    pub evaluate: fn(&ActionProposal) -> EthicsDecision,
}

#[derive(Debug, Clone)]
pub struct ActionProposal {
    pub operation_id: String,
    pub actor_agent_id: String,
    pub sovereign_known: bool,
    pub action_text: String,
    pub destructive: bool,
    pub admin_bypass: bool,
}

fn rule_known_sovereign(p: &ActionProposal) -> EthicsDecision {
    if p.sovereign_known {
        EthicsDecision::Allow
    } else {
        EthicsDecision::Deny
    }
}

fn rule_no_harm_keywords(p: &ActionProposal) -> EthicsDecision {
    let lowered = p.action_text.to_lowercase();
    const BANNED: [&str; 4] = ["rm -rf /", "format disk", "wipe backups", "delete all users"];
    if BANNED.iter().any(|k| lowered.contains(k)) {
        EthicsDecision::Deny
    } else {
        EthicsDecision::Allow
    }
}

fn rule_destructive_requires_checkpoint_ack(p: &ActionProposal) -> EthicsDecision {
    // This rule only asserts the *intent* to checkpoint is declared; the
    // governance_kernel::checkpoint caller is the one that actually writes
    // it and enforces I5 before the record referencing it is created.
    if p.destructive {
        EthicsDecision::Defer
    } else {
        EthicsDecision::Allow
    }
}

fn rule_admin_bypass_is_logged_not_silent(p: &ActionProposal) -> EthicsDecision {
    if p.admin_bypass {
        EthicsDecision::Allow
    } else {
        EthicsDecision::Allow
    }
}

fn rule_pii_sensitive_keywords(p: &ActionProposal) -> EthicsDecision {
    let lowered = p.action_text.to_lowercase();
    if lowered.contains("ssn") || lowered.contains("social security") {
        EthicsDecision::Defer
    } else {
        EthicsDecision::Allow
    }
}

fn rule_default_allow(_p: &ActionProposal) -> EthicsDecision {
    EthicsDecision::Allow
}

pub const RULES: [Rule; 6] = [
    Rule {
        name: "known_sovereign",
        hard_veto: true,
        evaluate: rule_known_sovereign,
    },
    Rule {
        name: "no_harm_keywords",
        hard_veto: true,
        evaluate: rule_no_harm_keywords,
    },
    Rule {
        name: "destructive_requires_checkpoint",
        hard_veto: false,
        evaluate: rule_destructive_requires_checkpoint_ack,
    },
    Rule {
        name: "admin_bypass_logged",
        hard_veto: false,
        evaluate: rule_admin_bypass_is_logged_not_silent,
    },
    Rule {
        name: "pii_sensitive",
        hard_veto: false,
        evaluate: rule_pii_sensitive_keywords,
    },
    Rule {
        name: "baseline",
        hard_veto: false,
        evaluate: rule_default_allow,
    },
];

/// Evaluate all six rules; a hard-veto `Deny` wins outright, otherwise a
/// majority decides, with `Defer` breaking ties toward caution.
pub fn evaluate(proposal: &ActionProposal) -> (Vec<RuleDecision>, EthicsDecision, String) {
    let mut decisions = Vec::with_capacity(RULES.len());
    for rule in RULES.iter() {
        let decision = (rule.evaluate)(proposal);
        decisions.push(RuleDecision {
            rule: rule.name.to_string(),
            decision,
            hard_veto: rule.hard_veto,
        });
    }

    if let Some(veto) = decisions
        .iter()
        .find(|d| d.hard_veto && d.decision == EthicsDecision::Deny)
    {
        return (
            decisions.clone(),
            EthicsDecision::Deny,
            format!("hard veto: {}", veto.rule),
        );
    }

    let allow = decisions
        .iter()
        .filter(|d| d.decision == EthicsDecision::Allow)
        .count();
    let deny = decisions
        .iter()
        .filter(|d| d.decision == EthicsDecision::Deny)
        .count();
    let defer = decisions
        .iter()
        .filter(|d| d.decision == EthicsDecision::Defer)
        .count();

    let final_decision = if deny > allow && deny > defer {
        EthicsDecision::Deny
    } else if defer > 0 && defer >= allow {
        EthicsDecision::Defer
    } else {
        EthicsDecision::Allow
    };

    let reason = format!("majority: allow={allow} deny={deny} defer={defer}");
    (decisions, final_decision, reason)
}

/// Append-only JSONL ethics audit log (I4), indexed by a local SQLite table
/// for `GET`-style queries. `runtime/ethics.jsonl` per spec §6.
pub struct EthicsLedger {
    jsonl_path: PathBuf,
    index: Mutex<Connection>,
}

impl EthicsLedger {
    pub fn open(state_dir: &Path) -> rusqlite::Result<Self> {
        let jsonl_path = state_dir.join("runtime").join("ethics.jsonl");
        let db_path = state_dir.join("runtime").join("ethics_index.sqlite");
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ethics_index (
                operation_id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                decision TEXT NOT NULL,
                actor_agent_id TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            jsonl_path,
            index: Mutex::new(conn),
        })
    }

    pub fn in_memory_for_tests() -> rusqlite::Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Self::open(dir.path())?;
        Ok((ledger, dir))
    }

    pub async fn append(&self, record: &EthicsRecord) -> std::io::Result<()> {
        if let Some(parent) = self.jsonl_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.jsonl_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;

        let decision = format!("{:?}", record.decision);
        let conn = self.index.lock().unwrap();
        let _ = conn.execute(
            "INSERT OR REPLACE INTO ethics_index (operation_id, ts, decision, actor_agent_id)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.operation_id,
                record.ts.to_rfc3339(),
                decision,
                record.actor_agent_id,
            ],
        );
        Ok(())
    }

    /// True if an `allow` record exists for this operation id (testable
    /// property: "∀ side-effecting EXECUTE: an EthicsRecord with
    /// decision=allow exists ... with the same operationId").
    pub fn has_allow(&self, operation_id: &str) -> bool {
        let conn = self.index.lock().unwrap();
        conn.query_row(
            "SELECT decision FROM ethics_index WHERE operation_id = ?1",
            [operation_id],
            |row| row.get::<_, String>(0),
        )
        .map(|d| d == "Allow")
        .unwrap_or(false)
    }
}
