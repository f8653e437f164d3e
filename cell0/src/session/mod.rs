//! Session ownership (spec §3 Session, §4.2 Gateway responsibility #3).
//!
//! Grounded on the teacher's `chat/session.rs` `SessionRegistry`: an
//! in-memory map guarded by a lock, with an append-only JSONL persistence
//! path so sessions survive a gateway restart (I6).

use crate::types::{AgentDescriptor, Content, LogEntry, PolicyProfile, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bound on the tail kept in-memory before older entries spill to the
/// memory store (spec §3 `messageLog` compaction policy).
pub const MESSAGE_LOG_TAIL_TOKENS: usize = 4_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub sovereign_id: String,
    pub domain: crate::types::Domain,
    pub conversation_key: String,
    pub message_log: VecDeque<LogEntry>,
    pub context: HashMap<String, serde_json::Value>,
    pub active_agent_ids: HashSet<String>,
    pub last_checkpoint_id: Option<String>,
    pub parent_checkpoint_id: Option<String>,
    pub policy_profile: PolicyProfile,
    /// Set by a `SandboxViolation` (§8 scenario 6); forces the next intent
    /// back through APPLY instead of reusing a cached policy decision.
    pub tainted: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: String,
        sovereign_id: String,
        domain: crate::types::Domain,
        conversation_key: String,
        policy_profile: PolicyProfile,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            sovereign_id,
            domain,
            conversation_key,
            message_log: VecDeque::new(),
            context: HashMap::new(),
            active_agent_ids: HashSet::new(),
            last_checkpoint_id: None,
            parent_checkpoint_id: None,
            policy_profile,
            tainted: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn push_log(&mut self, role: Role, content: impl Into<String>) {
        self.message_log.push_back(LogEntry {
            role,
            content: content.into(),
            ts: Utc::now(),
        });
        self.compact();
        self.last_activity = Utc::now();
    }

    /// Keep the tail by a rough token estimate (chars/4); callers that need
    /// exact accounting should consult `budget`. Older entries are the
    /// caller's responsibility to spill into the memory store before
    /// calling this (see `memory::spill_overflow`).
    fn compact(&mut self) {
        let mut total: usize = self
            .message_log
            .iter()
            .map(|e| e.content.len() / 4 + 1)
            .sum();
        while total > MESSAGE_LOG_TAIL_TOKENS {
            let Some(front) = self.message_log.pop_front() else {
                break;
            };
            total = total.saturating_sub(front.content.len() / 4 + 1);
        }
    }

    pub fn taint(&mut self) {
        self.tainted = true;
    }

    pub fn clear_taint(&mut self) {
        self.tainted = false;
    }
}

/// Conversation scope key the gateway uses to look up/create sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub sovereign_id: String,
    pub domain: crate::types::Domain,
    pub conversation_key: String,
}

impl SessionKey {
    fn storage_key(&self) -> String {
        format!(
            "{}::{:?}::{}",
            self.sovereign_id, self.domain, self.conversation_key
        )
    }
}

/// Exclusive owner of `Session` state (spec §3 Ownership).
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    by_key: Arc<RwLock<HashMap<String, String>>>,
    persist_path: Option<PathBuf>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            by_key: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
        }
    }

    pub fn new_with_persistence(path: impl Into<PathBuf>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            by_key: Arc::new(RwLock::new(HashMap::new())),
            persist_path: Some(path.into()),
        }
    }

    /// Upsert: return the existing session for `key`, or create one with
    /// `domain` freshly classified by the caller (spec §4.2 step 2-3).
    pub async fn get_or_create(
        &self,
        key: &SessionKey,
        policy_profile: PolicyProfile,
    ) -> Session {
        let storage_key = key.storage_key();
        {
            let by_key = self.by_key.read().await;
            if let Some(id) = by_key.get(&storage_key) {
                let sessions = self.sessions.read().await;
                if let Some(s) = sessions.get(id) {
                    return s.clone();
                }
            }
        }
        let id = format!("sess_{}", uuid::Uuid::new_v4());
        let session = Session::new(
            id.clone(),
            key.sovereign_id.clone(),
            key.domain,
            key.conversation_key.clone(),
            policy_profile,
        );
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), session.clone());
        }
        {
            let mut by_key = self.by_key.write().await;
            by_key.insert(storage_key, id);
        }
        self.append_to_disk(&session).await;
        session
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Mutate a session under its lock (spec §5 "per-session lock").
    pub async fn mutate<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            f(session);
            let snapshot = session.clone();
            drop(sessions);
            self.append_to_disk(&snapshot).await;
        }
    }

    /// Periodic flush hook (spec §4.2 "flush_interval"): re-append every
    /// session's current state. The hot path (`mutate`) already appends
    /// per-mutation, so this exists for a belt-and-suspenders timer flush.
    pub async fn flush_all(&self) {
        let snapshot: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        for s in snapshot {
            self.append_to_disk(&s).await;
        }
    }

    async fn append_to_disk(&self, session: &Session) {
        let Some(path) = &self.persist_path else { return };
        let Ok(line) = serde_json::to_string(session) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        use tokio::io::AsyncWriteExt;
        if let Ok(mut file) = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
            let _ = file.sync_data().await;
        }
    }

    /// Restore all sessions from a JSONL log (I6): the latest line per
    /// session id wins since each mutation appends a full snapshot.
    pub async fn restore_from_disk(path: &Path) -> std::io::Result<Self> {
        let registry = Self::new_with_persistence(path.to_path_buf());
        if !path.exists() {
            return Ok(registry);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let mut latest: HashMap<String, Session> = HashMap::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(session) = serde_json::from_str::<Session>(line) {
                latest.insert(session.id.clone(), session);
            }
        }
        {
            let mut sessions = registry.sessions.write().await;
            let mut by_key = registry.by_key.write().await;
            for (id, session) in latest {
                let key = SessionKey {
                    sovereign_id: session.sovereign_id.clone(),
                    domain: session.domain,
                    conversation_key: session.conversation_key.clone(),
                };
                by_key.insert(key.storage_key(), id.clone());
                sessions.insert(id, session);
            }
        }
        Ok(registry)
    }

    pub async fn attach_agent(&self, id: &str, agent: &AgentDescriptor) {
        self.mutate(id, |s| {
            s.active_agent_ids.insert(agent.id.clone());
        })
        .await;
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
