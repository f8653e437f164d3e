//! Memory & Checkpoint Store (spec §4.8, C3) — the two non-checkpoint
//! tiers: daily log and long-term notes. Scratch memory is `Session.context`
//! and lives entirely in `crate::session`.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only daily log entry, one file per day under
/// `runtime/memory/daily/<sovereign-or-session>/<YYYY-MM-DD>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLogEntry {
    pub ts: chrono::DateTime<Utc>,
    pub session_id: String,
    pub role: crate::types::Role,
    pub content: String,
}

pub struct DailyLog {
    root: PathBuf,
}

impl DailyLog {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join("runtime").join("memory").join("daily"),
        }
    }

    fn path_for(&self, scope: &str, date: NaiveDate) -> PathBuf {
        self.root.join(scope).join(format!("{date}.jsonl"))
    }

    pub async fn append(&self, scope: &str, entry: DailyLogEntry) -> std::io::Result<()> {
        let path = self.path_for(scope, entry.ts.date_naive());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = serde_json::to_string(&entry)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn read_day(&self, scope: &str, date: NaiveDate) -> std::io::Result<Vec<DailyLogEntry>> {
        let path = self.path_for(scope, date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(raw
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

/// Curated, keyed long-term note used by COL's LOAD phase (spec §4.4) to
/// build the memory context slice. Stored per-domain under
/// `runtime/memory/<domain>.vec` (spec §6) — here a flat JSON map rather
/// than an actual vector index, since embedding generation is an external
/// capability provider concern (spec §1 out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermNote {
    pub key: String,
    pub domain: crate::types::Domain,
    pub text: String,
    pub updated_at: chrono::DateTime<Utc>,
}

pub struct LongTermNotes {
    root: PathBuf,
}

impl LongTermNotes {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join("runtime").join("memory"),
        }
    }

    fn path_for(&self, domain: crate::types::Domain) -> PathBuf {
        self.root.join(format!("{domain:?}.vec"))
    }

    pub fn upsert(&self, note: &LongTermNote) -> std::io::Result<()> {
        let path = self.path_for(note.domain);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut notes = self.load_all(note.domain)?;
        notes.retain(|n| n.key != note.key);
        notes.push(note.clone());
        std::fs::write(&path, serde_json::to_string(&notes)?)
    }

    fn load_all(&self, domain: crate::types::Domain) -> std::io::Result<Vec<LongTermNote>> {
        let path = self.path_for(domain);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    /// Naive substring match over the domain's notes, bounded to `limit`
    /// results — a stand-in for real semantic retrieval (external capability
    /// provider territory, spec §1).
    pub fn matching(
        &self,
        domain: crate::types::Domain,
        query: &str,
        limit: usize,
    ) -> std::io::Result<Vec<LongTermNote>> {
        let needle = query.to_lowercase();
        let mut notes = self.load_all(domain)?;
        notes.retain(|n| n.text.to_lowercase().contains(&needle));
        notes.truncate(limit);
        Ok(notes)
    }

    pub fn path_root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, Role};

    #[tokio::test]
    async fn daily_log_roundtrips_within_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = DailyLog::new(dir.path());
        let entry = DailyLogEntry {
            ts: Utc::now(),
            session_id: "sess-1".into(),
            role: Role::User,
            content: "hi".into(),
        };
        log.append("sov-1", entry.clone()).await.unwrap();
        let entries = log.read_day("sov-1", entry.ts.date_naive()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "hi");
    }

    #[test]
    fn long_term_notes_upsert_then_match() {
        let dir = tempfile::tempdir().unwrap();
        let notes = LongTermNotes::new(dir.path());
        notes
            .upsert(&LongTermNote {
                key: "file-x-summary".into(),
                domain: Domain::Research,
                text: "File X contains quarterly revenue figures".into(),
                updated_at: Utc::now(),
            })
            .unwrap();
        let found = notes.matching(Domain::Research, "revenue", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "file-x-summary");
    }
}
