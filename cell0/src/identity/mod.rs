//! Sovereign Identity Verification (spec §4.2, I1).
//!
//! The allowlist under `identity/` maps `(channel, sender)` to a stable
//! `sovereign_id`. Unknown identities are rejected before entering COL; the
//! rejection itself is recorded as an ethics-deny audit line by the caller
//! (see `ethics::deny_unknown_sovereign`), never silently dropped.

use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub sovereign_id: String,
    pub channel: Channel,
    pub sender: String,
    pub policy_profile: crate::types::PolicyProfile,
}

/// Allowlist of sovereign identities, read-mostly, admin-only writes
/// (`identity/` under `state_dir`, spec §6 filesystem layout).
pub struct IdentityAllowlist {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<(Channel, String), IdentityEntry>>,
}

impl IdentityAllowlist {
    pub fn empty() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load a JSON array of `IdentityEntry` from `state_dir/identity/allowlist.json`.
    /// Missing file is treated as an empty (fail-closed) allowlist.
    pub fn load(state_dir: &Path) -> std::io::Result<Self> {
        let path = state_dir.join("identity").join("allowlist.json");
        let mut entries = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let list: Vec<IdentityEntry> = serde_json::from_str(&raw).unwrap_or_default();
            for entry in list {
                entries.insert((entry.channel, entry.sender.clone()), entry);
            }
        }
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Resolve `(channel, sender)` to a sovereign id (I1). `None` means the
    /// caller MUST reject the message before it ever reaches COL.
    pub fn resolve(&self, channel: Channel, sender: &str) -> Option<IdentityEntry> {
        self.entries
            .read()
            .unwrap()
            .get(&(channel, sender.to_string()))
            .cloned()
    }

    /// Admin-only write: add or update an allowlist entry, persisting to disk
    /// if a path is configured.
    pub fn upsert(&self, entry: IdentityEntry) -> std::io::Result<()> {
        {
            let mut guard = self.entries.write().unwrap();
            guard.insert((entry.channel, entry.sender.clone()), entry);
        }
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.read().unwrap();
        let list: Vec<&IdentityEntry> = entries.values().collect();
        let raw = serde_json::to_string_pretty(&list)?;
        std::fs::write(path, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyProfile;

    #[test]
    fn unknown_sender_resolves_to_none() {
        let allow = IdentityAllowlist::empty();
        assert!(allow.resolve(Channel::Telegram, "+10000000000").is_none());
    }

    #[test]
    fn upsert_then_resolve_roundtrips() {
        let allow = IdentityAllowlist::empty();
        allow
            .upsert(IdentityEntry {
                sovereign_id: "sov-1".into(),
                channel: Channel::Telegram,
                sender: "+15551234".into(),
                policy_profile: PolicyProfile::Standard,
            })
            .unwrap();
        let resolved = allow.resolve(Channel::Telegram, "+15551234").unwrap();
        assert_eq!(resolved.sovereign_id, "sov-1");
    }
}
