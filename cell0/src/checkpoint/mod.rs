//! Checkpoint/continuity subsystem (spec §3 Checkpoint, §4.8, I5, I6).
//!
//! Grounded on the teacher's `chat/checkpoint.rs` `CheckpointStore` trait
//! and `InMemoryCheckpointStore`, extended with the compression + checksum
//! the spec requires: `bincode` serialize, `flate2` gzip-compress, `sha2`
//! checksum, stored under `runtime/sessions/<id>/checkpoints/`.

use crate::error::{CellError, CellResult};
use crate::session::Session;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    /// gzip-compressed bincode-serialized `Session`.
    pub state_blob: Vec<u8>,
    pub checksum: String,
}

fn checksum_of(blob: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(blob);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl Checkpoint {
    pub fn create(session: &Session, parent_id: Option<String>, reason: &str) -> CellResult<Self> {
        let serialized = bincode::serialize(session).map_err(CellError::internal)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized).map_err(CellError::internal)?;
        let state_blob = encoder.finish().map_err(CellError::internal)?;
        let checksum = checksum_of(&state_blob);
        Ok(Self {
            id: format!("ckpt_{}", uuid::Uuid::new_v4()),
            session_id: session.id.clone(),
            parent_id,
            created_at: Utc::now(),
            reason: reason.to_string(),
            state_blob,
            checksum,
        })
    }

    fn verify(&self) -> bool {
        checksum_of(&self.state_blob) == self.checksum
    }

    pub fn restore(&self) -> CellResult<Session> {
        if !self.verify() {
            return Err(CellError::CheckpointCorrupt(self.id.clone()));
        }
        let mut decoder = GzDecoder::new(self.state_blob.as_slice());
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| CellError::CheckpointCorrupt(format!("{}: {e}", self.id)))?;
        bincode::deserialize(&raw).map_err(|e| CellError::CheckpointCorrupt(format!("{}: {e}", self.id)))
    }
}

pub trait CheckpointStore: Send + Sync {
    fn store(&self, checkpoint: Checkpoint) -> CellResult<()>;
    fn get(&self, id: &str) -> CellResult<Option<Checkpoint>>;
    fn list_for_session(&self, session_id: &str) -> CellResult<Vec<Checkpoint>>;
}

pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn store(&self, checkpoint: Checkpoint) -> CellResult<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    fn get(&self, id: &str) -> CellResult<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().unwrap().get(id).cloned())
    }

    fn list_for_session(&self, session_id: &str) -> CellResult<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// File-backed store under `runtime/sessions/<id>/checkpoints/<ckpt_id>.ckpt`
/// (spec §6 filesystem layout).
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join("runtime").join("sessions"),
        }
    }

    fn path_for(&self, session_id: &str, id: &str) -> PathBuf {
        self.root
            .join(session_id)
            .join("checkpoints")
            .join(format!("{id}.ckpt"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn store(&self, checkpoint: Checkpoint) -> CellResult<()> {
        let path = self.path_for(&checkpoint.session_id, &checkpoint.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CellError::internal)?;
        }
        let raw = serde_json::to_vec(&checkpoint).map_err(CellError::internal)?;
        std::fs::write(&path, raw).map_err(CellError::internal)?;
        Ok(())
    }

    fn get(&self, id: &str) -> CellResult<Option<Checkpoint>> {
        // Session id is unknown here; scan. Acceptable for the modest
        // per-session checkpoint counts this system expects.
        if !self.root.exists() {
            return Ok(None);
        }
        for session_dir in std::fs::read_dir(&self.root).map_err(CellError::internal)? {
            let session_dir = session_dir.map_err(CellError::internal)?;
            let candidate = session_dir.path().join("checkpoints").join(format!("{id}.ckpt"));
            if candidate.exists() {
                let raw = std::fs::read(&candidate).map_err(CellError::internal)?;
                let ckpt: Checkpoint = serde_json::from_slice(&raw).map_err(CellError::internal)?;
                return Ok(Some(ckpt));
            }
        }
        Ok(None)
    }

    fn list_for_session(&self, session_id: &str) -> CellResult<Vec<Checkpoint>> {
        let dir = self.root.join(session_id).join("checkpoints");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(CellError::internal)? {
            let entry = entry.map_err(CellError::internal)?;
            let raw = std::fs::read(entry.path()).map_err(CellError::internal)?;
            if let Ok(ckpt) = serde_json::from_slice::<Checkpoint>(&raw) {
                out.push(ckpt);
            }
        }
        Ok(out)
    }
}

/// Walk the parent chain looking for the first checkpoint that verifies
/// (spec §4.8 "Restoration verifies checksum; a mismatched checksum marks
/// the checkpoint corrupted and walks the parent chain").
pub fn restore_with_fallback(
    store: &dyn CheckpointStore,
    start_id: &str,
) -> CellResult<Session> {
    let mut current_id = start_id.to_string();
    loop {
        let Some(ckpt) = store.get(&current_id)? else {
            return Err(CellError::NotFound(format!("checkpoint {current_id}")));
        };
        match ckpt.restore() {
            Ok(session) => return Ok(session),
            Err(CellError::CheckpointCorrupt(_)) => match ckpt.parent_id.clone() {
                Some(parent) => {
                    tracing::warn!(checkpoint = %current_id, "checkpoint corrupt, walking to parent {parent}");
                    current_id = parent;
                }
                None => {
                    return Err(CellError::CheckpointCorrupt(format!(
                        "root checkpoint {current_id} corrupt, no parent to fall back to"
                    )))
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::types::{Domain, PolicyProfile, Role};

    fn sample_session() -> Session {
        let mut s = Session::new(
            "sess_1".into(),
            "sov-1".into(),
            Domain::Communication,
            "chat-1".into(),
            PolicyProfile::Standard,
        );
        s.push_log(Role::User, "hello world");
        s
    }

    #[test]
    fn create_then_restore_roundtrips() {
        let session = sample_session();
        let ckpt = Checkpoint::create(&session, None, "test").unwrap();
        let restored = ckpt.restore().unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.message_log.len(), session.message_log.len());
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let session = sample_session();
        let mut ckpt = Checkpoint::create(&session, None, "test").unwrap();
        ckpt.state_blob[0] ^= 0xFF;
        let err = ckpt.restore().unwrap_err();
        assert!(matches!(err, CellError::CheckpointCorrupt(_)));
    }

    #[test]
    fn restore_with_fallback_walks_to_parent_on_corruption() {
        let store = InMemoryCheckpointStore::new();
        let session = sample_session();
        let root = Checkpoint::create(&session, None, "root").unwrap();
        store.store(root.clone()).unwrap();

        let mut child = Checkpoint::create(&session, Some(root.id.clone()), "child").unwrap();
        child.state_blob[0] ^= 0xFF; // corrupt only the child
        store.store(child.clone()).unwrap();

        let restored = restore_with_fallback(&store, &child.id).unwrap();
        assert_eq!(restored.id, session.id);
    }
}
