//! STOP phase (spec §4.4): record an intent entry and coalesce against any
//! in-flight pipeline carrying the same fingerprint (I3). Also the seat of
//! the durable idempotency guarantee: re-submitting an already-acked
//! `operationId`/fingerprint must return the prior result even across a
//! crash-restart, not just while the original run is still in memory.

use crate::agents::AgentResult;
use crate::error::{CellError, CellResult};
use crate::utils::hash::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub fn intent_fingerprint(sovereign_id: &str, domain: &str, canonicalized_content: &str) -> String {
    sha256_hex(&[sovereign_id, domain, canonicalized_content])
}

/// `Arc`-wrapped so the channel carries a `Clone`-able value without
/// requiring `CellError` itself to implement `Clone` (it wraps `anyhow::Error`,
/// which does not).
type SharedOutcome = Arc<CellResult<Arc<AgentResult>>>;

enum InFlight {
    Running(broadcast::Sender<SharedOutcome>),
}

/// `CellResult<AgentResult>` flattened into a form that round-trips through
/// JSON, since `CellError` itself does not (it wraps `anyhow::Error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistedOutcome {
    Ok { payload: serde_json::Value },
    Err { code: String, reason: String },
}

impl PersistedOutcome {
    pub fn from_result(result: &CellResult<Arc<AgentResult>>) -> Self {
        match result {
            Ok(r) => Self::Ok {
                payload: r.payload.clone(),
            },
            Err(e) => Self::Err {
                code: e.code().to_string(),
                reason: e.reason(),
            },
        }
    }

    pub fn into_result(self) -> CellResult<Arc<AgentResult>> {
        match self {
            Self::Ok { payload } => Ok(Arc::new(AgentResult { payload })),
            Self::Err { code, reason } => Err(CellError::from_persisted(&code, reason)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotentRecord {
    pub operation_id: String,
    pub outcome: PersistedOutcome,
}

/// Durable idempotency ledger, keyed by intent fingerprint (spec §4.4 I3:
/// "re-submitting an already-acked `operationId` returns the prior result").
/// Mirrors `CheckpointStore`'s trait + in-memory/file-backed pair.
pub trait IdempotencyStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> CellResult<Option<IdempotentRecord>>;
    fn put(&self, fingerprint: &str, record: IdempotentRecord) -> CellResult<()>;
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: std::sync::Mutex<HashMap<String, IdempotentRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, fingerprint: &str) -> CellResult<Option<IdempotentRecord>> {
        Ok(self.records.lock().unwrap().get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &str, record: IdempotentRecord) -> CellResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(fingerprint.to_string(), record);
        Ok(())
    }
}

/// File-backed store under `runtime/sessions/idempotency/<fingerprint>.json`
/// (spec §6 filesystem layout), one record per fingerprint so a restart
/// recovers every acked operation without replaying EXECUTE.
pub struct FileIdempotencyStore {
    root: PathBuf,
}

impl FileIdempotencyStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join("runtime").join("idempotency"),
        }
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.root.join(format!("{fingerprint}.json"))
    }
}

impl IdempotencyStore for FileIdempotencyStore {
    fn get(&self, fingerprint: &str) -> CellResult<Option<IdempotentRecord>> {
        let path = self.path_for(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path).map_err(CellError::internal)?;
        let record = serde_json::from_slice(&raw).map_err(CellError::internal)?;
        Ok(Some(record))
    }

    fn put(&self, fingerprint: &str, record: IdempotentRecord) -> CellResult<()> {
        std::fs::create_dir_all(&self.root).map_err(CellError::internal)?;
        let raw = serde_json::to_vec(&record).map_err(CellError::internal)?;
        std::fs::write(self.path_for(fingerprint), raw).map_err(CellError::internal)?;
        Ok(())
    }
}

/// Tracks fingerprints currently executing so duplicate intents attach to
/// the same future instead of re-running the pipeline (I3), and consults a
/// durable store first so a fingerprint acked by a prior process replays
/// its recorded result instead of re-entering EXECUTE.
pub struct CoalescingRegistry {
    inflight: Mutex<HashMap<String, InFlight>>,
    durable: Option<Arc<dyn IdempotencyStore>>,
}

pub enum StopOutcome {
    /// This caller owns the pipeline run; it must call `complete` when done.
    Lead { operation_id: String },
    /// An identical intent is already in flight; await its result instead.
    Coalesced {
        receiver: broadcast::Receiver<SharedOutcome>,
    },
    /// A prior process already completed and durably recorded this
    /// fingerprint; the pipeline must not re-run EXECUTE.
    Replayed {
        operation_id: String,
        result: CellResult<Arc<AgentResult>>,
    },
}

impl Default for CoalescingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoalescingRegistry {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            durable: None,
        }
    }

    pub fn with_durable_store(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            durable: Some(store),
        }
    }

    pub async fn stop(&self, fingerprint: &str) -> StopOutcome {
        let mut map = self.inflight.lock().await;
        if let Some(InFlight::Running(sender)) = map.get(fingerprint) {
            return StopOutcome::Coalesced {
                receiver: sender.subscribe(),
            };
        }
        if let Some(durable) = &self.durable {
            if let Ok(Some(record)) = durable.get(fingerprint) {
                return StopOutcome::Replayed {
                    operation_id: record.operation_id,
                    result: record.outcome.into_result(),
                };
            }
        }
        let (tx, _rx) = broadcast::channel(1);
        map.insert(fingerprint.to_string(), InFlight::Running(tx));
        StopOutcome::Lead {
            operation_id: format!("op_{}", uuid::Uuid::new_v4()),
        }
    }

    /// Release the fingerprint lock, persist the outcome to the durable
    /// store (if configured), and notify any coalesced waiters (spec §4.4
    /// EXECUTE: "release the fingerprint lock").
    pub async fn complete(
        &self,
        fingerprint: &str,
        operation_id: &str,
        result: CellResult<Arc<AgentResult>>,
    ) {
        if let Some(durable) = &self.durable {
            let record = IdempotentRecord {
                operation_id: operation_id.to_string(),
                outcome: PersistedOutcome::from_result(&result),
            };
            if let Err(e) = durable.put(fingerprint, record) {
                tracing::warn!(error = %e, fingerprint, "failed to persist idempotency record");
            }
        }
        let mut map = self.inflight.lock().await;
        if let Some(InFlight::Running(sender)) = map.remove(fingerprint) {
            let _ = sender.send(Arc::new(result));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_inputs() {
        let a = intent_fingerprint("sov-1", "finance", "pay rent");
        let b = intent_fingerprint("sov-1", "finance", "pay rent");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn second_stop_with_same_fingerprint_coalesces() {
        let registry = CoalescingRegistry::new();
        let fp = "fp-1";
        let lead = registry.stop(fp).await;
        assert!(matches!(lead, StopOutcome::Lead { .. }));

        let second = registry.stop(fp).await;
        assert!(matches!(second, StopOutcome::Coalesced { .. }));

        registry
            .complete(fp, "op-1", Ok(Arc::new(AgentResult { payload: serde_json::json!({}) })))
            .await;

        // after completion, a fresh stop for the same fingerprint leads again
        // (no durable store configured, so nothing survives past in-flight)
        let third = registry.stop(fp).await;
        assert!(matches!(third, StopOutcome::Lead { .. }));
    }

    #[tokio::test]
    async fn durable_store_replays_result_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn IdempotencyStore> = Arc::new(FileIdempotencyStore::new(dir.path()));
        let fp = "fp-restart";

        {
            let registry = CoalescingRegistry::with_durable_store(store.clone());
            let lead = registry.stop(fp).await;
            let StopOutcome::Lead { operation_id } = lead else {
                panic!("expected Lead");
            };
            registry
                .complete(
                    fp,
                    &operation_id,
                    Ok(Arc::new(AgentResult {
                        payload: serde_json::json!({"answer": 42}),
                    })),
                )
                .await;
        }

        // Simulate a crash-restart: a fresh registry backed by the same
        // durable store replays instead of re-running EXECUTE.
        let restarted = CoalescingRegistry::with_durable_store(store);
        let outcome = restarted.stop(fp).await;
        match outcome {
            StopOutcome::Replayed { result, .. } => {
                let result = result.unwrap();
                assert_eq!(result.payload, serde_json::json!({"answer": 42}));
            }
            _ => panic!("expected Replayed"),
        }
    }

    #[tokio::test]
    async fn durable_store_replays_persisted_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn IdempotencyStore> = Arc::new(FileIdempotencyStore::new(dir.path()));
        let fp = "fp-error";

        {
            let registry = CoalescingRegistry::with_durable_store(store.clone());
            let lead = registry.stop(fp).await;
            let StopOutcome::Lead { operation_id } = lead else {
                panic!("expected Lead");
            };
            registry
                .complete(
                    fp,
                    &operation_id,
                    Err(CellError::PolicyDenied {
                        rule: "apply".to_string(),
                        reason: "budget exhausted".to_string(),
                    }),
                )
                .await;
        }

        let restarted = CoalescingRegistry::with_durable_store(store);
        match restarted.stop(fp).await {
            StopOutcome::Replayed { result, .. } => {
                assert!(matches!(result, Err(CellError::PolicyDenied { .. })));
            }
            _ => panic!("expected Replayed"),
        }
    }
}
