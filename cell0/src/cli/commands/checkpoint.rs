//! `cell0 checkpoint create|restore` (spec §6 CLI surface, §4.8).

use crate::checkpoint::{restore_with_fallback, Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::cli::{EXIT_CONFIG_INVALID, EXIT_MISUSE, EXIT_OK};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum CheckpointAction {
    /// Snapshot a session's current state to disk.
    Create {
        #[arg(long)]
        session_id: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Restore a session from a checkpoint id, walking to a valid parent on
    /// checksum corruption.
    Restore {
        #[arg(long)]
        checkpoint_id: String,
    },
}

pub async fn run(action: CheckpointAction) -> i32 {
    let cfg = match crate::config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config invalid: {e}");
            return EXIT_CONFIG_INVALID;
        }
    };
    let state_dir = cfg.storage.state_dir.clone();
    let store = FileCheckpointStore::new(state_dir.clone());

    match action {
        CheckpointAction::Create { session_id, reason } => {
            let sessions = crate::session::SessionRegistry::new_with_persistence(
                std::path::PathBuf::from(&state_dir).join("runtime").join("sessions.jsonl"),
            );
            let Some(session) = sessions.get(&session_id).await else {
                eprintln!("no such session: {session_id}");
                return EXIT_MISUSE;
            };
            let parent_id = session.last_checkpoint_id.clone();
            match Checkpoint::create(&session, parent_id, &reason) {
                Ok(ckpt) => match store.store(ckpt.clone()) {
                    Ok(()) => {
                        println!("checkpoint {} created for session {session_id}", ckpt.id);
                        EXIT_OK
                    }
                    Err(e) => {
                        eprintln!("failed to store checkpoint: {e}");
                        EXIT_CONFIG_INVALID
                    }
                },
                Err(e) => {
                    eprintln!("failed to create checkpoint: {e}");
                    EXIT_CONFIG_INVALID
                }
            }
        }
        CheckpointAction::Restore { checkpoint_id } => {
            match restore_with_fallback(&store, &checkpoint_id) {
                Ok(session) => {
                    println!("restored session {} from checkpoint {checkpoint_id}", session.id);
                    EXIT_OK
                }
                Err(e) => {
                    eprintln!("restore failed: {e}");
                    EXIT_CONFIG_INVALID
                }
            }
        }
    }
}
