//! Configuration loading (spec §6 env vars, `cell0 config init|validate|show`).
//!
//! Migrated from the teacher's `AgentConfig` pattern: a single serde+
//! `validator`-annotated struct, loaded from TOML with environment overrides,
//! defaults matching the documented spec defaults.

mod types;

pub use types::{CellConfig, GatewayConfig, MetaAgentConfig, StorageConfig};

use crate::error::{CellError, CellResult};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Resolve `$CELL0_CONFIG_DIR/cell0.toml`, falling back to `./cell0.toml`.
pub fn config_path() -> PathBuf {
    let dir = std::env::var("CELL0_CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
    Path::new(&dir).join("cell0.toml")
}

/// Load config from disk, applying environment overrides, then validate.
pub fn load() -> CellResult<CellConfig> {
    let path = config_path();
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| CellError::Validation(format!("reading {}: {e}", path.display())))?;
        toml::from_str::<CellConfig>(&raw)
            .map_err(|e| CellError::Validation(format!("parsing {}: {e}", path.display())))?
    } else {
        CellConfig::default()
    };
    cfg.apply_env_overrides();
    cfg.validate()
        .map_err(|e| CellError::Validation(e.to_string()))?;
    Ok(cfg)
}

/// `cell0 config init`: write the default config to `config_path()` unless
/// it already exists.
pub fn init(force: bool) -> CellResult<PathBuf> {
    let path = config_path();
    if path.exists() && !force {
        return Err(CellError::Validation(format!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(CellError::internal)?;
    }
    let toml = toml::to_string_pretty(&CellConfig::default()).map_err(CellError::internal)?;
    std::fs::write(&path, toml).map_err(CellError::internal)?;
    Ok(path)
}

/// `cell0 config validate`: load + validate, returning Ok(()) or the error.
pub fn validate() -> CellResult<()> {
    load().map(|_| ())
}
