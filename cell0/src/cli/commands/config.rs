//! `cell0 config init|validate|show` (spec §6 CLI surface).

use crate::cli::{EXIT_CONFIG_INVALID, EXIT_OK};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default config to `$CELL0_CONFIG_DIR/cell0.toml`.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the config, printing nothing on success.
    Validate,
    /// Print the effective config (file + env overrides) as TOML.
    Show,
}

pub fn run(action: ConfigAction) -> i32 {
    match action {
        ConfigAction::Init { force } => match crate::config::init(force) {
            Ok(path) => {
                println!("wrote {}", path.display());
                EXIT_OK
            }
            Err(e) => {
                eprintln!("{e}");
                EXIT_CONFIG_INVALID
            }
        },
        ConfigAction::Validate => match crate::config::validate() {
            Ok(()) => {
                println!("config valid");
                EXIT_OK
            }
            Err(e) => {
                eprintln!("config invalid: {e}");
                EXIT_CONFIG_INVALID
            }
        },
        ConfigAction::Show => match crate::config::load() {
            Ok(cfg) => match toml::to_string_pretty(&cfg) {
                Ok(toml) => {
                    print!("{toml}");
                    EXIT_OK
                }
                Err(e) => {
                    eprintln!("failed to render config: {e}");
                    EXIT_CONFIG_INVALID
                }
            },
            Err(e) => {
                eprintln!("config invalid: {e}");
                EXIT_CONFIG_INVALID
            }
        },
    }
}
