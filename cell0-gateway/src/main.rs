//! Thin gateway-only binary: no PID-file lifecycle, no `checkpoint`/`config`
//! subcommands, just "load config, run the gateway and meta-agent loop in
//! the foreground". Intended for container/systemd deployments that manage
//! process lifecycle externally rather than through `cell0 start/stop`.

use clap::Parser;

#[derive(Parser)]
#[command(name = "cell0-gateway", about = "Cell 0 OS gateway (foreground, no CLI lifecycle)")]
struct Args {
    /// Overrides `CELL0_CONFIG_DIR` for this process only.
    #[arg(long)]
    config_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cell0::telemetry::init();
    let args = Args::parse();
    if let Some(dir) = args.config_dir {
        std::env::set_var("CELL0_CONFIG_DIR", dir);
    }

    let config = cell0::config::load()?;
    cell0::run_foreground(config).await?;
    Ok(())
}
