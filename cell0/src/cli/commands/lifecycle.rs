//! `start`/`stop`/`status`/`health` (spec §6 CLI surface).

use super::{pid_file_path, read_live_pid};
use crate::cli::{
    EXIT_ALREADY_RUNNING, EXIT_CONFIG_INVALID, EXIT_HEALTH_FAIL, EXIT_NOT_RUNNING, EXIT_OK,
};

pub async fn start() -> i32 {
    let cfg = match crate::config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config invalid: {e}");
            return EXIT_CONFIG_INVALID;
        }
    };

    if let Some(pid) = read_live_pid(&cfg.storage.state_dir) {
        eprintln!("cell0 already running (pid {pid})");
        return EXIT_ALREADY_RUNNING;
    }

    let pid_path = pid_file_path(&cfg.storage.state_dir);
    if let Some(parent) = pid_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create {}: {e}", parent.display());
            return EXIT_CONFIG_INVALID;
        }
    }
    if let Err(e) = std::fs::write(&pid_path, std::process::id().to_string()) {
        eprintln!("failed to write pid file: {e}");
        return EXIT_CONFIG_INVALID;
    }

    let result = crate::run_foreground(cfg).await;
    let _ = std::fs::remove_file(&pid_path);

    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("cell0 exited: {e}");
            EXIT_HEALTH_FAIL
        }
    }
}

pub async fn stop() -> i32 {
    let cfg = match crate::config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config invalid: {e}");
            return EXIT_CONFIG_INVALID;
        }
    };

    match read_live_pid(&cfg.storage.state_dir) {
        Some(pid) => {
            #[cfg(unix)]
            {
                // SIGTERM; the running process's own signal handler drains
                // and exits, removing its own PID file.
                unsafe {
                    extern "C" {
                        fn kill(pid: i32, sig: i32) -> i32;
                    }
                    kill(pid, 15);
                }
            }
            EXIT_OK
        }
        None => {
            eprintln!("cell0 is not running");
            EXIT_NOT_RUNNING
        }
    }
}

pub async fn status() -> i32 {
    let cfg = match crate::config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config invalid: {e}");
            return EXIT_CONFIG_INVALID;
        }
    };

    match read_live_pid(&cfg.storage.state_dir) {
        Some(pid) => {
            println!("running (pid {pid})");
            EXIT_OK
        }
        None => {
            println!("not running");
            EXIT_NOT_RUNNING
        }
    }
}

pub async fn health() -> i32 {
    let cfg = match crate::config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config invalid: {e}");
            return EXIT_CONFIG_INVALID;
        }
    };

    if read_live_pid(&cfg.storage.state_dir).is_none() {
        eprintln!("cell0 is not running");
        return EXIT_NOT_RUNNING;
    }

    for port in cfg.gateway.port_range_start..=cfg.gateway.port_range_end {
        let url = format!("http://{}:{port}/api/system/health", cfg.gateway.host);
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.status().is_success() {
                println!("healthy on port {port}");
                return EXIT_OK;
            }
        }
    }

    eprintln!("health check failed: no port in range responded");
    EXIT_HEALTH_FAIL
}
