//! Cell 0 OS core library.
//!
//! A self-hosted, multi-channel sovereign-agent control plane: channel
//! adapters normalize inbound chat traffic into a single event type, the
//! gateway owns sessions and serves HTTP/WebSocket, the COL pipeline governs
//! every intent (STOP -> CLASSIFY -> LOAD -> APPLY -> EXECUTE), the agent
//! mesh dispatches to capability-scoped agents, and the meta-agent loop
//! drives scheduled self-improvement on top of the same governed pipeline.

pub mod agents;
pub mod budget;
pub mod channel;
pub mod checkpoint;
pub mod cli;
pub mod col;
pub mod config;
pub mod error;
pub mod eventbus;
pub mod ethics;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod meta_agent;
pub mod capabilities;
mod runtime;
pub mod sandbox;
pub mod session;
pub mod skills;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use error::{CellError, CellResult};
pub use runtime::run_foreground;
