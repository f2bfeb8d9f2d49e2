// src/client/mod.rs

//! Caller side of the script agent: the transport seam and the orchestrator
//! that runs a script end to end through it.

pub mod orchestrator;
pub mod transport;

pub use orchestrator::{ScriptExecutionOrchestrator, ScriptExecutionResult};
pub use transport::{InProcessTransport, ScriptServiceTransport};
