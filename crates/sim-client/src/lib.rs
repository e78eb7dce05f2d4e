//! sim-client - HTTP client for the 8085 assembler/simulator service.
//!
//! The service executes assembly, assembles listings, resets the simulated
//! processor, and serves per-instruction documentation and timing diagrams.
//! Its responses come in several loosely-typed JSON shapes; this crate
//! normalizes all of them into [`ExecutionResult`] and [`ProcessorUpdate`]
//! so nothing downstream touches raw JSON.

use std::time::Duration;

pub mod client;
pub mod docs;
pub mod response;
pub mod result;

pub use client::{Backend, ClientError, SimClient};
pub use docs::{parse_documentation, DocSections};
pub use response::{Execution, ProcessorUpdate};
pub use result::{ErrorDetail, ErrorKind, ErrorOutput, ExecutionResult, ProcessorSnapshot};

/// Backend address used when no setting or flag overrides it.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8085";

/// Per-request timeout for simulator calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Timeout for `GET /health` probes.
pub const HEALTH_TIMEOUT: Duration = Duration::from_millis(5_000);
