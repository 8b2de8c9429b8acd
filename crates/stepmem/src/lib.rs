//! In-memory implementations of the engine's collaborator seams
//!
//! Everything the engine consumes as an interface — store, transport, lock
//! service, script runtime, sinks — gets a process-local implementation here,
//! plus a drive-loop harness. Used by the CLI and by the integration tests.

mod harness;
mod invocables;
mod lock;
mod script;
mod sinks;
mod store;
mod transport;

pub use harness::{run_until_idle, MemoryWorld};
pub use invocables::{EchoInvocable, FailInvocable, SetContextInvocable, SetOutputInvocable};
pub use lock::MemoryLockService;
pub use script::FnScriptRuntime;
pub use sinks::{AuditEntry, RecordingActivity, RecordingAudit, RecordingMetrics};
pub use store::MemoryStore;
pub use transport::MemoryTransport;
