mod base;
pub mod iggy_pipe;

pub use base::{EventBus, Severity, StatusEvent};
pub use iggy_pipe::{DispatchedWorker, IggyTransport, IggyTransportConfig, IggyWorkerSubscription};
