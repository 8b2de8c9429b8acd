//! Step-execution runtime
//!
//! This crate provides the engine that advances workers through their
//! workflows: transition resolution, the step executor, fork/split/join
//! orchestration, the work-order lifecycle, and the multi-worker lock
//! discipline. All durable state lives behind the `stepcore` collaborator
//! traits, so the engine itself is stateless between steps.

mod branch;
pub mod context;
mod engine;
mod executor;
mod lifecycle;
mod lock;
pub mod naming;
mod registry;
mod transition;

pub use engine::{EngineConfig, StepEngine, StepEngineBuilder};
pub use lifecycle::{aggregate_status, initial_args_hash, ROOT_WORKER_ID};
pub use registry::InvocableRegistry;
pub use transition::resolve_transition;
