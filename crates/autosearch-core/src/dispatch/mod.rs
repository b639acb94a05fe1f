//! Trigger dispatch
//!
//! - [`TriggerQueue`]: priority backlog of admitted triggers
//! - [`ConcurrencyGate`]: in-flight limit and minimum dispatch interval
//! - [`SearchDispatcher`]: the engine handle tying everything together

mod dispatcher;
mod gate;
mod queue;
mod signal;

pub use dispatcher::{
    AUTONOMOUS_CONTEXT, DispatcherBuilder, REPORT_CONTEXT, SearchDispatcher, SubmitOutcome,
    TriggerStatus,
};
pub use gate::{ConcurrencyGate, GateDecision};
pub use queue::TriggerQueue;
pub use signal::EngineSignal;
