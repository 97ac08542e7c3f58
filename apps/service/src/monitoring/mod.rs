//! Probing stages: the scheduler that decides what is due and the caller
//! that probes it.

pub mod caller;
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod types;

pub use caller::Caller;
pub use executor::ProbeExecutor;
pub use scheduler::Scheduler;
