pub mod conflict;
pub mod context;
pub mod customers;
pub mod financial;
pub mod images;
pub mod items;
pub mod orchestrator;
pub mod orders;
pub mod outcome;
pub mod pairing;

pub use conflict::{Action, Decision, Reason, decide};
pub use context::SyncContext;
pub use orchestrator::Orchestrator;
pub use outcome::{CycleOutcome, CyclePhase, OutcomeLog, SweepReport};
pub use pairing::{ItemTarget, OrderTarget};
