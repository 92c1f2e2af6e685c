// Training module
// Epoch/step loop, checkpoint discovery, and learning-rate schedules

pub mod checkpoint;
mod orchestrator;
mod schedule;
mod state;

pub use orchestrator::{Orchestrator, RunPhase, RunSummary};
pub use schedule::{LrSchedule, SchedulerKind};
pub use state::TrainerState;
