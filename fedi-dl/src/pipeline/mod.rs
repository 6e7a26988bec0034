//! Download pipeline: run guard, phase state machine and the controller
//! that sequences transfers and multiplexing.

mod controller;
mod guard;
mod progress;
mod state;

pub use controller::{PipelineController, PipelineReport, PipelineRun};
pub use guard::{RunGuard, RunPermit};
pub use progress::{ProgressReporter, ProgressSnapshot, ProgressStage, ProgressUpdate};
pub use state::{Mode, Phase, PipelineState};
