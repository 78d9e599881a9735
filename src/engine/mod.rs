//! The step engine: fixed stage order, persisted scan state and the
//! orchestrator that advances a scan one stage per call.

pub mod orchestrator;
pub mod stage;
pub mod stages;
pub mod state;
pub mod store;

pub use orchestrator::{AdvanceOutcome, Orchestrator};
pub use stage::Stage;
pub use stages::{ProbeStageRunner, StageOutput, StageRunner};
pub use state::{EventLevel, ScanEvent, ScanState, ScanStatus};
pub use store::{FileStore, MemoryStore, ScanStore};
