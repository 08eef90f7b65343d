//! The message-to-orders extraction pipeline.
//!
//! One run flows breakdown, structuring, validation, and at most one
//! repair, reporting stage and progress through a run handle the whole
//! way. The deterministic pieces (prompt rendering, validation, progress
//! arithmetic) are plain functions and types; only the orchestrator
//! touches the completion service.

pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod validator;

pub use orchestrator::{AnalysisConfig, AnalysisError, AnalysisOutcome, Orchestrator};
pub use progress::{RunHandle, RunRegistry, RunSnapshot, RunStage, RunToken};
pub use validator::{ExtractedOrderGroup, SchemaError};
