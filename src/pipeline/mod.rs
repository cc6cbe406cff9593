//! Tile-based burst orchestration (spec §4.11, §4.12). Ties the stage
//! state machine, full configuration surface, and overlapping-tile grid
//! together into [`orchestrator::BurstOrchestrator`], the crate's single
//! public entry point for running a whole burst.

pub mod config;
pub mod orchestrator;
pub mod tiles;
pub mod types;

pub use config::{AlignmentMethod, PipelineConfig, ReferenceSelection, RobustnessMode};
pub use orchestrator::BurstOrchestrator;
pub use types::{BurstResult, BurstStage, CancellationToken, FallbackReason, NoOpReporter, ProgressReporter};
