//! Burst stage enumeration and progress reporting (spec §4.12, §6).
//! Grounded on the teacher's `pipeline/types.rs` (`PipelineStage` + Display,
//! `ProgressReporter` trait with no-op defaults, `NoOpReporter`), adapted to
//! the spec's explicit `(stage, progress, message)` callback shape instead
//! of the teacher's begin/advance/finish triad.

use crate::buffer::RgbImage;

/// Burst orchestrator stage (spec §4.12). Transitions are strictly forward
/// except into [`BurstStage::Error`], which is terminal until `reset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BurstStage {
    Idle,
    ConvertingYuv,
    BuildingPyramids,
    AligningFrames,
    MergingFrames,
    ComputingEdges,
    GeneratingMask,
    MultiFrameSr,
    Complete,
    Error,
}

impl BurstStage {
    /// The stage that strictly follows this one in the forward-only
    /// progression (spec §4.12); `Error`/`Complete` have none.
    pub fn next(self) -> Option<BurstStage> {
        use BurstStage::*;
        match self {
            Idle => Some(ConvertingYuv),
            ConvertingYuv => Some(BuildingPyramids),
            BuildingPyramids => Some(AligningFrames),
            AligningFrames => Some(MergingFrames),
            MergingFrames => Some(ComputingEdges),
            ComputingEdges => Some(GeneratingMask),
            GeneratingMask => Some(MultiFrameSr),
            MultiFrameSr => Some(Complete),
            Complete | Error => None,
        }
    }
}

impl std::fmt::Display for BurstStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BurstStage::Idle => write!(f, "Idle"),
            BurstStage::ConvertingYuv => write!(f, "Converting YUV"),
            BurstStage::BuildingPyramids => write!(f, "Building pyramids"),
            BurstStage::AligningFrames => write!(f, "Aligning frames"),
            BurstStage::MergingFrames => write!(f, "Merging frames"),
            BurstStage::ComputingEdges => write!(f, "Computing edges"),
            BurstStage::GeneratingMask => write!(f, "Generating mask"),
            BurstStage::MultiFrameSr => write!(f, "Multi-frame super-resolution"),
            BurstStage::Complete => write!(f, "Complete"),
            BurstStage::Error => write!(f, "Error"),
        }
    }
}

/// Why the tile pipeline fell back to a single-frame bilinear upscale
/// (spec §4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    GlobalMotionExceeded,
    InsufficientFrames,
    DimensionMismatch,
    MemoryBudgetExceeded,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::GlobalMotionExceeded => write!(f, "estimated global motion exceeds fallback threshold"),
            FallbackReason::InsufficientFrames => write!(f, "fewer than 2 usable frames"),
            FallbackReason::DimensionMismatch => write!(f, "reference frame dimensions mismatched across burst"),
            FallbackReason::MemoryBudgetExceeded => write!(f, "tile memory budget would be exceeded"),
        }
    }
}

/// Result of running the burst orchestrator to completion.
#[derive(Clone, Debug)]
pub struct BurstResult {
    pub image: RgbImage,
    pub used_fallback: bool,
    pub fallback_reason: Option<FallbackReason>,
}

/// Progress reporting callback: `(stage, progress in [0,1], message)`
/// (spec §6). Invoked from the stage-driver thread; implementations must
/// not call back into the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _stage: BurstStage, _progress: f32, _message: &str) {}
}

/// No-op reporter, used when the caller doesn't need progress feedback.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Cooperative cancellation flag, polled between stages and between tiles
/// (spec §4.12, §5). Cancellation surfaces as [`BurstStage::Error`] with
/// reason "cancelled" — modeled here as [`BurstSrError::Cancelled`].
pub trait CancellationToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationToken for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_progression_is_strictly_forward_to_complete() {
        let mut stage = BurstStage::Idle;
        let mut count = 0;
        while let Some(next) = stage.next() {
            stage = next;
            count += 1;
            assert!(count < 20, "stage progression did not terminate");
        }
        assert_eq!(stage, BurstStage::Complete);
    }

    #[test]
    fn error_and_complete_are_terminal() {
        assert_eq!(BurstStage::Error.next(), None);
        assert_eq!(BurstStage::Complete.next(), None);
    }
}
