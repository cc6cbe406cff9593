use thiserror::Error;

/// Error kinds surfaced by the burst pipeline (spec §7).
///
/// Only [`BurstSrError::InvalidInput`] and [`BurstSrError::Cancelled`] ever
/// propagate out of [`crate::pipeline::orchestrator::BurstOrchestrator`] as a
/// failed result. Every other variant is recoverable at some higher level
/// (a single bad frame is dropped, a tile falls back to bilinear upscale)
/// and is recorded as `used_fallback`/`FallbackReason` instead of returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BurstSrError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("alignment failed: {reason}")]
    AlignmentFailed { reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("resource exhausted: tile needs {tile_bytes} bytes, budget is {budget_bytes} bytes")]
    ResourceExhausted {
        tile_bytes: usize,
        budget_bytes: usize,
    },

    #[error("numeric degeneracy: {reason}")]
    NumericDegenerate { reason: String },
}

pub type Result<T> = std::result::Result<T, BurstSrError>;
