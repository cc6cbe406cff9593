//! Shared numeric constants used across the pipeline.

/// Minimum pixel count (w*h) to justify row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to justify frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// 5-tap Gaussian pyramid kernel: [1,4,6,4,1]/16.
pub const PYRAMID_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Pyramid construction stops before any level dimension would fall
/// below this.
pub const PYRAMID_MIN_DIM: usize = 4;

/// Small epsilon guarding floating-point comparisons/divisions.
pub const EPSILON: f32 = 1e-10;

/// Phase correlation validity floor (spec §4.6).
pub const PHASE_CORRELATION_MIN_CONFIDENCE: f64 = 0.3;

/// ORB+RANSAC success thresholds (spec §4.7).
pub const ORB_MIN_INLIER_RATIO: f64 = 0.25;
pub const ORB_MIN_INLIER_COUNT: usize = 15;

/// Drizzle scale factors the pipeline recognizes (spec §6).
pub const DRIZZLE_VALID_SCALES: [u32; 3] = [2, 3, 4];

/// Non-finite pixel fraction above which a buffer is considered numerically
/// degenerate (spec §7).
pub const NON_FINITE_ESCALATION_FRACTION: f64 = 0.001;

/// Tile pipeline fallback: global motion above this many pixels triggers
/// the bilinear fallback path (spec §4.11).
pub const FALLBACK_MAX_GLOBAL_MOTION_PX: f64 = 32.0;

/// Mean gradient-magnitude threshold used by the orchestrator's
/// `GENERATING_MASK` stage to flag a tile as detailed (spec §4.3).
pub const DETAIL_MASK_THRESHOLD: f32 = 0.1;
