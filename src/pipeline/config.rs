//! Full configuration surface (spec §6). Grounded on the teacher's
//! `pipeline/config.rs` pattern of a single `PipelineConfig` aggregating
//! every stage's sub-config, with enum-of-variants selectors carrying their
//! own inline parameters and a `Display` impl for logging.

use serde::{Deserialize, Serialize};

use crate::aniso::AnisoMergeConfig;
use crate::align::flow::FlowConfig;
use crate::align::orb::OrbConfig;
use crate::align::phase::PhaseCorrelationConfig;
use crate::align::tile::TileAlignerConfig;
use crate::drizzle::DrizzleConfig;
use crate::merge::MergeConfig;

/// Which aligner the tile pipeline runs per tile (spec §6 `alignment_method`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMethod {
    DenseFlow,
    PhaseCorr,
    Hybrid,
}

impl Default for AlignmentMethod {
    fn default() -> Self {
        AlignmentMethod::Hybrid
    }
}

impl std::fmt::Display for AlignmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentMethod::DenseFlow => write!(f, "dense_flow"),
            AlignmentMethod::PhaseCorr => write!(f, "phase_corr"),
            AlignmentMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Adaptive robustness estimator used by the tile pipeline's merge step
/// (spec §4.11 "Adaptive robustness"), independent of [`MergeConfig::method`]
/// (which governs the whole-frame merger, not the per-tile one).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustnessMode {
    None,
    Huber,
    Tukey,
}

impl Default for RobustnessMode {
    fn default() -> Self {
        RobustnessMode::Huber
    }
}

impl std::fmt::Display for RobustnessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobustnessMode::None => write!(f, "none"),
            RobustnessMode::Huber => write!(f, "huber"),
            RobustnessMode::Tukey => write!(f, "tukey"),
        }
    }
}

/// -1 selects the middle frame; otherwise clamped to `[0, frame_count)`
/// (spec §4.12).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSelection(pub i64);

impl Default for ReferenceSelection {
    fn default() -> Self {
        ReferenceSelection(-1)
    }
}

impl ReferenceSelection {
    pub fn resolve(&self, frame_count: usize) -> usize {
        if frame_count == 0 {
            return 0;
        }
        if self.0 == -1 {
            return frame_count / 2;
        }
        if self.0 < 0 {
            return 0;
        }
        (self.0 as usize).min(frame_count - 1)
    }
}

/// Full configuration surface for the burst pipeline (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tile_aligner: TileAlignerConfig,
    pub flow: FlowConfig,
    pub phase: PhaseCorrelationConfig,
    pub orb: OrbConfig,
    pub merge: MergeConfig,
    pub drizzle: DrizzleConfig,
    pub aniso: AnisoMergeConfig,

    pub tile_width: usize,
    pub tile_height: usize,
    pub overlap: usize,
    pub scale_factor: u32,
    pub robustness: RobustnessMode,
    pub robustness_threshold: f32,
    pub max_memory_mb: usize,
    pub alignment_method: AlignmentMethod,
    pub reference_frame_index: ReferenceSelection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_aligner: TileAlignerConfig::default(),
            flow: FlowConfig::default(),
            phase: PhaseCorrelationConfig::default(),
            orb: OrbConfig::default(),
            merge: MergeConfig::default(),
            drizzle: DrizzleConfig::default(),
            aniso: AnisoMergeConfig::default(),
            tile_width: 256,
            tile_height: 256,
            overlap: 32,
            scale_factor: 2,
            robustness: RobustnessMode::default(),
            robustness_threshold: 0.8,
            max_memory_mb: 200,
            alignment_method: AlignmentMethod::default(),
            reference_frame_index: ReferenceSelection::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_selection_middle_for_negative_one() {
        assert_eq!(ReferenceSelection(-1).resolve(5), 2);
        assert_eq!(ReferenceSelection(-1).resolve(4), 2);
    }

    #[test]
    fn reference_selection_clamps_out_of_range_index() {
        assert_eq!(ReferenceSelection(99).resolve(5), 4);
        assert_eq!(ReferenceSelection(-7).resolve(5), 0);
    }

    #[test]
    fn reference_selection_explicit_index_used_directly() {
        assert_eq!(ReferenceSelection(1).resolve(5), 1);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.tile_width, 256);
        assert_eq!(cfg.overlap, 32);
        assert_eq!(cfg.scale_factor, 2);
        assert_eq!(cfg.robustness, RobustnessMode::Huber);
        assert_eq!(cfg.alignment_method, AlignmentMethod::Hybrid);
    }

    #[test]
    fn config_round_trips_through_json_with_defaults() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tile_width, cfg.tile_width);
        assert_eq!(back.overlap, cfg.overlap);
        assert_eq!(back.robustness, cfg.robustness);
        assert_eq!(back.alignment_method, cfg.alignment_method);
        assert_eq!(back.reference_frame_index, cfg.reference_frame_index);
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        // A host persisting only the fields it cares about should still get
        // a fully-populated config back (spec §6 serde(default) surface).
        let back: PipelineConfig = serde_json::from_str(r#"{"scale_factor": 3}"#).unwrap();
        assert_eq!(back.scale_factor, 3);
        assert_eq!(back.tile_width, PipelineConfig::default().tile_width);
    }
}
