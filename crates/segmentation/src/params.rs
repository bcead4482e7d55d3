use serde::{Deserialize, Serialize};

use crate::energy::{DataTerm, Smoothness};
use crate::error::ExtractError;

/// Parameters of a plane extraction run.
///
/// Every field has a default, so partial configurations deserialize. Angles
/// are in degrees; distances are in the units of the point cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractParams {
    /// Neighbors per point in the neighbor graph.
    pub k_neighbors: usize,
    /// Smallest support a plane may keep. Models end with zero support or at
    /// least this many points.
    pub min_support_points: usize,
    /// Compatible points (seed included) required before a seed is fitted.
    pub n_constraints: usize,
    /// Cost of labeling one point as an outlier. Zero makes outliers free.
    pub outlier_penalty: f32,
    /// Inlier distance scale. Estimated from the data when `None`.
    pub distance_threshold: Option<f32>,
    /// Largest angle between a point normal and a plane normal accepted
    /// during region growing; also scales the angular data cost.
    pub normal_angle_threshold: f32,
    /// Weight of the angular part of the data cost.
    pub normal_weight: f32,
    pub data_term: DataTerm,
    pub smoothness: Smoothness,
    /// Label cost per active plane. Defaults to
    /// `0.5 * min_support_points * outlier_penalty`.
    pub model_penalty: Option<f32>,
    /// Largest dihedral angle between two planes that may be merged.
    pub merge_angle: f32,
    /// Largest offset difference between two planes that may be merged.
    /// Defaults to the distance scale.
    pub merge_distance: Option<f32>,
    /// Cap on label/refine iterations.
    pub max_iterations: usize,
    /// Cap on expansion passes per labeling phase.
    pub max_label_passes: usize,
    /// Sweeps of the iterated-conditional-modes oracle per move.
    pub oracle_sweeps: usize,
    /// Extra generation rounds when no plane is found or outliers remain.
    pub regeneration_retries: usize,
    /// Seed attempts per generation round, as a fraction of the point count.
    pub proposal_ratio: f32,
    /// Generation stops once the uncovered fraction of points drops below
    /// this ratio.
    pub min_uncovered_ratio: f32,
    /// Relative energy change under which an iteration counts as converged.
    pub tolerance: f64,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            k_neighbors: 15,
            min_support_points: 50,
            n_constraints: 3,
            outlier_penalty: 1.0,
            distance_threshold: None,
            normal_angle_threshold: 30.0,
            normal_weight: 0.25,
            data_term: DataTerm::PointToPlane,
            smoothness: Smoothness::default(),
            model_penalty: None,
            merge_angle: 5.0,
            merge_distance: None,
            max_iterations: 20,
            max_label_passes: 10,
            oracle_sweeps: 4,
            regeneration_retries: 2,
            proposal_ratio: 0.25,
            min_uncovered_ratio: 0.01,
            tolerance: 1e-4,
        }
    }
}

impl ExtractParams {
    /// Check every field; the first violation is returned.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.k_neighbors == 0 {
            return Err(ExtractError::invalid("k_neighbors", "must be at least 1"));
        }
        if self.min_support_points == 0 {
            return Err(ExtractError::invalid(
                "min_support_points",
                "must be at least 1",
            ));
        }
        if self.n_constraints < 3 {
            return Err(ExtractError::invalid(
                "n_constraints",
                format!("a plane needs at least 3 points, got {}", self.n_constraints),
            ));
        }
        non_negative("outlier_penalty", self.outlier_penalty)?;
        if let Some(t) = self.distance_threshold {
            positive("distance_threshold", t)?;
        }
        if !(self.normal_angle_threshold > 0.0 && self.normal_angle_threshold <= 90.0) {
            return Err(ExtractError::invalid(
                "normal_angle_threshold",
                format!("must be in (0, 90] degrees, got {}", self.normal_angle_threshold),
            ));
        }
        non_negative("normal_weight", self.normal_weight)?;
        non_negative("smoothness.weight", self.smoothness.weight())?;
        if let Some(beta) = self.model_penalty {
            non_negative("model_penalty", beta)?;
        }
        if !(0.0..=90.0).contains(&self.merge_angle) {
            return Err(ExtractError::invalid(
                "merge_angle",
                format!("must be in [0, 90] degrees, got {}", self.merge_angle),
            ));
        }
        if let Some(dist) = self.merge_distance {
            non_negative("merge_distance", dist)?;
        }
        if self.max_iterations == 0 {
            return Err(ExtractError::invalid("max_iterations", "must be at least 1"));
        }
        if self.max_label_passes == 0 {
            return Err(ExtractError::invalid(
                "max_label_passes",
                "must be at least 1",
            ));
        }
        if self.oracle_sweeps == 0 {
            return Err(ExtractError::invalid("oracle_sweeps", "must be at least 1"));
        }
        if !(self.proposal_ratio > 0.0 && self.proposal_ratio <= 1.0) {
            return Err(ExtractError::invalid(
                "proposal_ratio",
                format!("must be in (0, 1], got {}", self.proposal_ratio),
            ));
        }
        if !(0.0..1.0).contains(&self.min_uncovered_ratio) {
            return Err(ExtractError::invalid(
                "min_uncovered_ratio",
                format!("must be in [0, 1), got {}", self.min_uncovered_ratio),
            ));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(ExtractError::invalid(
                "tolerance",
                format!("must be finite and non-negative, got {}", self.tolerance),
            ));
        }
        Ok(())
    }

    /// Label cost per active plane after applying the default.
    pub fn effective_model_penalty(&self) -> f32 {
        self.model_penalty
            .unwrap_or(0.5 * self.min_support_points as f32 * self.outlier_penalty)
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ExtractError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ExtractError::invalid(
            name,
            format!("must be finite and positive, got {}", value),
        ))
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ExtractError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ExtractError::invalid(
            name,
            format!("must be finite and non-negative, got {}", value),
        ))
    }
}
