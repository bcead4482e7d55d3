use hashbrown::HashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::label::Label;
use crate::params::ExtractParams;
use crate::plane::{distance_squared, PlaneModel};
use crate::pool::CandidatePool;
use crate::scene::Scene;

/// Per-point cost of explaining a point by a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTerm {
    /// Squared scaled distance plus the weighted squared normal deviation.
    #[default]
    PointToPlane,
    /// Squared scaled distance only.
    DistanceOnly,
}

/// Cost charged on a neighbor-graph edge whose endpoints carry different
/// labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Smoothness {
    /// Constant weight per discontinuous edge.
    Potts { weight: f32 },
    /// `weight * exp(-|p - q|^2 / (2 r^2))` with `r` the point resolution.
    DistanceWeighted { weight: f32 },
}

impl Smoothness {
    pub fn weight(&self) -> f32 {
        match *self {
            Smoothness::Potts { weight } | Smoothness::DistanceWeighted { weight } => weight,
        }
    }
}

impl Default for Smoothness {
    fn default() -> Self {
        Smoothness::Potts { weight: 0.1 }
    }
}

/// Energy split into its four terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBreakdown {
    pub data: f64,
    pub smoothness: f64,
    pub outlier: f64,
    pub model: f64,
}

impl EnergyBreakdown {
    pub fn total(&self) -> f64 {
        self.data + self.smoothness + self.outlier + self.model
    }
}

/// Global labeling energy over a fixed scene.
///
/// `E = sum D(p, L(p)) + sum_{(p,q)} V(p, q) + outlier_penalty * #outliers
///      + model_penalty * #active models`
#[derive(Debug, Clone)]
pub struct EnergyModel {
    data_term: DataTerm,
    inv_epsilon: f64,
    inv_angle_gate: f64,
    normal_weight: f64,
    outlier_penalty: f64,
    model_penalty: f64,
    edge_weights: Vec<f64>,
    smooth_totals: Vec<f64>,
}

impl EnergyModel {
    pub fn new(scene: &Scene, params: &ExtractParams) -> Self {
        let graph = scene.graph();
        let resolution = scene.resolution() as f64;
        let weight = params.smoothness.weight() as f64;

        let mut edge_weights = vec![0.0f64; graph.num_slots()];
        let mut smooth_totals = vec![0.0f64; graph.len()];
        for i in 0..graph.len() {
            for (j, slot) in graph.edges_of(i) {
                let w = match params.smoothness {
                    Smoothness::Potts { .. } => weight,
                    Smoothness::DistanceWeighted { .. } if resolution > 0.0 => {
                        let d2 = distance_squared(scene.point(i), scene.point(j)) as f64;
                        weight * (-d2 / (2.0 * resolution * resolution)).exp()
                    }
                    Smoothness::DistanceWeighted { .. } => weight,
                };
                edge_weights[slot] = w;
                smooth_totals[i] += w;
            }
        }

        Self {
            data_term: params.data_term,
            inv_epsilon: 1.0 / scene.epsilon() as f64,
            inv_angle_gate: 1.0 / (params.normal_angle_threshold as f64).to_radians(),
            normal_weight: params.normal_weight as f64,
            outlier_penalty: params.outlier_penalty as f64,
            model_penalty: params.effective_model_penalty() as f64,
            edge_weights,
            smooth_totals,
        }
    }

    /// Data cost of explaining `point` with unit normal `normal` by `plane`.
    #[inline]
    pub fn data_cost(&self, point: &[f32; 3], normal: &[f32; 3], plane: &PlaneModel) -> f64 {
        let r = plane.distance_to_point(point) as f64 * self.inv_epsilon;
        match self.data_term {
            DataTerm::DistanceOnly => r * r,
            DataTerm::PointToPlane => {
                let a = plane.angle_to_normal(normal) as f64 * self.inv_angle_gate;
                r * r + self.normal_weight * a * a
            }
        }
    }

    /// Cost of giving point `i` the label `label`. Labels of models missing
    /// from the pool cost infinity.
    #[inline]
    pub fn unary(&self, scene: &Scene, pool: &CandidatePool, i: usize, label: Label) -> f64 {
        match label.model() {
            None => self.outlier_penalty,
            Some(id) => match pool.get(id) {
                Some(model) => self.data_cost(scene.point(i), scene.normal(i), &model.plane),
                None => f64::INFINITY,
            },
        }
    }

    /// Unary cost of every point under its current label.
    pub fn unary_costs(&self, scene: &Scene, pool: &CandidatePool, labels: &[Label]) -> Vec<f64> {
        labels
            .par_iter()
            .enumerate()
            .map(|(i, &l)| self.unary(scene, pool, i, l))
            .collect()
    }

    /// Weight of the edge stored in `slot`.
    #[inline]
    pub fn edge_weight(&self, slot: usize) -> f64 {
        self.edge_weights[slot]
    }

    /// Per edge slot weights, aligned with the neighbor graph.
    pub fn edge_weights(&self) -> &[f64] {
        &self.edge_weights
    }

    /// Sum of the weights of all edges incident to point `i`.
    #[inline]
    pub fn smooth_total(&self, i: usize) -> f64 {
        self.smooth_totals[i]
    }

    pub fn outlier_penalty(&self) -> f64 {
        self.outlier_penalty
    }

    pub fn model_penalty(&self) -> f64 {
        self.model_penalty
    }

    /// Evaluate the full energy of `labels`.
    pub fn evaluate(&self, scene: &Scene, pool: &CandidatePool, labels: &[Label]) -> EnergyBreakdown {
        let (data, outliers) = labels
            .par_iter()
            .enumerate()
            .map(|(i, &l)| match l.model() {
                None => (0.0, 1usize),
                Some(_) => (self.unary(scene, pool, i, l), 0),
            })
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        let smoothness: f64 = scene
            .graph()
            .undirected_edges()
            .filter(|&(i, j, _)| labels[i] != labels[j])
            .map(|(_, _, slot)| self.edge_weights[slot])
            .sum();

        let active: HashSet<Label> = labels.iter().copied().filter(|l| !l.is_outlier()).collect();

        EnergyBreakdown {
            data,
            smoothness,
            outlier: outliers as f64 * self.outlier_penalty,
            model: active.len() as f64 * self.model_penalty,
        }
    }
}
