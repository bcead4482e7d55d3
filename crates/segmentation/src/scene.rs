use planeseg_core::Normals;
use planeseg_normals::{neighborhood_residual, pca};
use planeseg_spatial::SpatialIndex;
use rayon::prelude::*;

use crate::graph::{knn_lists, NeighborGraph};
use crate::plane::{distance_squared, norm};

/// Immutable per-run view of the input: contiguous points and unit normals,
/// the neighbor graph and the scales derived from it.
#[derive(Debug, Clone)]
pub struct Scene {
    points: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    graph: NeighborGraph,
    residuals: Vec<f32>,
    resolution: f32,
    epsilon: f32,
    seed_order: Vec<usize>,
}

impl Scene {
    /// Prepare a scene from an index and index-aligned normals.
    ///
    /// The distance scale is `distance_threshold` when given, otherwise
    /// `max(3 * median local residual, 0.5 * resolution)`, where the
    /// resolution is the median over points of the mean distance to their
    /// `k` nearest neighbors.
    ///
    /// # Panics
    ///
    /// Panics if `normals` is not index-aligned with `index`.
    pub fn build<S: SpatialIndex + Sync>(
        index: &S,
        normals: &Normals,
        k: usize,
        distance_threshold: Option<f32>,
    ) -> Self {
        let n = index.size();
        assert_eq!(
            normals.len(),
            n,
            "normals must be index-aligned with the points"
        );

        let points: Vec<[f32; 3]> = (0..n).map(|i| index.point_at(i)).collect();
        let lists = knn_lists(index, k);

        let (residuals, mean_spacing): (Vec<f32>, Vec<f32>) = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut hood = Vec::with_capacity(lists[i].len() + 1);
                hood.push(i);
                hood.extend_from_slice(&lists[i]);
                let residual = neighborhood_residual(&points, &hood);

                let spacing = if lists[i].is_empty() {
                    f32::NAN
                } else {
                    lists[i]
                        .iter()
                        .map(|&j| distance_squared(&points[i], &points[j]).sqrt())
                        .sum::<f32>()
                        / lists[i].len() as f32
                };
                (residual, spacing)
            })
            .unzip();

        let normals: Vec<[f32; 3]> = (0..n)
            .into_par_iter()
            .map(|i| sanitize_normal(normals.normal(i), &points, i, &lists[i]))
            .collect();

        let resolution = median(mean_spacing.iter().copied().filter(|v| v.is_finite())).unwrap_or(0.0);
        let noise = median(residuals.iter().copied()).unwrap_or(0.0);
        let epsilon = match distance_threshold {
            Some(t) => t,
            None => {
                let eps = (3.0 * noise).max(0.5 * resolution);
                if eps > 0.0 && eps.is_finite() {
                    eps
                } else {
                    f32::EPSILON
                }
            }
        };

        let mut seed_order: Vec<usize> = (0..n).collect();
        seed_order.sort_by(|&a, &b| residuals[a].total_cmp(&residuals[b]).then(a.cmp(&b)));

        let graph = NeighborGraph::from_knn(&lists);

        Self {
            points,
            normals,
            graph,
            residuals,
            resolution,
            epsilon,
            seed_order,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }

    #[inline]
    pub fn point(&self, i: usize) -> &[f32; 3] {
        &self.points[i]
    }

    /// Unit normal of point `i`.
    #[inline]
    pub fn normal(&self, i: usize) -> &[f32; 3] {
        &self.normals[i]
    }

    pub fn graph(&self) -> &NeighborGraph {
        &self.graph
    }

    /// RMS distance of point `i`'s neighborhood to its least-squares plane.
    pub fn residual(&self, i: usize) -> f32 {
        self.residuals[i]
    }

    /// Typical spacing between neighboring points.
    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    /// Inlier distance scale.
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Point indices by increasing local residual, ties by index.
    pub fn seed_order(&self) -> &[usize] {
        &self.seed_order
    }
}

/// Normalize `n`; degenerate normals fall back to the local PCA normal, then
/// to `+z`.
fn sanitize_normal(n: [f32; 3], points: &[[f32; 3]], i: usize, neighbors: &[usize]) -> [f32; 3] {
    let len = norm(&n);
    if len > 1e-10 && len.is_finite() {
        return [n[0] / len, n[1] / len, n[2] / len];
    }
    let mut hood: Vec<[f32; 3]> = neighbors.iter().map(|&j| points[j]).collect();
    hood.push(points[i]);
    match pca(&hood) {
        Some(frame) if hood.len() >= 3 => frame.normal,
        _ => [0.0, 0.0, 1.0],
    }
}

fn median(values: impl Iterator<Item = f32>) -> Option<f32> {
    let mut v: Vec<f32> = values.collect();
    if v.is_empty() {
        return None;
    }
    let mid = v.len() / 2;
    let (_, m, _) = v.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    Some(*m)
}
