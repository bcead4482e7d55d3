use planeseg_normals::weighted_pca;

use crate::plane::{distance_squared, PlaneModel};

/// Strategy for estimating a plane from weighted points.
///
/// Implementations return `None` when the weighted points do not determine a
/// plane (fewer than three usable points, collinear or coincident input).
pub trait PlaneFit {
    fn fit(&self, points: &[[f32; 3]], weights: &[f32]) -> Option<PlaneModel>;
}

/// Weighted least-squares plane: the normal is the eigenvector of the
/// smallest eigenvalue of the weighted covariance.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedPcaFit;

impl PlaneFit for WeightedPcaFit {
    fn fit(&self, points: &[[f32; 3]], weights: &[f32]) -> Option<PlaneModel> {
        let usable = weights.iter().filter(|w| **w > 0.0 && w.is_finite()).count();
        if usable < 3 {
            return None;
        }
        let frame = weighted_pca(points, weights)?;
        // Rank-1 covariance: the points lie on a line.
        if !(frame.eigenvalues[1] > 1e-9 * frame.eigenvalues[2].max(f32::MIN_POSITIVE)) {
            return None;
        }
        PlaneModel::from_point_normal(&frame.centroid, &frame.normal)
    }
}

/// Exact plane through three well-spread points of the input.
///
/// Picks the point farthest from the first usable point, then the point
/// farthest from that one, then the point spanning the largest triangle with
/// both. Weights only select which points are usable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreePointFit;

impl PlaneFit for ThreePointFit {
    fn fit(&self, points: &[[f32; 3]], weights: &[f32]) -> Option<PlaneModel> {
        assert_eq!(
            points.len(),
            weights.len(),
            "points and weights must have same length"
        );
        let usable: Vec<&[f32; 3]> = points
            .iter()
            .zip(weights)
            .filter(|(_, w)| **w > 0.0 && w.is_finite())
            .map(|(p, _)| p)
            .collect();
        if usable.len() < 3 {
            return None;
        }

        let farthest_from = |origin: &[f32; 3]| {
            usable
                .iter()
                .copied()
                .max_by(|a, b| distance_squared(origin, a).total_cmp(&distance_squared(origin, b)))
        };
        let a = farthest_from(usable[0])?;
        let b = farthest_from(a)?;
        let c = usable.iter().copied().max_by(|p, q| {
            cross_norm_squared(a, b, p).total_cmp(&cross_norm_squared(a, b, q))
        })?;

        fit_plane_from_three_points(a, b, c)
    }
}

/// Fits a plane through 3 points, returning `None` if they are collinear.
pub fn fit_plane_from_three_points(
    p0: &[f32; 3],
    p1: &[f32; 3],
    p2: &[f32; 3],
) -> Option<PlaneModel> {
    let v1 = [p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]];
    let v2 = [p2[0] - p0[0], p2[1] - p0[1], p2[2] - p0[2]];
    let n = cross(&v1, &v2);

    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len < 1e-10 {
        // Points are collinear (or coincident)
        return None;
    }

    PlaneModel::from_point_normal(p0, &n)
}

#[inline]
fn cross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn cross_norm_squared(a: &[f32; 3], b: &[f32; 3], p: &[f32; 3]) -> f32 {
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];
    let n = cross(&v1, &v2);
    n[0] * n[0] + n[1] * n[1] + n[2] * n[2]
}
