use planeseg_core::{Normals, PointCloud};
use planeseg_spatial::KdTree;
use rayon::prelude::*;

use crate::pca::{neighborhood_covariance, smallest_eigenvector_3x3};

/// PCA normal per point from its `k` nearest neighbors (the point itself
/// included), flipped to face the origin. Points run in parallel.
pub fn estimate_normals(cloud: &PointCloud, k: usize) -> Normals {
    estimate_normals_with_viewpoint(cloud, k, [0.0, 0.0, 0.0])
}

/// [`estimate_normals`] with an explicit viewpoint for orientation.
pub fn estimate_normals_with_viewpoint(
    cloud: &PointCloud,
    k: usize,
    viewpoint: [f32; 3],
) -> Normals {
    if cloud.is_empty() || k == 0 {
        return Normals::new();
    }

    let points = cloud.to_points();
    let tree = KdTree::from_points(&points);

    let normals_vec: Vec<[f32; 3]> = points
        .par_iter()
        .map(|point| {
            let indices = tree.knn_indices(point, k);
            let normal = pca_normal(&points, &indices);
            orient_toward(normal, point, &viewpoint)
        })
        .collect();

    Normals::from_vectors(&normals_vec)
}

/// Re-estimate normals using, for each point, only the neighbors whose current
/// normal lies in the same half-space as its own.
///
/// Neighborhoods that straddle a sharp edge or a thin structure mix the two
/// sides in plain PCA; restricting the neighborhood to consistently oriented
/// neighbors sharpens normals there. The orientation of each input normal is
/// preserved.
///
/// # Panics
///
/// Panics if `normals` is not index-aligned with `cloud`.
pub fn estimate_normals_orientation_aware(
    cloud: &PointCloud,
    k: usize,
    normals: &Normals,
) -> Normals {
    assert_eq!(
        normals.len(),
        cloud.len(),
        "normals must be index-aligned with the cloud"
    );
    if cloud.is_empty() || k == 0 {
        return normals.clone();
    }

    let points = cloud.to_points();
    let current = normals.to_vectors();
    let tree = KdTree::from_points(&points);

    let refined: Vec<[f32; 3]> = (0..points.len())
        .into_par_iter()
        .map(|i| {
            let ni = current[i];
            let agreeing: Vec<usize> = tree
                .knn_indices(&points[i], k)
                .into_iter()
                .filter(|&j| dot(&ni, &current[j]) >= 0.0)
                .collect();

            if agreeing.len() < 3 {
                return ni;
            }

            let n = pca_normal(&points, &agreeing);
            if dot(&n, &ni) < 0.0 {
                [-n[0], -n[1], -n[2]]
            } else {
                n
            }
        })
        .collect();

    Normals::from_vectors(&refined)
}

/// Unit normal of `points[indices]`, `(0, 0, 1)` for an empty neighborhood.
fn pca_normal(points: &[[f32; 3]], indices: &[usize]) -> [f32; 3] {
    if indices.is_empty() {
        return [0.0, 0.0, 1.0];
    }

    let c = neighborhood_covariance(points, indices);
    let (mut nx, mut ny, mut nz) = smallest_eigenvector_3x3(c[0], c[1], c[2], c[3], c[4], c[5]);

    let len = (nx * nx + ny * ny + nz * nz).sqrt();
    if len > 1e-10 {
        nx /= len;
        ny /= len;
        nz /= len;
    }
    [nx, ny, nz]
}

fn orient_toward(normal: [f32; 3], point: &[f32; 3], viewpoint: &[f32; 3]) -> [f32; 3] {
    let v = [
        viewpoint[0] - point[0],
        viewpoint[1] - point[1],
        viewpoint[2] - point[2],
    ];
    if dot(&normal, &v) < 0.0 {
        [-normal[0], -normal[1], -normal[2]]
    } else {
        normal
    }
}

#[inline]
fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
