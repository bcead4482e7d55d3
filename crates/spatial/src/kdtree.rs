use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::NearestNeighbour;
use planeseg_core::PointCloud;
use std::num::NonZero;

/// Static k-nearest-neighbor index over 3D positions.
///
/// Wraps kiddo's `ImmutableKdTree`; items are `u32` positions into the slice
/// the tree was built from.
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: ImmutableKdTree<f32, u32, 3, 32>,
    size: usize,
}

impl KdTree {
    pub fn build(cloud: &PointCloud) -> Self {
        Self::from_points(&cloud.to_points())
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        Self {
            tree: ImmutableKdTree::new_from_slice(points),
            size: points.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Indices and Euclidean distances of the `k` points nearest to `query`,
    /// closest first.
    ///
    /// `k` is capped at `len()`. Nothing is returned for `k == 0`, an empty
    /// tree or a non-finite query.
    pub fn knn(&self, query: &[f32; 3], k: usize) -> (Vec<usize>, Vec<f32>) {
        self.nearest(query, k)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .unzip()
    }

    /// Same ordering as [`KdTree::knn`] without the distances.
    pub fn knn_indices(&self, query: &[f32; 3], k: usize) -> Vec<usize> {
        self.nearest(query, k)
            .into_iter()
            .map(|nn| nn.item as usize)
            .collect()
    }

    fn nearest(&self, query: &[f32; 3], k: usize) -> Vec<NearestNeighbour<f32, u32>> {
        if self.is_empty() || query.iter().any(|v| !v.is_finite()) {
            return Vec::new();
        }
        match NonZero::new(k.min(self.size)) {
            Some(k) => self.tree.nearest_n::<SquaredEuclidean>(query, k),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KdTree;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn grid(n: usize, spacing: f32) -> Vec<[f32; 3]> {
        let mut pts = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                pts.push([i as f32 * spacing, j as f32 * spacing, 0.0]);
            }
        }
        pts
    }

    #[test]
    fn grid_point_sees_itself_then_its_four_neighbors() {
        let pts = grid(5, 0.5);
        let tree = KdTree::from_points(&pts);
        // Center of the 5 x 5 grid.
        let (idx, dist) = tree.knn(&pts[12], 5);

        assert_eq!(idx[0], 12);
        assert_eq!(dist[0], 0.0);
        let mut ring = idx[1..].to_vec();
        ring.sort_unstable();
        assert_eq!(ring, vec![7, 11, 13, 17]);
        for d in &dist[1..] {
            assert_abs_diff_eq!(*d, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn indices_agree_with_knn() {
        let pts = vec![[0.0, 0.0, 0.0], [3.0, 0.5, 0.0], [1.0, 0.0, 0.25], [7.0, 0.0, 0.0]];
        let tree = KdTree::from_points(&pts);
        let (idx, _) = tree.knn(&[0.9, 0.0, 0.0], 3);
        assert_eq!(idx, vec![2, 0, 1]);
        assert_eq!(tree.knn_indices(&[0.9, 0.0, 0.0], 3), idx);
    }

    #[test]
    fn degenerate_queries_return_nothing() {
        let empty = KdTree::from_points(&[]);
        assert!(empty.is_empty());
        assert!(empty.knn_indices(&[0.0, 0.0, 0.0], 5).is_empty());

        let tree = KdTree::from_points(&[[1.0, 2.0, 3.0]]);
        let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], 0);
        assert!(idx.is_empty() && dist.is_empty());
        assert!(tree.knn_indices(&[f32::NAN, 0.0, 0.0], 1).is_empty());
        assert!(tree.knn_indices(&[0.0, f32::INFINITY, 0.0], 1).is_empty());
    }

    #[test]
    fn k_is_capped_at_the_point_count() {
        let tree = KdTree::from_points(&grid(3, 1.0));
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.knn_indices(&[0.0, 0.0, 0.0], 100).len(), 9);
    }

    proptest! {
        #[test]
        fn results_are_bounded_and_sorted(
            pts in prop::collection::vec(
                (-100.0f32..100.0f32, -100.0f32..100.0f32, -100.0f32..100.0f32),
                1..200
            ),
            k in 1usize..50,
        ) {
            let pts: Vec<[f32; 3]> = pts.iter().map(|&(x, y, z)| [x, y, z]).collect();
            let tree = KdTree::from_points(&pts);
            let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], k);
            prop_assert_eq!(idx.len(), k.min(pts.len()));
            prop_assert_eq!(idx.len(), dist.len());
            for w in dist.windows(2) {
                prop_assert!(w[0] <= w[1]);
            }
        }
    }
}
