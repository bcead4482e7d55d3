use planeseg_core::PointCloud;

use crate::KdTree;

/// Point set with nearest-neighbor query capability.
///
/// This is the only view of the points the plane extractor needs: indexed
/// positions plus k-nearest-neighbor queries whose results are ordered by
/// increasing distance. A query located at a stored point returns that point
/// first.
pub trait SpatialIndex {
    fn size(&self) -> usize;

    fn point_at(&self, i: usize) -> [f32; 3];

    fn k_nearest(&self, query: &[f32; 3], k: usize) -> Vec<usize>;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// A point cloud paired with the KdTree built over it.
#[derive(Debug, Clone)]
pub struct IndexedCloud<'a> {
    cloud: &'a PointCloud,
    tree: KdTree,
}

impl<'a> IndexedCloud<'a> {
    pub fn new(cloud: &'a PointCloud) -> Self {
        Self {
            cloud,
            tree: KdTree::build(cloud),
        }
    }

    pub fn cloud(&self) -> &'a PointCloud {
        self.cloud
    }

    pub fn tree(&self) -> &KdTree {
        &self.tree
    }
}

impl SpatialIndex for IndexedCloud<'_> {
    fn size(&self) -> usize {
        self.cloud.len()
    }

    fn point_at(&self, i: usize) -> [f32; 3] {
        self.cloud.point(i)
    }

    fn k_nearest(&self, query: &[f32; 3], k: usize) -> Vec<usize> {
        self.tree.knn_indices(query, k)
    }
}
