use planeseg_spatial::SpatialIndex;
use rayon::prelude::*;

/// Undirected k-nearest-neighbor graph in compressed sparse row form.
///
/// Every undirected edge is stored once per endpoint. Neighbor lists are
/// sorted and free of duplicates and self loops. The position of an entry in
/// the flat target array is its edge slot, used to attach per-edge data.
#[derive(Debug, Clone, Default)]
pub struct NeighborGraph {
    offsets: Vec<usize>,
    targets: Vec<u32>,
}

impl NeighborGraph {
    /// Build the graph from `k` nearest neighbors per point.
    ///
    /// `k` is clamped to `n - 1`. Queries run in parallel.
    pub fn build<S: SpatialIndex + Sync>(index: &S, k: usize) -> Self {
        let lists = knn_lists(index, k);
        Self::from_knn(&lists)
    }

    /// Symmetrize and deduplicate per-point neighbor lists.
    ///
    /// Out-of-range indices and self references are dropped.
    pub fn from_knn(lists: &[Vec<usize>]) -> Self {
        let n = lists.len();
        let total: usize = lists.iter().map(Vec::len).sum();
        let mut pairs: Vec<(u32, u32)> = Vec::with_capacity(2 * total);
        for (i, list) in lists.iter().enumerate() {
            for &j in list {
                if j == i || j >= n {
                    continue;
                }
                pairs.push((i as u32, j as u32));
                pairs.push((j as u32, i as u32));
            }
        }
        pairs.par_sort_unstable();
        pairs.dedup();

        let mut offsets = vec![0usize; n + 1];
        for &(i, _) in &pairs {
            offsets[i as usize + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }
        let targets = pairs.into_iter().map(|(_, j)| j).collect();

        Self { offsets, targets }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.targets.len() / 2
    }

    /// Number of directed edge slots, `2 * num_edges()`.
    pub fn num_slots(&self) -> usize {
        self.targets.len()
    }

    pub fn degree(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Sorted neighbors of `i`.
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.targets[self.offsets[i]..self.offsets[i + 1]]
            .iter()
            .map(|&j| j as usize)
    }

    /// Neighbors of `i` paired with their edge slot.
    pub fn edges_of(&self, i: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let start = self.offsets[i];
        self.targets[start..self.offsets[i + 1]]
            .iter()
            .enumerate()
            .map(move |(k, &j)| (j as usize, start + k))
    }

    /// Every undirected edge once, as `(i, j, slot)` with `i < j`.
    pub fn undirected_edges(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.len()).flat_map(move |i| {
            self.edges_of(i)
                .filter(move |&(j, _)| i < j)
                .map(move |(j, slot)| (i, j, slot))
        })
    }
}

/// The `k` nearest neighbors of every point, excluding the point itself,
/// ordered by increasing distance.
pub(crate) fn knn_lists<S: SpatialIndex + Sync>(index: &S, k: usize) -> Vec<Vec<usize>> {
    let n = index.size();
    if n <= 1 || k == 0 {
        return vec![Vec::new(); n];
    }
    let k = k.min(n - 1);

    (0..n)
        .into_par_iter()
        .map(|i| {
            index
                .k_nearest(&index.point_at(i), k + 1)
                .into_iter()
                .filter(|&j| j != i)
                .take(k)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use planeseg_core::PointCloud;
    use planeseg_spatial::IndexedCloud;
    use proptest::prelude::*;

    /// Points on the x axis at `i * i`, so every point has a unique nearest
    /// neighbor on its left.
    fn line_cloud(n: usize) -> PointCloud {
        let x: Vec<f32> = (0..n).map(|i| (i * i) as f32).collect();
        PointCloud::from_xyz(x, vec![0.0; n], vec![0.0; n])
    }

    #[test]
    fn line_with_one_neighbor_is_a_path() {
        let cloud = line_cloud(5);
        let index = IndexedCloud::new(&cloud);
        let graph = NeighborGraph::build(&index, 1);

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.num_edges(), 4);
        for i in 0..5 {
            for j in graph.neighbors(i) {
                assert_eq!((i as i64 - j as i64).abs(), 1);
            }
        }
    }

    #[test]
    fn k_is_clamped_to_n_minus_one() {
        let cloud = line_cloud(4);
        let index = IndexedCloud::new(&cloud);
        let graph = NeighborGraph::build(&index, 50);
        assert_eq!(graph.num_edges(), 6);
        for i in 0..4 {
            assert_eq!(graph.degree(i), 3);
        }
    }

    #[test]
    fn empty_and_single_point() {
        let empty = PointCloud::new();
        let graph = NeighborGraph::build(&IndexedCloud::new(&empty), 5);
        assert!(graph.is_empty());
        assert_eq!(graph.num_edges(), 0);

        let single = line_cloud(1);
        let graph = NeighborGraph::build(&IndexedCloud::new(&single), 5);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.degree(0), 0);
    }

    #[test]
    fn from_knn_drops_self_and_duplicates() {
        let lists = vec![vec![0, 1, 1, 2], vec![0], vec![9]];
        let graph = NeighborGraph::from_knn(&lists);
        assert_eq!(graph.neighbors(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(graph.neighbors(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.neighbors(2).collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.undirected_edges().count(), 2);
    }

    #[test]
    fn edge_slots_index_the_flat_array() {
        let lists = vec![vec![1, 2], vec![2], vec![]];
        let graph = NeighborGraph::from_knn(&lists);
        let mut seen = vec![false; graph.num_slots()];
        for i in 0..graph.len() {
            for (_, slot) in graph.edges_of(i) {
                assert!(!seen[slot]);
                seen[slot] = true;
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    proptest! {
        #[test]
        fn graph_is_symmetric(
            pts in prop::collection::vec(
                (-10.0f32..10.0, -10.0f32..10.0, -10.0f32..10.0),
                2..60
            ),
            k in 1usize..8,
        ) {
            let x: Vec<f32> = pts.iter().map(|p| p.0).collect();
            let y: Vec<f32> = pts.iter().map(|p| p.1).collect();
            let z: Vec<f32> = pts.iter().map(|p| p.2).collect();
            let cloud = PointCloud::from_xyz(x, y, z);
            let graph = NeighborGraph::build(&IndexedCloud::new(&cloud), k);

            for i in 0..graph.len() {
                prop_assert!(graph.degree(i) >= k.min(cloud.len() - 1));
                for j in graph.neighbors(i) {
                    prop_assert!(j != i);
                    prop_assert!(graph.neighbors(j).any(|m| m == i));
                }
            }
        }
    }
}
