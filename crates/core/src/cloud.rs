/// Point positions in structure-of-arrays layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
}

/// Per-point unit normals, index-aligned with a [`PointCloud`].
///
/// Orientation carries no meaning for plane extraction; only the line a
/// normal spans is used.
#[derive(Debug, Clone, PartialEq)]
pub struct Normals {
    pub nx: Vec<f32>,
    pub ny: Vec<f32>,
    pub nz: Vec<f32>,
}

impl Normals {
    pub fn new() -> Self {
        Self {
            nx: Vec::new(),
            ny: Vec::new(),
            nz: Vec::new(),
        }
    }

    pub fn from_vectors(vectors: &[[f32; 3]]) -> Self {
        Self {
            nx: vectors.iter().map(|n| n[0]).collect(),
            ny: vectors.iter().map(|n| n[1]).collect(),
            nz: vectors.iter().map(|n| n[2]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.nx.len(), self.ny.len());
        debug_assert_eq!(self.nx.len(), self.nz.len());
        self.nx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nx.is_empty()
    }

    pub fn normal(&self, i: usize) -> [f32; 3] {
        [self.nx[i], self.ny[i], self.nz[i]]
    }

    pub fn iter(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.nx
            .iter()
            .zip(&self.ny)
            .zip(&self.nz)
            .map(|((x, y), z)| [*x, *y, *z])
    }

    pub fn to_vectors(&self) -> Vec<[f32; 3]> {
        self.iter().collect()
    }
}

impl Default for Normals {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
        }
    }

    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Self {
        assert_eq!(x.len(), y.len(), "x and y must have same length");
        assert_eq!(x.len(), z.len(), "x and z must have same length");
        Self { x, y, z }
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        Self {
            x: points.iter().map(|p| p[0]).collect(),
            y: points.iter().map(|p| p[1]).collect(),
            z: points.iter().map(|p| p[2]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.x.len(), self.y.len());
        debug_assert_eq!(self.x.len(), self.z.len());
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| [*x, *y, *z])
    }

    /// Contiguous copy of the positions, for cache-friendly inner loops.
    pub fn to_points(&self) -> Vec<[f32; 3]> {
        self.iter_points().collect()
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Normals, PointCloud};
    use proptest::prelude::*;

    #[test]
    fn new_is_empty() {
        let cloud = PointCloud::new();
        assert!(cloud.is_empty());
        assert_eq!(cloud.len(), 0);
        assert!(cloud.to_points().is_empty());
    }

    #[test]
    fn from_points_matches_from_xyz() {
        let a = PointCloud::from_points(&[[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]);
        let b = PointCloud::from_xyz(vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]);
        assert_eq!(a, b);
        assert_eq!(a.point(1), [2.0, 4.0, 6.0]);
    }

    #[test]
    fn normals_accessors() {
        let normals = Normals::from_vectors(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
        assert_eq!(normals.len(), 2);
        assert_eq!(normals.normal(1), [1.0, 0.0, 0.0]);
        assert_eq!(normals.nz, vec![1.0, 0.0]);
        assert!(Normals::new().is_empty());
    }

    #[test]
    #[should_panic]
    fn from_xyz_panics_on_mismatch() {
        let _ = PointCloud::from_xyz(vec![1.0], vec![2.0, 3.0], vec![4.0]);
    }

    proptest! {
        #[test]
        fn points_survive_the_soa_layout(
            pts in prop::collection::vec(
                (-1000.0f32..1000.0f32, -1000.0f32..1000.0f32, -1000.0f32..1000.0f32),
                0..300
            )
        ) {
            let points: Vec<[f32; 3]> = pts.iter().map(|&(x, y, z)| [x, y, z]).collect();
            let cloud = PointCloud::from_points(&points);
            prop_assert_eq!(cloud.len(), points.len());
            prop_assert_eq!(cloud.to_points(), points);
        }
    }
}
