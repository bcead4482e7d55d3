use serde::{Deserialize, Serialize};

/// A 3D plane model in the form `n . x + d = 0`, where `n` is a unit normal.
///
/// Planes built through [`PlaneModel::from_point_normal`] or
/// [`PlaneModel::canonical`] follow one sign convention: `d <= 0`, and when
/// the plane passes through the origin the first non-zero normal component
/// is positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneModel {
    pub normal: [f32; 3],
    pub d: f32,
}

impl PlaneModel {
    /// Plane through `point` with the given (not necessarily unit) normal.
    ///
    /// Returns `None` for a zero or non-finite normal.
    pub fn from_point_normal(point: &[f32; 3], normal: &[f32; 3]) -> Option<Self> {
        let len = norm(normal);
        if !(len > 1e-10) || !len.is_finite() || !point.iter().all(|v| v.is_finite()) {
            return None;
        }
        let n = [normal[0] / len, normal[1] / len, normal[2] / len];
        let d = -dot(&n, point);
        Some(Self { normal: n, d }.canonical())
    }

    /// Signed distance from a point to this plane.
    #[inline]
    pub fn signed_distance(&self, point: &[f32; 3]) -> f32 {
        dot(&self.normal, point) + self.d
    }

    /// Computes the absolute distance from a point to this plane.
    /// Assumes `normal` is a unit vector.
    #[inline]
    pub fn distance_to_point(&self, point: &[f32; 3]) -> f32 {
        self.signed_distance(point).abs()
    }

    /// Cosine of the unoriented angle between the plane normal and `normal`,
    /// in `[0, 1]` for unit inputs.
    #[inline]
    pub fn normal_agreement(&self, normal: &[f32; 3]) -> f32 {
        dot(&self.normal, normal).abs().min(1.0)
    }

    /// Unoriented angle in radians between this plane's normal and `normal`.
    #[inline]
    pub fn angle_to_normal(&self, normal: &[f32; 3]) -> f32 {
        self.normal_agreement(normal).acos()
    }

    /// Unoriented dihedral angle in radians between two planes.
    pub fn angle_to(&self, other: &PlaneModel) -> f32 {
        self.angle_to_normal(&other.normal)
    }

    /// Difference of offsets after aligning `other`'s normal with this one.
    pub fn offset_difference(&self, other: &PlaneModel) -> f32 {
        let other_d = if dot(&self.normal, &other.normal) < 0.0 {
            -other.d
        } else {
            other.d
        };
        (self.d - other_d).abs()
    }

    /// The same plane expressed in the canonical sign convention.
    pub fn canonical(self) -> Self {
        let flip = if self.d != 0.0 {
            self.d > 0.0
        } else {
            self.normal
                .iter()
                .find(|c| **c != 0.0)
                .is_some_and(|c| *c < 0.0)
        };
        if flip {
            Self {
                normal: [-self.normal[0], -self.normal[1], -self.normal[2]],
                d: -self.d,
            }
        } else {
            self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.normal.iter().all(|v| v.is_finite()) && self.d.is_finite()
    }
}

impl Default for PlaneModel {
    fn default() -> Self {
        Self {
            normal: [0.0, 0.0, 1.0],
            d: 0.0,
        }
    }
}

#[inline]
pub(crate) fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn norm(a: &[f32; 3]) -> f32 {
    dot(a, a).sqrt()
}

#[inline]
pub(crate) fn distance_squared(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}
