use nalgebra::{Matrix3, SymmetricEigen};

/// Principal frame of a (weighted) point neighborhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    pub centroid: [f32; 3],
    /// Unit eigenvector of the smallest covariance eigenvalue.
    pub normal: [f32; 3],
    /// Covariance eigenvalues in ascending order, normalized by total weight.
    pub eigenvalues: [f32; 3],
}

impl LocalFrame {
    /// RMS spread along the normal direction.
    pub fn residual(&self) -> f32 {
        self.eigenvalues[0].max(0.0).sqrt()
    }

    /// RMS spread along the second principal axis. Close to zero for
    /// collinear neighborhoods.
    pub fn secondary_spread(&self) -> f32 {
        self.eigenvalues[1].max(0.0).sqrt()
    }

    /// Surface variation `λ0 / (λ0 + λ1 + λ2)`, zero for a perfect plane.
    pub fn surface_variation(&self) -> f32 {
        let sum: f32 = self.eigenvalues.iter().sum();
        if sum > 0.0 {
            self.eigenvalues[0].max(0.0) / sum
        } else {
            0.0
        }
    }
}

/// Weighted centroid and upper triangle of the weighted covariance matrix
/// `[c00, c01, c02, c11, c12, c22]`, both normalized by the total weight.
///
/// Non-finite and non-positive weights are ignored. Returns `None` when the
/// total weight is zero.
///
/// # Panics
///
/// Panics if `points` and `weights` differ in length.
pub fn weighted_covariance(points: &[[f32; 3]], weights: &[f32]) -> Option<([f64; 3], [f64; 6])> {
    assert_eq!(
        points.len(),
        weights.len(),
        "points and weights must have same length"
    );

    let mut sum = 0.0f64;
    let mut c = [0.0f64; 3];
    for (p, &w) in points.iter().zip(weights) {
        if !(w > 0.0 && w.is_finite()) {
            continue;
        }
        let w = w as f64;
        sum += w;
        c[0] += w * p[0] as f64;
        c[1] += w * p[1] as f64;
        c[2] += w * p[2] as f64;
    }
    if sum <= 0.0 {
        return None;
    }
    let inv = 1.0 / sum;
    let c = [c[0] * inv, c[1] * inv, c[2] * inv];

    let mut cov = [0.0f64; 6];
    for (p, &w) in points.iter().zip(weights) {
        if !(w > 0.0 && w.is_finite()) {
            continue;
        }
        let w = w as f64;
        let dx = p[0] as f64 - c[0];
        let dy = p[1] as f64 - c[1];
        let dz = p[2] as f64 - c[2];
        cov[0] += w * dx * dx;
        cov[1] += w * dx * dy;
        cov[2] += w * dx * dz;
        cov[3] += w * dy * dy;
        cov[4] += w * dy * dz;
        cov[5] += w * dz * dz;
    }
    for v in &mut cov {
        *v *= inv;
    }

    Some((c, cov))
}

/// Weighted PCA over a neighborhood.
///
/// Uses nalgebra's symmetric eigensolver rather than the closed form used by
/// normal estimation, since plane refits need all three eigenpairs and are
/// not on the per-point hot path.
pub fn weighted_pca(points: &[[f32; 3]], weights: &[f32]) -> Option<LocalFrame> {
    let (c, cov) = weighted_covariance(points, weights)?;

    let m = Matrix3::new(
        cov[0], cov[1], cov[2], //
        cov[1], cov[3], cov[4], //
        cov[2], cov[4], cov[5],
    );
    let eigen = SymmetricEigen::new(m);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let v = eigen.eigenvectors.column(order[0]);
    let len = v.norm();
    if !(len > 1e-12) || !len.is_finite() {
        return None;
    }

    Some(LocalFrame {
        centroid: [c[0] as f32, c[1] as f32, c[2] as f32],
        normal: [
            (v[0] / len) as f32,
            (v[1] / len) as f32,
            (v[2] / len) as f32,
        ],
        eigenvalues: [
            eigen.eigenvalues[order[0]] as f32,
            eigen.eigenvalues[order[1]] as f32,
            eigen.eigenvalues[order[2]] as f32,
        ],
    })
}

/// Unweighted PCA over a neighborhood.
pub fn pca(points: &[[f32; 3]]) -> Option<LocalFrame> {
    weighted_pca(points, &vec![1.0; points.len()])
}

/// RMS distance of the neighborhood `indices` to its own least-squares plane.
///
/// Closed-form (Cardano) eigenvalues, cheap enough to run once per point.
/// Returns `0.0` for fewer than three points.
pub fn neighborhood_residual(points: &[[f32; 3]], indices: &[usize]) -> f32 {
    if indices.len() < 3 {
        return 0.0;
    }
    let cov = neighborhood_covariance(points, indices);
    let eig = eigenvalues_3x3(
        cov[0] as f64,
        cov[1] as f64,
        cov[2] as f64,
        cov[3] as f64,
        cov[4] as f64,
        cov[5] as f64,
    );
    eig[0].max(0.0).sqrt() as f32
}

/// Upper triangle of the (unweighted, count-normalized) covariance of
/// `points[indices]`.
pub(crate) fn neighborhood_covariance(points: &[[f32; 3]], indices: &[usize]) -> [f32; 6] {
    let count = indices.len() as f32;
    if count < 1.0 {
        return [0.0; 6];
    }

    let mut cx = 0.0f32;
    let mut cy = 0.0f32;
    let mut cz = 0.0f32;
    for &idx in indices {
        cx += points[idx][0];
        cy += points[idx][1];
        cz += points[idx][2];
    }
    cx /= count;
    cy /= count;
    cz /= count;

    let mut c = [0.0f32; 6];
    for &idx in indices {
        let dx = points[idx][0] - cx;
        let dy = points[idx][1] - cy;
        let dz = points[idx][2] - cz;
        c[0] += dx * dx;
        c[1] += dx * dy;
        c[2] += dx * dz;
        c[3] += dy * dy;
        c[4] += dy * dz;
        c[5] += dz * dz;
    }
    for v in &mut c {
        *v /= count;
    }
    c
}

/// Eigenvalues of a 3x3 symmetric matrix in ascending order, by Cardano's
/// trigonometric formula.
///
/// The matrix is:
///   | a00  a01  a02 |
///   | a01  a11  a12 |
///   | a02  a12  a22 |
pub(crate) fn eigenvalues_3x3(
    a00: f64,
    a01: f64,
    a02: f64,
    a11: f64,
    a12: f64,
    a22: f64,
) -> [f64; 3] {
    let m = (a00 + a11 + a22) / 3.0;

    let b00 = a00 - m;
    let b11 = a11 - m;
    let b22 = a22 - m;

    // q = det(B) / 2 with B = A - mI
    let q = (b00 * (b11 * b22 - a12 * a12) - a01 * (a01 * b22 - a12 * a02)
        + a02 * (a01 * a12 - b11 * a02))
        / 2.0;

    let p = (b00 * b00 + b11 * b11 + b22 * b22 + 2.0 * (a01 * a01 + a02 * a02 + a12 * a12)) / 6.0;
    let pp = p.max(0.0);

    if pp < 1e-30 {
        // Scalar multiple of the identity
        return [m, m, m];
    }

    let det_ratio = (q / (pp * pp.sqrt())).clamp(-1.0, 1.0);
    let phi = det_ratio.acos() / 3.0;

    let sqrt_p = pp.sqrt();
    let eig0 = m + 2.0 * sqrt_p * (phi + 2.0 * std::f64::consts::FRAC_PI_3).cos();
    let eig2 = m + 2.0 * sqrt_p * phi.cos();
    let eig1 = 3.0 * m - eig0 - eig2;

    [eig0, eig1, eig2]
}

/// Compute the eigenvector corresponding to the smallest eigenvalue of a
/// 3x3 symmetric matrix using Cardano's analytical formula for the eigenvalues
/// and a cross-product trick for the eigenvector.
///
/// This avoids the overhead of nalgebra's general iterative eigensolver and
/// all associated heap allocations in the per-point loop of normal
/// estimation. Degenerate input yields `(0, 0, 1)`.
#[inline]
pub(crate) fn smallest_eigenvector_3x3(
    a00: f32,
    a01: f32,
    a02: f32,
    a11: f32,
    a12: f32,
    a22: f32,
) -> (f32, f32, f32) {
    // f64 internally for numerical stability
    let a00 = a00 as f64;
    let a01 = a01 as f64;
    let a02 = a02 as f64;
    let a11 = a11 as f64;
    let a12 = a12 as f64;
    let a22 = a22 as f64;

    let [eig0, eig1, eig2] = eigenvalues_3x3(a00, a01, a02, a11, a12, a22);
    if eig0 == eig2 {
        return (0.0, 0.0, 1.0);
    }

    let lambda = if eig0.abs() <= eig1.abs() && eig0.abs() <= eig2.abs() {
        eig0
    } else if eig1.abs() <= eig2.abs() {
        eig1
    } else {
        eig2
    };

    // (A - λI) has rank ≤ 2, so the cross product of any two independent
    // rows spans its null space.
    let r00 = a00 - lambda;
    let r11 = a11 - lambda;
    let r22 = a22 - lambda;

    let candidates = [
        // rows 0 and 1
        (a01 * a12 - r11 * a02, a02 * a01 - a12 * r00, r00 * r11 - a01 * a01),
        // rows 0 and 2
        (a01 * r22 - a12 * a02, a02 * a02 - r22 * r00, r00 * a12 - a01 * a02),
        // rows 1 and 2
        (r11 * r22 - a12 * a12, a12 * a02 - r22 * a01, a01 * a12 - r11 * a02),
    ];

    for (ex, ey, ez) in candidates {
        let len2 = ex * ex + ey * ey + ez * ez;
        if len2 >= 1e-30 {
            let inv = 1.0 / len2.sqrt();
            return ((ex * inv) as f32, (ey * inv) as f32, (ez * inv) as f32);
        }
    }

    (0.0, 0.0, 1.0)
}
