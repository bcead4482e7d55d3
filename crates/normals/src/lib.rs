#![forbid(unsafe_code)]

pub mod estimate;
pub mod pca;

pub use estimate::{
    estimate_normals, estimate_normals_orientation_aware, estimate_normals_with_viewpoint,
};
pub use pca::{neighborhood_residual, pca, weighted_covariance, weighted_pca, LocalFrame};
