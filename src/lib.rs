//! Global L0 planar surface extraction for 3D point clouds.
//!
//! Every point is labeled with one of a small set of planes or as an
//! outlier by minimizing a global energy of fit error, label smoothness,
//! outlier cost and a per-plane penalty.
//!
//! ```no_run
//! use planeseg::cloud::PointCloud;
//! use planeseg::normals::estimate_normals;
//! use planeseg::segmentation::{extract_planes, ExtractParams};
//! use planeseg::spatial::IndexedCloud;
//!
//! let points: Vec<[f32; 3]> = (0..400)
//!     .map(|i| [(i % 20) as f32 * 0.1, (i / 20) as f32 * 0.1, 0.0])
//!     .collect();
//! let cloud = PointCloud::from_points(&points);
//! let index = IndexedCloud::new(&cloud);
//! let normals = estimate_normals(&cloud, 15);
//! let result = extract_planes(&index, &normals, &ExtractParams::default())?;
//! println!("{} planes", result.plane_count());
//! # Ok::<(), planeseg::segmentation::ExtractError>(())
//! ```
#![forbid(unsafe_code)]

pub use planeseg_core as cloud;
pub use planeseg_normals as normals;
pub use planeseg_segmentation as segmentation;
pub use planeseg_spatial as spatial;

pub use planeseg_segmentation::{extract_planes, ExtractError, ExtractParams, Extraction};
