#![forbid(unsafe_code)]

pub mod index;
pub mod kdtree;

pub use index::{IndexedCloud, SpatialIndex};
pub use kdtree::KdTree;
