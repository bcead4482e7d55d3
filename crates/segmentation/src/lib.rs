#![forbid(unsafe_code)]

pub mod candidates;
pub mod energy;
pub mod error;
pub mod extract;
pub mod fit;
pub mod graph;
pub mod label;
pub mod oracle;
pub mod optimizer;
pub mod params;
pub mod plane;
pub mod pool;
pub mod refine;
pub mod scene;

pub use candidates::{Candidate, CandidateGenerator, SeedCursor};
pub use energy::{DataTerm, EnergyBreakdown, EnergyModel, Smoothness};
pub use error::ExtractError;
pub use extract::{
    extract_planes, ExtractedPlane, Extraction, ExtractionSession, ExtractionStatus, Phase,
    PlaneExtractor,
};
pub use fit::{fit_plane_from_three_points, PlaneFit, ThreePointFit, WeightedPcaFit};
pub use graph::NeighborGraph;
pub use label::{Label, ModelId};
pub use oracle::{GreedyOracle, IcmOracle, LabelOracle, MoveProblem};
pub use optimizer::{LabelOptimizer, LabelReport};
pub use params::ExtractParams;
pub use plane::PlaneModel;
pub use pool::{CandidatePool, Model};
pub use refine::{irls_refit, RefineReport, Refiner};
pub use scene::Scene;
