use hashbrown::HashMap;
use log::{debug, info, warn};
use planeseg_core::Normals;
use planeseg_spatial::SpatialIndex;
use serde::{Deserialize, Serialize};

use crate::candidates::{CandidateGenerator, SeedCursor};
use crate::energy::{EnergyBreakdown, EnergyModel};
use crate::error::ExtractError;
use crate::label::{Label, ModelId};
use crate::oracle::{IcmOracle, LabelOracle};
use crate::optimizer::LabelOptimizer;
use crate::params::ExtractParams;
use crate::plane::PlaneModel;
use crate::pool::CandidatePool;
use crate::refine::Refiner;
use crate::scene::Scene;

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// The energy settled and no further plane could be proposed.
    Converged,
    /// `max_iterations` was reached; the result is the best labeling so far.
    IterationCap,
    /// No candidate survived; every point is an outlier.
    NoPlaneFound,
    /// The cloud has no points.
    EmptyInput,
}

/// Phase the session runs on its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generate,
    Label,
    Refine,
    Stopped(ExtractionStatus),
}

/// State of one extraction, advanced by [`PlaneExtractor::step`].
#[derive(Debug, Clone)]
pub struct ExtractionSession {
    pool: CandidatePool,
    labels: Vec<Label>,
    phase: Phase,
    iteration: usize,
    regenerations: usize,
    seeds: SeedCursor,
    energy: EnergyBreakdown,
    trace: Vec<f64>,
    /// Energy when the current label/refine iteration started.
    iteration_start: f64,
    /// Whether the current iteration adopted, removed or merged a model.
    structural: bool,
}

impl ExtractionSession {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Stopped(_))
    }

    pub fn status(&self) -> Option<ExtractionStatus> {
        match self.phase {
            Phase::Stopped(status) => Some(status),
            _ => None,
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    /// Completed label/refine iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Generation rounds run after the first one.
    pub fn regenerations(&self) -> usize {
        self.regenerations
    }

    pub fn seeds(&self) -> SeedCursor {
        self.seeds
    }

    /// Energy of the current labeling.
    pub fn energy(&self) -> EnergyBreakdown {
        self.energy
    }

    /// Total energy after the start and after every label and refine phase.
    pub fn energy_trace(&self) -> &[f64] {
        &self.trace
    }

    fn record(&mut self, energy: EnergyBreakdown) {
        self.energy = energy;
        self.trace.push(energy.total());
    }

    fn stop(&mut self, status: ExtractionStatus) {
        self.phase = Phase::Stopped(status);
    }
}

/// One extracted plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPlane {
    pub id: ModelId,
    pub plane: PlaneModel,
    /// Number of points labeled with this plane.
    pub support: usize,
    /// Root mean square point-to-plane distance over the support.
    pub rms: f32,
}

/// Result of a plane extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    /// Planes with non-zero support, in creation order.
    pub planes: Vec<ExtractedPlane>,
    /// One label per input point.
    pub labels: Vec<Label>,
    pub status: ExtractionStatus,
    /// Completed label/refine iterations.
    pub iterations: usize,
    pub energy: EnergyBreakdown,
    pub energy_trace: Vec<f64>,
}

impl Extraction {
    pub fn converged(&self) -> bool {
        self.status == ExtractionStatus::Converged
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, id: ModelId) -> Option<&ExtractedPlane> {
        self.planes.iter().find(|p| p.id == id)
    }

    /// Indices of the points labeled with plane `id`.
    pub fn inliers(&self, id: ModelId) -> Vec<usize> {
        let target = Label::plane(id);
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == target)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn assigned_count(&self) -> usize {
        self.labels.iter().filter(|l| !l.is_outlier()).count()
    }

    pub fn outlier_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_outlier()).count()
    }
}

/// Multi-plane extractor over a prepared scene.
///
/// Alternates labeling and refinement from generated plane candidates until
/// the global energy settles. The binary move solver is pluggable through
/// [`PlaneExtractor::with_oracle`].
pub struct PlaneExtractor<O: LabelOracle = IcmOracle> {
    scene: Scene,
    params: ExtractParams,
    energy: EnergyModel,
    oracle: O,
}

impl PlaneExtractor<IcmOracle> {
    /// Validate `params` and prepare the scene for `index` and `normals`.
    pub fn new<S: SpatialIndex + Sync>(
        index: &S,
        normals: &Normals,
        params: ExtractParams,
    ) -> Result<Self, ExtractError> {
        params.validate()?;
        if normals.len() != index.size() {
            return Err(ExtractError::NormalsMismatch {
                normals_len: normals.len(),
                cloud_len: index.size(),
            });
        }

        let scene = Scene::build(index, normals, params.k_neighbors, params.distance_threshold);
        let energy = EnergyModel::new(&scene, &params);
        debug!(
            "scene: {} points, {} edges, resolution {:.4}, epsilon {:.4}",
            scene.len(),
            scene.graph().num_edges(),
            scene.resolution(),
            scene.epsilon()
        );

        Ok(Self {
            scene,
            params,
            energy,
            oracle: IcmOracle {
                sweeps: params.oracle_sweeps,
            },
        })
    }
}

impl<O: LabelOracle> PlaneExtractor<O> {
    /// Replace the binary move solver.
    pub fn with_oracle<P: LabelOracle>(self, oracle: P) -> PlaneExtractor<P> {
        PlaneExtractor {
            scene: self.scene,
            params: self.params,
            energy: self.energy,
            oracle,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn params(&self) -> &ExtractParams {
        &self.params
    }

    pub fn energy_model(&self) -> &EnergyModel {
        &self.energy
    }

    /// A fresh session with every point labeled outlier.
    pub fn start(&self) -> ExtractionSession {
        let pool = CandidatePool::new();
        let labels = vec![Label::OUTLIER; self.scene.len()];
        let energy = self.energy.evaluate(&self.scene, &pool, &labels);
        let phase = if self.scene.is_empty() {
            Phase::Stopped(ExtractionStatus::EmptyInput)
        } else {
            Phase::Generate
        };

        ExtractionSession {
            pool,
            labels,
            phase,
            iteration: 0,
            regenerations: 0,
            seeds: SeedCursor::default(),
            energy,
            trace: vec![energy.total()],
            iteration_start: energy.total(),
            structural: false,
        }
    }

    /// Run the session's current phase and return the next one.
    pub fn step(&self, session: &mut ExtractionSession) -> Phase {
        match session.phase {
            Phase::Stopped(_) => {}
            Phase::Generate => self.generate(session),
            Phase::Label => self.label(session),
            Phase::Refine => self.refine(session),
        }
        session.phase
    }

    /// Step a fresh session to completion.
    pub fn run(&self) -> Extraction {
        let mut session = self.start();
        while !session.is_finished() {
            self.step(&mut session);
        }
        self.finish(session)
    }

    /// Collect the result of `session`. An unfinished session reports
    /// [`ExtractionStatus::IterationCap`].
    pub fn finish(&self, session: ExtractionSession) -> Extraction {
        let status = session.status().unwrap_or(ExtractionStatus::IterationCap);

        let mut residuals: HashMap<ModelId, f64> = HashMap::new();
        for (i, label) in session.labels.iter().enumerate() {
            if let Some(model) = label.model().and_then(|id| session.pool.get(id)) {
                let d = model.plane.distance_to_point(self.scene.point(i)) as f64;
                *residuals.entry(model.id).or_default() += d * d;
            }
        }

        let planes: Vec<ExtractedPlane> = session
            .pool
            .iter()
            .filter(|m| m.support > 0)
            .map(|m| ExtractedPlane {
                id: m.id,
                plane: m.plane,
                support: m.support,
                rms: (residuals.get(&m.id).copied().unwrap_or(0.0) / m.support as f64).sqrt()
                    as f32,
            })
            .collect();

        let outliers = session.labels.iter().filter(|l| l.is_outlier()).count();
        info!(
            "extraction finished ({:?}): {} planes, {} outliers, {} iterations, energy {:.3}",
            status,
            planes.len(),
            outliers,
            session.iteration,
            session.energy.total()
        );

        Extraction {
            planes,
            labels: session.labels,
            status,
            iterations: session.iteration,
            energy: session.energy,
            energy_trace: session.trace,
        }
    }

    fn generate(&self, session: &mut ExtractionSession) {
        let p = &self.params;
        let generator = CandidateGenerator::new(
            &self.scene,
            p.min_support_points,
            p.n_constraints,
            p.normal_angle_threshold,
            p.proposal_ratio,
            p.min_uncovered_ratio,
        );
        let candidates = generator.generate(&session.labels, &mut session.seeds);
        let fresh = candidates.len();
        for candidate in candidates {
            session.pool.insert(candidate.plane);
        }

        if fresh > 0 {
            session.phase = Phase::Label;
        } else if session.pool.active_count() > 0 {
            session.stop(ExtractionStatus::Converged);
        } else if session.regenerations < p.regeneration_retries {
            session.regenerations += 1;
            debug!("no candidate found, retry {}", session.regenerations);
        } else {
            warn!(
                "no plane found in {} points after {} generation rounds",
                self.scene.len(),
                session.regenerations + 1
            );
            session.stop(ExtractionStatus::NoPlaneFound);
        }
    }

    fn label(&self, session: &mut ExtractionSession) {
        let optimizer = LabelOptimizer::new(
            &self.scene,
            &self.energy,
            &self.oracle,
            self.params.min_support_points,
            self.params.max_label_passes,
        );
        let report = optimizer.run(&mut session.pool, &mut session.labels);
        session.structural |= report.accepted() > 0;

        let energy = self.energy.evaluate(&self.scene, &session.pool, &session.labels);
        session.record(energy);
        session.phase = Phase::Refine;
    }

    fn refine(&self, session: &mut ExtractionSession) {
        let merge_distance = self
            .params
            .merge_distance
            .unwrap_or_else(|| self.scene.epsilon());
        let refiner = Refiner::new(
            &self.scene,
            &self.energy,
            self.params.min_support_points,
            self.params.merge_angle,
            merge_distance,
        );
        let report = refiner.run(&mut session.pool, &mut session.labels);
        let structural = session.structural || report.structural_change();

        let energy = self.energy.evaluate(&self.scene, &session.pool, &session.labels);
        session.record(energy);
        session.iteration += 1;

        let total = energy.total();
        let change = session.iteration_start - total;
        session.iteration_start = total;
        session.structural = false;
        let settled = change.abs() <= self.params.tolerance * total.abs().max(1.0);
        debug!(
            "iteration {}: energy {:.3} (change {:.3e}), {} active models",
            session.iteration,
            total,
            change,
            session.pool.active_count()
        );

        if settled && !structural {
            self.after_convergence(session);
        } else if session.iteration >= self.params.max_iterations {
            warn!(
                "stopped at the iteration cap ({}) with energy {:.3}",
                self.params.max_iterations, total
            );
            session.stop(ExtractionStatus::IterationCap);
        } else {
            session.phase = Phase::Label;
        }
    }

    /// Regenerate over the remaining outliers while retries are left.
    fn after_convergence(&self, session: &mut ExtractionSession) {
        let has_outliers = session.labels.iter().any(|l| l.is_outlier());
        if has_outliers && session.regenerations < self.params.regeneration_retries {
            session.regenerations += 1;
            session.phase = Phase::Generate;
        } else if session.pool.active_count() == 0 {
            warn!("no plane survived in {} points", self.scene.len());
            session.stop(ExtractionStatus::NoPlaneFound);
        } else {
            session.stop(ExtractionStatus::Converged);
        }
    }
}

/// Extract planes from `index` with one normal per point.
///
/// # Errors
///
/// Returns [`ExtractError`] when `params` are invalid or `normals` is not
/// index-aligned with the points.
pub fn extract_planes<S: SpatialIndex + Sync>(
    index: &S,
    normals: &Normals,
    params: &ExtractParams,
) -> Result<Extraction, ExtractError> {
    Ok(PlaneExtractor::new(index, normals, *params)?.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::GreedyOracle;
    use planeseg_core::PointCloud;
    use planeseg_spatial::IndexedCloud;

    /// Floor and wall of 400 points each meeting along the y axis.
    fn corner() -> (PointCloud, Normals) {
        let mut pts = Vec::new();
        let mut normals = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                pts.push([0.05 + i as f32 * 0.1, j as f32 * 0.1, 0.0]);
                normals.push([0.0, 0.0, 1.0]);
            }
        }
        for i in 0..20 {
            for j in 0..20 {
                pts.push([0.0, j as f32 * 0.1, 0.05 + i as f32 * 0.1]);
                normals.push([1.0, 0.0, 0.0]);
            }
        }
        (PointCloud::from_points(&pts), Normals::from_vectors(&normals))
    }

    fn params() -> ExtractParams {
        ExtractParams {
            k_neighbors: 8,
            ..Default::default()
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn corner_yields_two_planes() {
        init_logging();
        let (cloud, normals) = corner();
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap();

        assert_eq!(result.status, ExtractionStatus::Converged);
        assert_eq!(result.plane_count(), 2);
        assert_eq!(result.outlier_count(), 0);
        for plane in &result.planes {
            assert_eq!(plane.support, 400);
            assert_eq!(result.inliers(plane.id).len(), 400);
            assert!(plane.rms < 1e-4);
        }
        // Floor and wall points are not mixed.
        let floor = result.labels[0];
        let wall = result.labels[400];
        assert_ne!(floor, wall);
        assert!(result.labels[..400].iter().all(|&l| l == floor));
        assert!(result.labels[400..].iter().all(|&l| l == wall));
    }

    #[test]
    fn energy_trace_never_increases() {
        let (cloud, normals) = corner();
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap();

        assert!(result.energy_trace.len() >= 3);
        for w in result.energy_trace.windows(2) {
            assert!(w[1] <= w[0] + 1e-9, "{} -> {}", w[0], w[1]);
        }
        let last = *result.energy_trace.last().unwrap();
        assert!((last - result.energy.total()).abs() < 1e-9);
    }

    #[test]
    fn phases_run_in_order() {
        let (cloud, normals) = corner();
        let extractor = PlaneExtractor::new(&IndexedCloud::new(&cloud), &normals, params()).unwrap();
        let mut session = extractor.start();

        assert_eq!(session.phase(), Phase::Generate);
        assert_eq!(extractor.step(&mut session), Phase::Label);
        assert_eq!(session.pool().len(), 2);
        assert_eq!(session.pool().active_count(), 0);

        assert_eq!(extractor.step(&mut session), Phase::Refine);
        assert_eq!(session.pool().active_count(), 2);
        assert!(session.labels().iter().all(|l| !l.is_outlier()));

        // The first iteration changed the energy, so labeling runs again.
        assert_eq!(extractor.step(&mut session), Phase::Label);
        assert_eq!(session.iteration(), 1);

        while !session.is_finished() {
            extractor.step(&mut session);
        }
        assert_eq!(session.status(), Some(ExtractionStatus::Converged));
        // Stepping a finished session is a no-op.
        let trace_len = session.energy_trace().len();
        assert_eq!(
            extractor.step(&mut session),
            Phase::Stopped(ExtractionStatus::Converged)
        );
        assert_eq!(session.energy_trace().len(), trace_len);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let (cloud, normals) = corner();
        let params = ExtractParams {
            max_iterations: 1,
            ..params()
        };
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params).unwrap();

        assert_eq!(result.status, ExtractionStatus::IterationCap);
        assert_eq!(result.iterations, 1);
        // Best-so-far result is still usable.
        assert_eq!(result.plane_count(), 2);
    }

    #[test]
    fn greedy_oracle_finds_the_same_planes() {
        let (cloud, normals) = corner();
        let result = PlaneExtractor::new(&IndexedCloud::new(&cloud), &normals, params())
            .unwrap()
            .with_oracle(GreedyOracle)
            .run();

        assert!(result.converged());
        assert_eq!(result.plane_count(), 2);
        assert_eq!(result.assigned_count(), 800);
    }

    #[test]
    fn clutter_around_a_noisy_floor() {
        use rand::prelude::*;
        use rand_distr::Normal;

        init_logging();
        let mut rng = StdRng::seed_from_u64(4);
        let noise = Normal::new(0.0f32, 0.003).unwrap();
        let mut pts = Vec::new();
        for i in 0..30 {
            for j in 0..30 {
                pts.push([i as f32 * 0.1, j as f32 * 0.1, noise.sample(&mut rng)]);
            }
        }
        for _ in 0..100 {
            pts.push([
                rng.gen_range(0.0f32..3.0),
                rng.gen_range(0.0f32..3.0),
                rng.gen_range(-1.5f32..1.5),
            ]);
        }
        // Exact normals on the floor, arbitrary ones in the clutter.
        let mut normals = vec![[0.0, 0.0, 1.0]; 900];
        normals.extend((0..100).map(|i| if i % 2 == 0 { [1.0, 0.0, 0.0] } else { [0.0, 0.6, 0.8] }));
        let cloud = PointCloud::from_points(&pts);
        let result = extract_planes(
            &IndexedCloud::new(&cloud),
            &Normals::from_vectors(&normals),
            &params(),
        )
        .unwrap();

        assert_eq!(result.plane_count(), 1);
        assert!(result.planes[0].plane.normal[2].abs() > 0.999);
        let rejected = result.labels[900..].iter().filter(|l| l.is_outlier()).count();
        assert!(rejected >= 80, "only {} of 100 clutter points rejected", rejected);
        assert!(result.labels[..900].iter().filter(|l| !l.is_outlier()).count() >= 880);
    }

    #[test]
    fn too_few_points_for_a_plane() {
        let pts: Vec<[f32; 3]> = (0..30)
            .map(|i| [(i % 6) as f32 * 0.1, (i / 6) as f32 * 0.1, 0.0])
            .collect();
        let cloud = PointCloud::from_points(&pts);
        let normals = Normals::from_vectors(&vec![[0.0, 0.0, 1.0]; 30]);
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap();

        assert_eq!(result.status, ExtractionStatus::NoPlaneFound);
        assert!(result.planes.is_empty());
        assert_eq!(result.outlier_count(), 30);
    }

    #[test]
    fn empty_cloud() {
        let cloud = PointCloud::new();
        let normals = Normals::new();
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap();

        assert_eq!(result.status, ExtractionStatus::EmptyInput);
        assert!(result.planes.is_empty());
        assert!(result.labels.is_empty());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn mismatched_normals_are_rejected() {
        let (cloud, _) = corner();
        let normals = Normals::from_vectors(&[[0.0, 0.0, 1.0]; 3]);
        let err = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::NormalsMismatch {
                normals_len: 3,
                cloud_len: 800
            }
        );
    }

    #[test]
    fn invalid_parameters_are_rejected_before_work() {
        let (cloud, normals) = corner();
        let params = ExtractParams {
            k_neighbors: 0,
            ..Default::default()
        };
        let err = extract_planes(&IndexedCloud::new(&cloud), &normals, &params).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::InvalidConfiguration {
                name: "k_neighbors",
                ..
            }
        ));
    }

    #[test]
    fn result_serializes() {
        let (cloud, normals) = corner();
        let result = extract_planes(&IndexedCloud::new(&cloud), &normals, &params()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "converged");
        assert_eq!(json["planes"].as_array().map(Vec::len), Some(2));
    }
}
