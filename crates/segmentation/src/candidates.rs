use std::collections::VecDeque;

use log::debug;
use planeseg_normals::pca;

use crate::fit::{PlaneFit, WeightedPcaFit};
use crate::label::Label;
use crate::plane::PlaneModel;
use crate::scene::Scene;

/// Position of the generator in the seed order, kept across generation
/// rounds so that later rounds only try fresh seeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedCursor {
    next: usize,
}

impl SeedCursor {
    /// Number of seeds consumed so far.
    pub fn consumed(&self) -> usize {
        self.next
    }
}

/// A plane hypothesis with the region that produced it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub plane: PlaneModel,
    pub region: Vec<usize>,
}

/// Proposes planes by region growing from the flattest uncovered points.
pub struct CandidateGenerator<'a, F: PlaneFit = WeightedPcaFit> {
    scene: &'a Scene,
    fit: F,
    min_support: usize,
    n_constraints: usize,
    cos_gate: f32,
    proposal_ratio: f32,
    min_uncovered_ratio: f32,
}

impl<'a> CandidateGenerator<'a, WeightedPcaFit> {
    /// `normal_angle_threshold` is in degrees.
    pub fn new(
        scene: &'a Scene,
        min_support: usize,
        n_constraints: usize,
        normal_angle_threshold: f32,
        proposal_ratio: f32,
        min_uncovered_ratio: f32,
    ) -> Self {
        Self {
            scene,
            fit: WeightedPcaFit,
            min_support,
            n_constraints,
            cos_gate: normal_angle_threshold.to_radians().cos(),
            proposal_ratio,
            min_uncovered_ratio,
        }
    }
}

impl<'a, F: PlaneFit> CandidateGenerator<'a, F> {
    /// Use a different plane estimator.
    pub fn with_fit<G: PlaneFit>(self, fit: G) -> CandidateGenerator<'a, G> {
        CandidateGenerator {
            scene: self.scene,
            fit,
            min_support: self.min_support,
            n_constraints: self.n_constraints,
            cos_gate: self.cos_gate,
            proposal_ratio: self.proposal_ratio,
            min_uncovered_ratio: self.min_uncovered_ratio,
        }
    }

    /// Grow candidates from seeds not tried in earlier rounds.
    ///
    /// Points with a plane label are covered from the start, and every
    /// accepted region covers its points. Labels are not modified.
    pub fn generate(&self, labels: &[Label], cursor: &mut SeedCursor) -> Vec<Candidate> {
        let n = self.scene.len();
        let mut covered: Vec<bool> = labels.iter().map(|l| !l.is_outlier()).collect();
        let mut uncovered = covered.iter().filter(|c| !**c).count();
        let stop_below = (self.min_uncovered_ratio as f64 * n as f64).ceil() as usize;
        let budget = ((self.proposal_ratio as f64 * n as f64) as usize).max(1);

        let mut stamp = vec![0u32; n];
        let mut epoch = 0u32;
        let mut attempts = 0;
        let mut candidates = Vec::new();
        let order = self.scene.seed_order();

        while cursor.next < order.len() && attempts < budget {
            if uncovered == 0 || uncovered < stop_below {
                break;
            }
            let seed = order[cursor.next];
            cursor.next += 1;
            if covered[seed] {
                continue;
            }
            attempts += 1;
            epoch += 1;

            if let Some(candidate) = self.grow(seed, &covered, &mut stamp, epoch) {
                for &i in &candidate.region {
                    covered[i] = true;
                }
                uncovered -= candidate.region.len();
                candidates.push(candidate);
            }
        }

        debug!(
            "generator: {} candidates from {} seeds, {} points uncovered",
            candidates.len(),
            attempts,
            uncovered
        );
        candidates
    }

    /// Region growing from one seed. `stamp[i] == epoch` marks points already
    /// in the region.
    fn grow(&self, seed: usize, covered: &[bool], stamp: &mut [u32], epoch: u32) -> Option<Candidate> {
        let scene = self.scene;
        let graph = scene.graph();
        let seed_normal = scene.normal(seed);

        let mut compatible = vec![seed];
        compatible.extend(graph.neighbors(seed).filter(|&q| {
            !covered[q] && agreement(seed_normal, scene.normal(q)) >= self.cos_gate
        }));
        if compatible.len() < self.n_constraints {
            return None;
        }
        let mut plane = self.fit_region(&compatible, seed_normal)?;

        let epsilon = scene.epsilon();
        let mut region = vec![seed];
        stamp[seed] = epoch;
        let mut queue = VecDeque::from([seed]);
        let mut next_refit = 2 * compatible.len();

        while let Some(p) = queue.pop_front() {
            for q in graph.neighbors(p) {
                if covered[q] || stamp[q] == epoch {
                    continue;
                }
                if plane.distance_to_point(scene.point(q)) > epsilon
                    || plane.normal_agreement(scene.normal(q)) < self.cos_gate
                {
                    continue;
                }
                stamp[q] = epoch;
                region.push(q);
                queue.push_back(q);

                if region.len() >= next_refit {
                    if let Some(refit) = self.fit_region(&region, &plane.normal) {
                        plane = refit;
                    }
                    next_refit *= 2;
                }
            }
        }

        if region.len() < self.min_support {
            return None;
        }
        let plane = self.fit_region(&region, &plane.normal).unwrap_or(plane);

        // Strips along creases and lines are not planes.
        let points: Vec<[f32; 3]> = region.iter().map(|&i| *scene.point(i)).collect();
        let spread = pca(&points).map_or(0.0, |frame| frame.secondary_spread());
        if spread < 0.5 * scene.resolution() {
            return None;
        }

        Some(Candidate { plane, region })
    }

    /// Fit over `indices`, each weighted by the agreement of its normal with
    /// `reference`.
    fn fit_region(&self, indices: &[usize], reference: &[f32; 3]) -> Option<PlaneModel> {
        let points: Vec<[f32; 3]> = indices.iter().map(|&i| *self.scene.point(i)).collect();
        let weights: Vec<f32> = indices
            .iter()
            .map(|&i| agreement(reference, self.scene.normal(i)))
            .collect();
        self.fit.fit(&points, &weights)
    }
}

#[inline]
fn agreement(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    crate::plane::dot(a, b).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::ThreePointFit;
    use crate::label::ModelId;
    use planeseg_core::{Normals, PointCloud};
    use planeseg_spatial::IndexedCloud;

    /// Floor `z = 0` for `x >= 0.05` and wall `x = 0` for `z >= 0.05`, both
    /// 20 x 20 with spacing 0.1, with exact normals.
    fn corner_scene() -> Scene {
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
        let cloud = PointCloud::from_points(&pts);
        Scene::build(
            &IndexedCloud::new(&cloud),
            &Normals::from_vectors(&normals),
            8,
            None,
        )
    }

    fn generator(scene: &Scene) -> CandidateGenerator<'_> {
        CandidateGenerator::new(scene, 50, 3, 30.0, 0.25, 0.01)
    }

    #[test]
    fn finds_both_faces_of_a_corner() {
        let scene = corner_scene();
        let labels = vec![Label::OUTLIER; scene.len()];
        let mut cursor = SeedCursor::default();
        let candidates = generator(&scene).generate(&labels, &mut cursor);

        assert_eq!(candidates.len(), 2);
        let mut axes: Vec<usize> = candidates
            .iter()
            .map(|c| {
                let n = c.plane.normal;
                (0..3).max_by(|&a, &b| n[a].abs().total_cmp(&n[b].abs())).unwrap()
            })
            .collect();
        axes.sort();
        assert_eq!(axes, vec![0, 2]);
        for c in &candidates {
            assert_eq!(c.region.len(), 400);
        }
    }

    #[test]
    fn regions_do_not_overlap() {
        let scene = corner_scene();
        let labels = vec![Label::OUTLIER; scene.len()];
        let mut cursor = SeedCursor::default();
        let candidates = generator(&scene).generate(&labels, &mut cursor);

        let mut seen = vec![false; scene.len()];
        for c in &candidates {
            for &i in &c.region {
                assert!(!seen[i], "point {} in two regions", i);
                seen[i] = true;
            }
        }
    }

    #[test]
    fn labeled_points_are_not_proposed_again() {
        let scene = corner_scene();
        // The floor is already explained.
        let labels: Vec<Label> = (0..scene.len())
            .map(|i| if i < 400 { Label::plane(ModelId(0)) } else { Label::OUTLIER })
            .collect();
        let mut cursor = SeedCursor::default();
        let candidates = generator(&scene).generate(&labels, &mut cursor);

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].plane.normal[0].abs() > 0.99);
        assert!(candidates[0].region.iter().all(|&i| i >= 400));
    }

    #[test]
    fn later_rounds_use_fresh_seeds() {
        let scene = corner_scene();
        let labels = vec![Label::OUTLIER; scene.len()];
        let mut cursor = SeedCursor::default();
        let gen = generator(&scene);
        assert!(!gen.generate(&labels, &mut cursor).is_empty());
        let consumed = cursor.consumed();
        assert!(consumed > 0);

        // Same labels again: the next round starts after the spent seeds.
        let again = gen.generate(&labels, &mut cursor);
        assert!(cursor.consumed() > consumed);
        assert!(again.len() <= 2);
    }

    #[test]
    fn line_is_not_a_plane() {
        let pts: Vec<[f32; 3]> = (0..200).map(|i| [i as f32 * 0.01, 0.0, 0.0]).collect();
        let cloud = PointCloud::from_points(&pts);
        let scene = Scene::build(
            &IndexedCloud::new(&cloud),
            &Normals::from_vectors(&vec![[0.0, 0.0, 1.0]; 200]),
            6,
            Some(0.01),
        );
        let labels = vec![Label::OUTLIER; scene.len()];
        let candidates = generator(&scene)
            .with_fit(ThreePointFit)
            .generate(&labels, &mut SeedCursor::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn sparse_support_is_rejected() {
        let scene = corner_scene();
        let labels = vec![Label::OUTLIER; scene.len()];
        let candidates = CandidateGenerator::new(&scene, 1000, 3, 30.0, 0.25, 0.01)
            .generate(&labels, &mut SeedCursor::default());
        assert!(candidates.is_empty());
    }
}
