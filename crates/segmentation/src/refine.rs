use hashbrown::{HashMap, HashSet};
use log::debug;
use rayon::prelude::*;

use crate::energy::EnergyModel;
use crate::fit::{PlaneFit, WeightedPcaFit};
use crate::label::{Label, ModelId};
use crate::plane::PlaneModel;
use crate::pool::CandidatePool;
use crate::scene::Scene;

const IRLS_MAX_ITERATIONS: usize = 50;
const IRLS_TOLERANCE: f32 = 1e-6;

/// What one refine phase changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineReport {
    pub refitted: usize,
    pub merged: usize,
    pub pruned: usize,
    /// Points returned to the outlier class by pruning undersized models.
    pub reverted: usize,
}

impl RefineReport {
    /// Labels or the set of supported models changed. Dropping models that
    /// had already lost all their points does not count.
    pub fn structural_change(&self) -> bool {
        self.merged > 0 || self.reverted > 0
    }
}

/// Robust plane refit over the points `members`, starting from `start`.
///
/// Iteratively reweighted least squares: each point is weighted by the
/// agreement of its normal with the current plane times the Cauchy weight
/// `1 / (1 + (r / epsilon)^2)` of its residual. Iterates to a fixed point, so
/// refitting the result again returns (numerically) the same plane.
///
/// Returns `None` if the first weighted fit is degenerate.
pub fn irls_refit(scene: &Scene, start: &PlaneModel, members: &[usize]) -> Option<PlaneModel> {
    if members.len() < 3 {
        return None;
    }
    let points: Vec<[f32; 3]> = members.iter().map(|&i| *scene.point(i)).collect();
    let inv_eps = 1.0 / scene.epsilon();
    let mut weights = vec![0.0f32; members.len()];
    let mut plane = *start;

    for iteration in 0..IRLS_MAX_ITERATIONS {
        for (w, &i) in weights.iter_mut().zip(members) {
            let r = plane.distance_to_point(scene.point(i)) * inv_eps;
            *w = plane.normal_agreement(scene.normal(i)) / (1.0 + r * r);
        }
        let next = match WeightedPcaFit.fit(&points, &weights) {
            Some(next) => next,
            None if iteration == 0 => return None,
            None => break,
        };
        let step = plane_step(&plane, &next);
        plane = next;
        if step < IRLS_TOLERANCE {
            break;
        }
    }

    Some(plane)
}

/// Largest change of a normal component or of the offset between two planes,
/// after aligning their orientations.
fn plane_step(a: &PlaneModel, b: &PlaneModel) -> f32 {
    let s = if crate::plane::dot(&a.normal, &b.normal) < 0.0 {
        -1.0
    } else {
        1.0
    };
    let mut step = (a.d - s * b.d).abs() / (1.0 + a.d.abs());
    for k in 0..3 {
        step = step.max((a.normal[k] - s * b.normal[k]).abs());
    }
    step
}

/// Refits, merges and prunes the models of a labeling.
pub struct Refiner<'a> {
    scene: &'a Scene,
    energy: &'a EnergyModel,
    min_support: usize,
    merge_angle: f32,
    merge_distance: f32,
}

impl<'a> Refiner<'a> {
    /// `merge_angle` is in degrees.
    pub fn new(
        scene: &'a Scene,
        energy: &'a EnergyModel,
        min_support: usize,
        merge_angle: f32,
        merge_distance: f32,
    ) -> Self {
        Self {
            scene,
            energy,
            min_support,
            merge_angle: merge_angle.to_radians(),
            merge_distance,
        }
    }

    /// Refit every supported model, merge compatible neighbors, then drop
    /// models without support. Never increases the energy of a labeling in
    /// which every model has zero support or at least `min_support` points.
    pub fn run(&self, pool: &mut CandidatePool, labels: &mut [Label]) -> RefineReport {
        let mut members = self.members(labels);
        let mut report = RefineReport {
            refitted: self.refit(pool, &members),
            ..Default::default()
        };
        report.merged = self.merge(pool, labels, &mut members);
        (report.pruned, report.reverted) = self.prune(pool, labels, &members);

        debug!(
            "refine: {} refitted, {} merged, {} pruned ({} points reverted), {} models left",
            report.refitted,
            report.merged,
            report.pruned,
            report.reverted,
            pool.len()
        );
        report
    }

    fn members(&self, labels: &[Label]) -> HashMap<ModelId, Vec<usize>> {
        let mut members: HashMap<ModelId, Vec<usize>> = HashMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let Some(id) = label.model() {
                members.entry(id).or_default().push(i);
            }
        }
        members
    }

    fn data_sum(&self, plane: &PlaneModel, points: &[usize]) -> f64 {
        points
            .iter()
            .map(|&i| {
                self.energy
                    .data_cost(self.scene.point(i), self.scene.normal(i), plane)
            })
            .sum()
    }

    /// Re-estimate each supported plane; a refit is kept only if it does not
    /// raise the data cost of the model's points.
    fn refit(&self, pool: &mut CandidatePool, members: &HashMap<ModelId, Vec<usize>>) -> usize {
        let jobs: Vec<(ModelId, PlaneModel, &[usize])> = pool
            .iter()
            .filter_map(|m| members.get(&m.id).map(|pts| (m.id, m.plane, pts.as_slice())))
            .collect();

        let refits: Vec<(ModelId, PlaneModel)> = jobs
            .par_iter()
            .filter_map(|&(id, plane, pts)| {
                let next = irls_refit(self.scene, &plane, pts)?;
                if next == plane || !next.is_finite() {
                    return None;
                }
                (self.data_sum(&next, pts) <= self.data_sum(&plane, pts)).then_some((id, next))
            })
            .collect();

        let count = refits.len();
        for (id, plane) in refits {
            if let Some(model) = pool.get_mut(id) {
                model.plane = plane;
            }
        }
        count
    }

    /// Merge pairs of nearly coincident planes whose supports touch, most
    /// parallel pairs first. Each model takes part in at most one merge per
    /// call.
    fn merge(
        &self,
        pool: &mut CandidatePool,
        labels: &mut [Label],
        members: &mut HashMap<ModelId, Vec<usize>>,
    ) -> usize {
        // Total weight of the graph edges between each pair of models.
        let mut cuts: HashMap<(ModelId, ModelId), f64> = HashMap::new();
        for (i, j, slot) in self.scene.graph().undirected_edges() {
            if let (Some(a), Some(b)) = (labels[i].model(), labels[j].model()) {
                if a != b {
                    *cuts.entry((a.min(b), a.max(b))).or_default() += self.energy.edge_weight(slot);
                }
            }
        }

        let mut pairs: Vec<(f32, ModelId, ModelId, f64)> = cuts
            .into_iter()
            .filter_map(|((a, b), cut)| {
                let pa = pool.get(a)?.plane;
                let pb = pool.get(b)?.plane;
                let angle = pa.angle_to(&pb);
                (angle <= self.merge_angle && pa.offset_difference(&pb) <= self.merge_distance)
                    .then_some((angle, a, b, cut))
            })
            .collect();
        pairs.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let beta = self.energy.model_penalty();
        let mut touched: HashSet<ModelId> = HashSet::new();
        let mut merged = 0;
        for (_, a, b, cut) in pairs {
            if touched.contains(&a) || touched.contains(&b) {
                continue;
            }
            let (Some(ma), Some(mb)) = (pool.get(a), pool.get(b)) else {
                continue;
            };
            // Pairs are keyed with `a < b`, so ties go to `a`.
            let (survivor, victim) = if mb.support > ma.support {
                (mb.clone(), ma.clone())
            } else {
                (ma.clone(), mb.clone())
            };

            let survivor_points = members.remove(&survivor.id).unwrap_or_default();
            let victim_points = members.remove(&victim.id).unwrap_or_default();
            let union: Vec<usize> = survivor_points.iter().chain(&victim_points).copied().collect();

            let plane = irls_refit(self.scene, &survivor.plane, &union)
                .filter(PlaneModel::is_finite)
                .unwrap_or(survivor.plane);
            let before = self.data_sum(&survivor.plane, &survivor_points)
                + self.data_sum(&victim.plane, &victim_points);
            let delta = self.data_sum(&plane, &union) - before - cut - beta;

            if delta > 0.0 {
                members.insert(survivor.id, survivor_points);
                members.insert(victim.id, victim_points);
                continue;
            }

            let to = Label::plane(survivor.id);
            for &i in &victim_points {
                labels[i] = to;
            }
            if let Some(model) = pool.get_mut(survivor.id) {
                model.plane = plane;
                model.support += victim_points.len();
            }
            if let Some(model) = pool.get_mut(victim.id) {
                model.support = 0;
            }
            members.insert(survivor.id, union);
            touched.insert(a);
            touched.insert(b);
            merged += 1;
        }
        merged
    }

    /// Remove models without support. Models below `min_support` give their
    /// points back to the outlier class first. Returns the number of models
    /// removed and of points reverted.
    fn prune(
        &self,
        pool: &mut CandidatePool,
        labels: &mut [Label],
        members: &HashMap<ModelId, Vec<usize>>,
    ) -> (usize, usize) {
        let doomed: Vec<ModelId> = pool
            .iter()
            .filter(|m| m.support < self.min_support)
            .map(|m| m.id)
            .collect();
        let mut reverted = 0;
        for id in &doomed {
            if let Some(points) = members.get(id) {
                for &i in points {
                    if labels[i] == Label::plane(*id) {
                        labels[i] = Label::OUTLIER;
                        reverted += 1;
                    }
                }
            }
        }
        (pool.remove_many(&doomed).len(), reverted)
    }
}
