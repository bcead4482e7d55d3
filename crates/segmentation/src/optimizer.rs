use hashbrown::{HashMap, HashSet};
use log::debug;
use rayon::prelude::*;

use crate::energy::EnergyModel;
use crate::label::{Label, ModelId};
use crate::oracle::{LabelOracle, MoveProblem};
use crate::pool::CandidatePool;
use crate::scene::Scene;

/// Moves must lower the energy by more than this to be applied.
const ACCEPT_EPS: f64 = 1e-9;

/// Summary of one labeling phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelReport {
    pub passes: usize,
    pub expansions: usize,
    pub removals: usize,
    /// The last pass accepted no move.
    pub converged: bool,
}

impl LabelReport {
    pub fn accepted(&self) -> usize {
        self.expansions + self.removals
    }
}

/// One point's proposed new label and the unary cost it would carry.
#[derive(Debug, Clone, Copy)]
struct Change {
    point: usize,
    label: Label,
    cost: f64,
}

struct MoveDelta {
    delta: f64,
    support_delta: HashMap<ModelId, i64>,
}

/// Expansion/removal label optimizer.
///
/// Every applied move strictly lowers the energy, and no applied move leaves
/// a model with support in `(0, min_support)`.
pub struct LabelOptimizer<'a, O: LabelOracle> {
    scene: &'a Scene,
    energy: &'a EnergyModel,
    oracle: &'a O,
    min_support: usize,
    max_passes: usize,
}

impl<'a, O: LabelOracle> LabelOptimizer<'a, O> {
    pub fn new(
        scene: &'a Scene,
        energy: &'a EnergyModel,
        oracle: &'a O,
        min_support: usize,
        max_passes: usize,
    ) -> Self {
        Self {
            scene,
            energy,
            oracle,
            min_support,
            max_passes,
        }
    }

    /// Run expansion passes until one accepts no move or the pass cap is hit.
    ///
    /// `pool` supports must match `labels` on entry and are kept in sync.
    pub fn run(&self, pool: &mut CandidatePool, labels: &mut [Label]) -> LabelReport {
        let mut unary = self.energy.unary_costs(self.scene, pool, labels);
        let mut report = LabelReport::default();

        for pass in 0..self.max_passes {
            let mut accepted = 0;

            for id in pool.ids() {
                if self.expand(Label::plane(id), pool, labels, &mut unary) {
                    report.expansions += 1;
                    accepted += 1;
                }
            }
            if self.expand(Label::OUTLIER, pool, labels, &mut unary) {
                report.expansions += 1;
                accepted += 1;
            }
            for id in pool.ids() {
                if pool.support(id) > 0 && self.remove_model(id, pool, labels, &mut unary) {
                    report.removals += 1;
                    accepted += 1;
                }
            }

            report.passes = pass + 1;
            debug!(
                "label pass {}: {} moves accepted, {} active models",
                pass,
                accepted,
                pool.active_count()
            );
            if accepted == 0 {
                report.converged = true;
                break;
            }
        }

        report
    }

    /// Try to switch points to `alpha`.
    fn expand(
        &self,
        alpha: Label,
        pool: &mut CandidatePool,
        labels: &mut [Label],
        unary: &mut [f64],
    ) -> bool {
        let n = labels.len();
        let alpha_costs: Vec<f64> = {
            let pool: &CandidatePool = pool;
            (0..n)
                .into_par_iter()
                .map(|i| self.energy.unary(self.scene, pool, i, alpha))
                .collect()
        };

        // A point whose alpha cost exceeds its current cost plus every
        // incident edge weight cannot lower the energy by switching.
        let candidates: Vec<usize> = (0..n)
            .filter(|&i| {
                labels[i] != alpha && alpha_costs[i] < unary[i] + self.energy.smooth_total(i)
            })
            .collect();
        if candidates.is_empty() {
            return false;
        }

        let keep_cost: Vec<f64> = candidates.iter().map(|&i| unary[i]).collect();
        let switch_cost: Vec<f64> = candidates.iter().map(|&i| alpha_costs[i]).collect();
        let position = MoveProblem::positions(&candidates, n);
        let problem = MoveProblem {
            alpha,
            candidates: &candidates,
            keep_cost: &keep_cost,
            switch_cost: &switch_cost,
            position: &position,
            labels,
            graph: self.scene.graph(),
            edge_weights: self.energy.edge_weights(),
        };
        let decisions = self.oracle.solve(&problem);

        let mut changes: Vec<Change> = candidates
            .iter()
            .zip(&decisions)
            .filter(|(_, switch)| **switch)
            .map(|(&point, _)| Change {
                point,
                label: alpha,
                cost: alpha_costs[point],
            })
            .collect();
        self.keep_feasible(&mut changes, pool, labels);

        self.try_apply(&changes, pool, labels, unary)
    }

    /// Relabel every point of `id` to its cheapest other label: the outlier
    /// class or any other active model, with the edges to points outside the
    /// model held at their current labels.
    fn remove_model(
        &self,
        id: ModelId,
        pool: &mut CandidatePool,
        labels: &mut [Label],
        unary: &mut [f64],
    ) -> bool {
        let removed = Label::plane(id);
        let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == removed).collect();
        if members.is_empty() {
            return false;
        }

        let targets: Vec<Label> = pool
            .iter()
            .filter(|m| m.support > 0 && m.id != id)
            .map(|m| Label::plane(m.id))
            .collect();

        let changes: Vec<Change> = {
            let pool: &CandidatePool = pool;
            let labels: &[Label] = labels;
            members
                .par_iter()
                .map(|&p| {
                    let outlier_cost = self.energy.outlier_penalty();
                    let mut best = Change {
                        point: p,
                        label: Label::OUTLIER,
                        cost: outlier_cost,
                    };
                    let mut best_total =
                        outlier_cost + self.boundary_cost(p, Label::OUTLIER, removed, labels);

                    for &l in &targets {
                        let cost = self.energy.unary(self.scene, pool, p, l);
                        if cost >= best_total {
                            continue;
                        }
                        let total = cost + self.boundary_cost(p, l, removed, labels);
                        if total < best_total {
                            best_total = total;
                            best = Change {
                                point: p,
                                label: l,
                                cost,
                            };
                        }
                    }
                    best
                })
                .collect()
        };

        self.try_apply(&changes, pool, labels, unary)
    }

    /// Weight of the edges of `p` that would be cut if `p` took `label`,
    /// ignoring neighbors labeled `exclude`.
    fn boundary_cost(&self, p: usize, label: Label, exclude: Label, labels: &[Label]) -> f64 {
        self.scene
            .graph()
            .edges_of(p)
            .filter(|&(q, _)| labels[q] != exclude && labels[q] != label)
            .map(|(_, slot)| self.energy.edge_weight(slot))
            .sum()
    }

    /// Drop the changes that would leave their source model with support in
    /// `(0, min_support)`.
    fn keep_feasible(&self, changes: &mut Vec<Change>, pool: &CandidatePool, labels: &[Label]) {
        let mut lost: HashMap<ModelId, usize> = HashMap::new();
        for c in changes.iter() {
            if let Some(id) = labels[c.point].model() {
                *lost.entry(id).or_default() += 1;
            }
        }
        let violating: HashSet<ModelId> = lost
            .iter()
            .filter(|(id, lost)| {
                let rest = pool.support(**id).saturating_sub(**lost);
                rest > 0 && rest < self.min_support
            })
            .map(|(id, _)| *id)
            .collect();
        if !violating.is_empty() {
            changes.retain(|c| {
                labels[c.point]
                    .model()
                    .map_or(true, |id| !violating.contains(&id))
            });
        }
    }

    fn try_apply(
        &self,
        changes: &[Change],
        pool: &mut CandidatePool,
        labels: &mut [Label],
        unary: &mut [f64],
    ) -> bool {
        if changes.is_empty() {
            return false;
        }
        let Some(outcome) = self.move_delta(changes, pool, labels, unary) else {
            return false;
        };
        if outcome.delta >= -ACCEPT_EPS {
            return false;
        }

        for c in changes {
            labels[c.point] = c.label;
            unary[c.point] = c.cost;
        }
        for (id, d) in outcome.support_delta {
            if let Some(model) = pool.get_mut(id) {
                model.support = (model.support as i64 + d) as usize;
            }
        }
        true
    }

    /// Exact energy change of applying `changes`, or `None` if the result
    /// violates the support rule.
    fn move_delta(
        &self,
        changes: &[Change],
        pool: &CandidatePool,
        labels: &[Label],
        unary: &[f64],
    ) -> Option<MoveDelta> {
        let changed: HashMap<usize, Label> = changes.iter().map(|c| (c.point, c.label)).collect();
        let graph = self.scene.graph();

        let mut delta = 0.0f64;
        let mut support_delta: HashMap<ModelId, i64> = HashMap::new();
        for c in changes {
            let p = c.point;
            let old = labels[p];
            delta += c.cost - unary[p];
            if let Some(id) = old.model() {
                *support_delta.entry(id).or_default() -= 1;
            }
            if let Some(id) = c.label.model() {
                *support_delta.entry(id).or_default() += 1;
            }

            for (q, slot) in graph.edges_of(p) {
                // Edges between two changed points are counted from the
                // lower index only.
                let new_q = match changed.get(&q) {
                    Some(_) if q < p => continue,
                    Some(&l) => l,
                    None => labels[q],
                };
                let before = old != labels[q];
                let after = c.label != new_q;
                if before != after {
                    let w = self.energy.edge_weight(slot);
                    delta += if after { w } else { -w };
                }
            }
        }

        let beta = self.energy.model_penalty();
        for (&id, &d) in &support_delta {
            let before = pool.support(id) as i64;
            let after = before + d;
            if after < 0 || (after > 0 && (after as usize) < self.min_support) {
                return None;
            }
            delta += beta * ((after > 0) as i64 - (before > 0) as i64) as f64;
        }

        Some(MoveDelta {
            delta,
            support_delta,
        })
    }
}
