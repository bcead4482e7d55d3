use crate::graph::NeighborGraph;
use crate::label::Label;

/// Marker for points outside the move's candidate set.
const NOT_CANDIDATE: u32 = u32::MAX;

/// Binary subproblem of one expansion move: every candidate point either
/// keeps its label or switches to `alpha`.
///
/// Non-candidate points keep their current label.
pub struct MoveProblem<'a> {
    pub alpha: Label,
    /// Point indices allowed to switch.
    pub candidates: &'a [usize],
    /// Per candidate, the unary cost of its current label.
    pub keep_cost: &'a [f64],
    /// Per candidate, the unary cost of `alpha`.
    pub switch_cost: &'a [f64],
    /// Per point, the position in `candidates` or `u32::MAX`.
    pub position: &'a [u32],
    pub labels: &'a [Label],
    pub graph: &'a NeighborGraph,
    /// Per edge slot, the discontinuity weight.
    pub edge_weights: &'a [f64],
}

impl MoveProblem<'_> {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Costs of switching and of keeping candidate `pos`, given the current
    /// decisions `x` of the other candidates.
    pub fn local_costs(&self, pos: usize, x: &[bool]) -> (f64, f64) {
        let p = self.candidates[pos];
        let current = self.labels[p];
        let mut switch = self.switch_cost[pos];
        let mut keep = self.keep_cost[pos];
        for (q, slot) in self.graph.edges_of(p) {
            let qpos = self.position[q];
            let lq = if qpos != NOT_CANDIDATE && x[qpos as usize] {
                self.alpha
            } else {
                self.labels[q]
            };
            let w = self.edge_weights[slot];
            if lq != self.alpha {
                switch += w;
            }
            if lq != current {
                keep += w;
            }
        }
        (switch, keep)
    }

    /// Point-to-position map for `candidates` over `n` points.
    pub fn positions(candidates: &[usize], n: usize) -> Vec<u32> {
        let mut position = vec![NOT_CANDIDATE; n];
        for (pos, &p) in candidates.iter().enumerate() {
            position[p] = pos as u32;
        }
        position
    }
}

/// Solver for the binary subproblem of an expansion move.
///
/// The result is a proposal; the caller applies it only if the exact energy
/// decreases. Oracles are shared with the parallel cost evaluation of the
/// optimizer, hence `Sync`.
pub trait LabelOracle: Sync {
    /// One flag per candidate, `true` to switch to `alpha`.
    fn solve(&self, problem: &MoveProblem<'_>) -> Vec<bool>;
}

/// Iterated conditional modes, started from the unary decision.
#[derive(Debug, Clone, Copy)]
pub struct IcmOracle {
    pub sweeps: usize,
}

impl Default for IcmOracle {
    fn default() -> Self {
        Self { sweeps: 4 }
    }
}

impl LabelOracle for IcmOracle {
    fn solve(&self, problem: &MoveProblem<'_>) -> Vec<bool> {
        let mut x: Vec<bool> = problem
            .switch_cost
            .iter()
            .zip(problem.keep_cost)
            .map(|(s, k)| s < k)
            .collect();

        for _ in 0..self.sweeps {
            let mut changed = false;
            for pos in 0..problem.len() {
                let (switch, keep) = problem.local_costs(pos, &x);
                let decision = switch < keep;
                if decision != x[pos] {
                    x[pos] = decision;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        x
    }
}

/// Unary comparison only: a candidate switches when its `alpha` cost is below
/// the cost of its current label. Smoothness is left to the exact energy
/// check of the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyOracle;

impl LabelOracle for GreedyOracle {
    fn solve(&self, problem: &MoveProblem<'_>) -> Vec<bool> {
        problem
            .switch_cost
            .iter()
            .zip(problem.keep_cost)
            .map(|(s, k)| s < k)
            .collect()
    }
}
