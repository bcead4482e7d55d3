use hashbrown::HashMap;

use crate::label::{Label, ModelId};
use crate::plane::PlaneModel;

/// A plane hypothesis with the number of points currently labeled to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: ModelId,
    pub plane: PlaneModel,
    pub support: usize,
}

/// Ordered collection of plane hypotheses addressable by id.
///
/// Ids grow monotonically and are never reused, so a removed model's id
/// never refers to a different plane later in the run.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    models: Vec<Model>,
    slots: HashMap<ModelId, usize>,
    next_id: u32,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hypothesis with zero support and return its id.
    pub fn insert(&mut self, plane: PlaneModel) -> ModelId {
        let id = ModelId(self.next_id);
        self.next_id += 1;
        self.slots.insert(id, self.models.len());
        self.models.push(Model {
            id,
            plane,
            support: 0,
        });
        id
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.slots.get(&id).map(|&slot| &self.models[slot])
    }

    pub fn get_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        match self.slots.get(&id) {
            Some(&slot) => Some(&mut self.models[slot]),
            None => None,
        }
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Support of `id`, zero for unknown ids.
    pub fn support(&self, id: ModelId) -> usize {
        self.get(id).map_or(0, |m| m.support)
    }

    /// Remove every model in `ids`, keeping the order of the rest.
    pub fn remove_many(&mut self, ids: &[ModelId]) -> Vec<Model> {
        if ids.is_empty() {
            return Vec::new();
        }
        let (removed, kept): (Vec<Model>, Vec<Model>) = std::mem::take(&mut self.models)
            .into_iter()
            .partition(|m| ids.contains(&m.id));
        self.models = kept;
        self.slots = self
            .models
            .iter()
            .enumerate()
            .map(|(slot, m)| (m.id, slot))
            .collect();
        removed
    }

    pub fn remove(&mut self, id: ModelId) -> Option<Model> {
        self.remove_many(&[id]).pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    /// Ids in pool order.
    pub fn ids(&self) -> Vec<ModelId> {
        self.models.iter().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Number of models with non-zero support.
    pub fn active_count(&self) -> usize {
        self.models.iter().filter(|m| m.support > 0).count()
    }

    /// Recompute every model's support from `labels`.
    pub fn recount_support(&mut self, labels: &[Label]) {
        for m in &mut self.models {
            m.support = 0;
        }
        for label in labels {
            if let Some(&slot) = label.model().and_then(|id| self.slots.get(&id)) {
                self.models[slot].support += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(d: f32) -> PlaneModel {
        PlaneModel {
            normal: [0.0, 0.0, 1.0],
            d,
        }
    }

    #[test]
    fn ids_are_never_reused() {
        let mut pool = CandidatePool::new();
        let a = pool.insert(plane(0.0));
        let b = pool.insert(plane(-1.0));
        assert_ne!(a, b);

        assert!(pool.remove(b).is_some());
        let c = pool.insert(plane(-2.0));
        assert_ne!(c, b);
        assert!(!pool.contains(b));
        assert_eq!(pool.get(c).unwrap().plane.d, -2.0);
    }

    #[test]
    fn removal_keeps_order() {
        let mut pool = CandidatePool::new();
        let ids: Vec<ModelId> = (0..5).map(|i| pool.insert(plane(-(i as f32)))).collect();
        let removed = pool.remove_many(&[ids[1], ids[3]]);
        assert_eq!(removed.len(), 2);
        assert_eq!(pool.ids(), vec![ids[0], ids[2], ids[4]]);
        assert_eq!(pool.get(ids[4]).unwrap().plane.d, -4.0);
        assert!(pool.get(ids[3]).is_none());
    }

    #[test]
    fn recount_matches_labels() {
        let mut pool = CandidatePool::new();
        let a = pool.insert(plane(0.0));
        let b = pool.insert(plane(-1.0));
        let c = pool.insert(plane(-2.0));
        let labels = vec![
            Label::plane(a),
            Label::OUTLIER,
            Label::plane(a),
            Label::plane(c),
            Label::plane(ModelId(99)),
        ];
        pool.recount_support(&labels);
        assert_eq!(pool.support(a), 2);
        assert_eq!(pool.support(b), 0);
        assert_eq!(pool.support(c), 1);
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut pool = CandidatePool::new();
        let a = pool.insert(plane(0.0));
        pool.get_mut(a).unwrap().support = 7;
        assert_eq!(pool.support(a), 7);
        assert!(pool.get_mut(ModelId(42)).is_none());
    }
}
