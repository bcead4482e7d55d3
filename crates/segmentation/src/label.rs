use serde::{Deserialize, Serialize};

/// Stable identity of a plane model. Assigned by the candidate pool and never
/// reused within one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub u32);

/// Per-point assignment: either a plane model or the outlier class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(u32);

impl Label {
    /// Reserved sentinel for points explained by no plane.
    pub const OUTLIER: Label = Label(u32::MAX);

    #[inline]
    pub fn plane(id: ModelId) -> Self {
        debug_assert_ne!(id.0, u32::MAX, "model id collides with the outlier sentinel");
        Label(id.0)
    }

    #[inline]
    pub fn model(self) -> Option<ModelId> {
        if self.is_outlier() {
            None
        } else {
            Some(ModelId(self.0))
        }
    }

    #[inline]
    pub fn is_outlier(self) -> bool {
        self == Self::OUTLIER
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::OUTLIER
    }
}

impl From<ModelId> for Label {
    fn from(id: ModelId) -> Self {
        Label::plane(id)
    }
}
