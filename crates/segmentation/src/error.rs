use thiserror::Error;

/// Errors reported before any extraction work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    /// A parameter is outside its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidConfiguration { name: &'static str, reason: String },

    /// The normals vector length does not match the point count.
    #[error("normals length ({normals_len}) does not match cloud length ({cloud_len})")]
    NormalsMismatch { normals_len: usize, cloud_len: usize },
}

impl ExtractError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ExtractError::InvalidConfiguration {
            name,
            reason: reason.into(),
        }
    }
}
