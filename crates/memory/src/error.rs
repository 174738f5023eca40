use thiserror::Error;

/// Failures raised by a [`crate::DocumentStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("field `{path}` is not numeric")]
    NotNumeric { path: String },
}

impl StoreError {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Domain failures of the memory engine.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory {0} not found")]
    NotFound(String),

    /// The identity field path is outside the closed set of patchable fields.
    #[error("invalid identity path: {0}")]
    InvalidPath(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Promotion never lowers depth.
    #[error("memory {id} is at depth {current:.2}; refusing to demote to {requested:.2}")]
    Demotion { id: String, current: f64, requested: f64 },

    #[error("unknown objective: {0}")]
    UnknownObjective(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(err))
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
