use thiserror::Error;

/// Errors raised by [`DesignStore`](crate::DesignStore) mutations and the
/// handler/transform registries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Component id already exists: {0}")]
    DuplicateId(String),
    #[error("Component not found: {0}")]
    NotFound(String),
    #[error("Unknown event handler: {0}")]
    UnknownHandler(String),
    #[error("Unknown data transform: {0}")]
    UnknownTransform(String),
    #[error("Invalid design document: {0}")]
    InvalidDocument(String),
}
