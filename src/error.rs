//! Error types for stalecache

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed failure payload produced by loaders, persisters and fetchers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single load.
///
/// Cloneable so that one failure can be handed to every caller coalesced on
/// the same in-flight load.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// The loader returned an error
    #[error("loader failed: {0}")]
    Failed(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The loader completed without producing a value
    #[error("loader returned no value")]
    Null,
}

impl LoadError {
    /// Wrap any loader failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        LoadError::Failed(Arc::from(err.into()))
    }

    /// Returns true if this is the null-value contract violation.
    pub fn is_null(&self) -> bool {
        matches!(self, LoadError::Null)
    }
}

/// Errors that can occur in the cache and store layers
#[derive(Error, Debug)]
pub enum Error {
    /// A load failed (shared by every coalesced caller)
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Invalid or unrecognized configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persister read/write failure
    #[error("Persister error: {0}")]
    Persister(String),

    /// Network fetch failure
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Nothing cached and the policy forbids a network fetch
    #[error("No cached value for key {key} and policy forbids fetching")]
    NotCached { key: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse error
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the load failure if this error came from a loader.
    pub fn as_load_error(&self) -> Option<&LoadError> {
        match self {
            Error::Load(e) => Some(e),
            _ => None,
        }
    }

    /// Recover one of our own errors that crossed a coalesced load.
    ///
    /// A shared load hands the same boxed failure to every waiter. When that
    /// failure is an `Error` with a cloneable payload it is surfaced as
    /// itself, otherwise it stays wrapped in `Error::Load`.
    pub fn from_load(err: LoadError) -> Self {
        if let LoadError::Failed(source) = &err {
            match source.downcast_ref::<Error>() {
                Some(Error::NotCached { key }) => return Error::NotCached { key: key.clone() },
                Some(Error::Fetch(msg)) => return Error::Fetch(msg.clone()),
                Some(Error::Persister(msg)) => return Error::Persister(msg.clone()),
                Some(Error::Configuration(msg)) => return Error::Configuration(msg.clone()),
                Some(Error::Load(inner)) => return Error::from_load(inner.clone()),
                Some(Error::Io(_) | Error::Yaml(_)) | None => {}
            }
        }
        Error::Load(err)
    }
}
