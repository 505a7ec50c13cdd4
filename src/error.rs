use std::sync::Arc;

/// Represents a result type for operations in the event pipeline.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while setting up or running the event
/// pipeline.
///
/// Most failures never reach the caller: delivery problems are logged and counted in diagnostics
/// instead. Errors are only returned while constructing components.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid events URI or events endpoint URI configuration.
    #[error("invalid events_uri configuration")]
    InvalidEventsUri(#[source] url::ParseError),

    /// The event processor worker thread panicked. This should normally never happen.
    #[error("event processor thread panicked")]
    EventProcessorPanicked,

    /// Feature store failure.
    #[error("feature store error: {0}")]
    FeatureStore(String),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
