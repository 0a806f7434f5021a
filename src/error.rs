use thiserror::Error;

/// Errors reported by the crowd engine. All of these are detected
/// synchronously at the call that caused them and leave existing state
/// untouched.
#[derive(Error, Debug)]
pub enum CrowdError {
    /// A caller-supplied argument is unusable (e.g. a transform slice whose
    /// length does not match the instance count).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An index is outside its valid range.
    #[error("{what} index {index} out of range (len {len})")]
    OutOfRange { what: &'static str, index: usize, len: usize },

    /// An operation that requires at least one element was given none.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// The engine or a GPU resource was used after `release`.
    #[error("resource released: {0}")]
    ResourceState(&'static str),

    /// A baked animation asset failed to load or validate.
    #[error("asset error: {0}")]
    Asset(String),
}

pub type Result<T> = std::result::Result<T, CrowdError>;

impl CrowdError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }
}
