/// Convenience result type used across mattecheck.
pub type MattecheckResult<T> = Result<T, MattecheckError>;

/// Top-level error taxonomy used by comparator APIs.
///
/// `Setup` aborts a run before any comparison happens. `Reference` means the
/// trusted reference data itself is broken, which is worth distinguishing from
/// a candidate-side `Mismatch`. `Tolerance` is a numeric failure and carries
/// the computed statistics in its message.
#[derive(thiserror::Error, Debug)]
pub enum MattecheckError {
    /// Missing scene/reference data, failed render invocation, or failed
    /// result-directory cleanup. Fatal before any assertion runs.
    #[error("setup error: {0}")]
    Setup(String),

    /// An image or sidecar file could not be read or decoded.
    #[error("load error: {0}")]
    Load(String),

    /// Reference-side data is invalid (e.g. the known-good manifest does not
    /// parse). Reference data is assumed fixed, so this is not a regression.
    #[error("reference error: {0}")]
    Reference(String),

    /// Structural difference between result and reference: file sets,
    /// metadata keys, manifest names, channels, or compression.
    #[error("mismatch: {0}")]
    Mismatch(String),

    /// Numeric difference outside tolerance.
    #[error("tolerance exceeded: {0}")]
    Tolerance(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MattecheckError {
    /// Build a [`MattecheckError::Setup`] value.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Build a [`MattecheckError::Load`] value.
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Build a [`MattecheckError::Reference`] value.
    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }

    /// Build a [`MattecheckError::Mismatch`] value.
    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self::Mismatch(msg.into())
    }

    /// Build a [`MattecheckError::Tolerance`] value.
    pub fn tolerance(msg: impl Into<String>) -> Self {
        Self::Tolerance(msg.into())
    }
}
