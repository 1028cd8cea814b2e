use thiserror::Error;

/// Failures surfaced by the session adapter.
///
/// The vision branch recovers `MalformedAttachment` and provider failures
/// locally into reply text; only `NotInitialized` and text-path provider
/// failures reach the caller as faults.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No usable model handle exists for the requested path.
    #[error("Gemini API is not initialized. Please set a valid API key.")]
    NotInitialized,

    /// The attachment payload carried no recognizable base64 image data.
    #[error("Failed to extract image data: {0}")]
    MalformedAttachment(String),

    /// The underlying network or model call failed.
    #[error(transparent)]
    ProviderCall(#[from] anyhow::Error),
}
