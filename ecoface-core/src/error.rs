use thiserror::Error;

/// Every failure the capture-and-handoff workflow can surface.
///
/// None of these are fatal: the front-end reports them and the user
/// re-triggers the action (retake, resubmit).
#[derive(Debug, Error)]
pub enum Error {
    #[error("no camera available: {0}")]
    DeviceUnavailable(String),

    #[error("camera access denied: {0}")]
    PermissionDenied(String),

    #[error("clip is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("could not extract a frame from the clip: {0}")]
    FrameExtractionFailed(String),

    #[error("face not recognized")]
    NotRecognized,

    #[error("invalid input: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    RecordNotFound(String),

    #[error("request failed: {0}")]
    TransportError(String),

    #[error("access level 3 is required to manage records")]
    AccessDenied,

    #[error("no signed-in identity")]
    MissingIdentity,

    #[error("cannot {operation} while camera is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that leave the user on the capture screen with the
    /// capture discarded.
    pub fn discards_capture(&self) -> bool {
        matches!(self, Error::NotRecognized | Error::PayloadTooLarge { .. })
    }
}
