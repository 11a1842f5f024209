//! Camera capture, face verification and toxin record management for Ecoface.
//!
//! The workflow: a [`CaptureSession`] produces a [`MediaCapture`]; a clip
//! is turned into a preview still by the [`FrameExtractor`]; the
//! [`RecognitionClient`] verifies or registers the face; the resulting
//! [`Identity`] is handed to a [`ProfileManager`] for record CRUD.

pub mod camera;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod media;
pub mod models;
pub mod profile;
pub mod transport;

#[cfg(feature = "opencv")]
pub mod opencv_backend;

pub use camera::{
    CameraBackend, CaptureSession, CaptureState, FacingMode, MediaStream, NoCamera, StopHandle,
};
pub use client::RecognitionClient;
pub use config::EcofaceConfig;
pub use error::{Error, Result};
pub use frame::{ClipPlayer, FrameExtractor, PlayerEvent};
pub use media::{MediaCapture, StillImage, VideoClip, VideoFormat};
pub use models::{AccessLevel, DangerSummary, DangerTier, Identity, Record, RecordFields};
pub use profile::ProfileManager;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};

/// Whether this build can open a camera and decode clips.
///
/// Without the `opencv` feature every capture fails with `DeviceUnavailable`.
pub const CAMERA_SUPPORT: bool = cfg!(feature = "opencv");

/// The camera backend this build was compiled with.
pub fn default_camera_backend(config: &config::CameraConfig) -> Box<dyn CameraBackend> {
    #[cfg(feature = "opencv")]
    {
        Box::new(opencv_backend::OpenCvCamera::new(config.clone()))
    }
    #[cfg(not(feature = "opencv"))]
    {
        let _ = config;
        Box::new(NoCamera)
    }
}

/// The off-screen clip player this build was compiled with, if any.
pub fn default_clip_player(config: &config::CameraConfig) -> Option<Box<dyn ClipPlayer>> {
    #[cfg(feature = "opencv")]
    {
        Some(Box::new(opencv_backend::OpenCvClipPlayer::new(config.jpeg_quality)))
    }
    #[cfg(not(feature = "opencv"))]
    {
        let _ = config;
        None
    }
}
