//! Camera session: permission/open, live stream lifecycle, stills and clips.
//!
//! A [`CaptureSession`] exclusively owns the one live [`MediaStream`]. The
//! stream is released on `stop`, after every capture, on device errors and
//! when the session is dropped.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::media::{Frame, MediaCapture, StillImage, VideoClip, PREFERRED_RECORDING_TYPES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn flipped(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Active,
    Recording,
    Photographed,
    Captured,
}

impl CaptureState {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Active => "active",
            CaptureState::Recording => "recording",
            CaptureState::Photographed => "photographed",
            CaptureState::Captured => "captured",
        }
    }
}

/// Cross-thread request to end a recording early.
///
/// The recorder finishes with whatever it has buffered.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Something that can open a camera stream.
pub trait CameraBackend: Send {
    /// Fails with `DeviceUnavailable` or `PermissionDenied`.
    fn open(&mut self, facing: FacingMode) -> Result<Box<dyn MediaStream>>;
}

/// A live camera stream.
pub trait MediaStream: Send {
    fn description(&self) -> String;

    fn read_frame(&mut self) -> Result<Frame>;

    /// Encode the current frame as JPEG.
    fn snapshot(&mut self) -> Result<StillImage>;

    fn supports(&self, mime_type: &str) -> bool;

    /// Record for `duration`, returning buffered chunks. Returns early with
    /// what was buffered once `stop` fires.
    fn record(
        &mut self,
        mime_type: &str,
        duration: Duration,
        stop: &StopHandle,
    ) -> Result<Vec<Vec<u8>>>;

    /// Release all tracks. Must be idempotent.
    fn release(&mut self);
}

/// Backend for builds without camera support.
#[derive(Debug, Default)]
pub struct NoCamera;

impl CameraBackend for NoCamera {
    fn open(&mut self, _facing: FacingMode) -> Result<Box<dyn MediaStream>> {
        Err(Error::DeviceUnavailable(
            "this build has no camera support (enable the `opencv` feature)".into(),
        ))
    }
}

pub struct CaptureSession {
    backend: Box<dyn CameraBackend>,
    stream: Option<Box<dyn MediaStream>>,
    state: CaptureState,
    facing: FacingMode,
    captured: Option<MediaCapture>,
    clip_duration: Duration,
    max_clip_bytes: u64,
    stop: StopHandle,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state)
            .field("facing", &self.facing)
            .field("has_stream", &self.stream.is_some())
            .field("captured", &self.captured.as_ref().map(MediaCapture::kind))
            .finish()
    }
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CameraBackend>, config: &CameraConfig) -> Self {
        Self {
            backend,
            stream: None,
            state: CaptureState::Idle,
            facing: FacingMode::User,
            captured: None,
            clip_duration: config.clip_duration(),
            max_clip_bytes: config.max_clip_bytes,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn set_facing(&mut self, facing: FacingMode) {
        self.facing = facing;
    }

    pub fn captured(&self) -> Option<&MediaCapture> {
        self.captured.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stream_description(&self) -> Option<String> {
        self.stream.as_ref().map(|s| s.description())
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Active => return Ok(()),
            CaptureState::Idle => {}
            other => return Err(invalid("start the camera", other)),
        }

        let stream = self.backend.open(self.facing)?;
        info!("Camera started ({:?}): {}", self.facing, stream.description());
        self.stream = Some(stream);
        self.state = CaptureState::Active;
        Ok(())
    }

    /// Release the stream. Captured media is kept.
    pub fn stop(&mut self) {
        self.stop.stop();
        self.release_stream();
        if self.state != CaptureState::Captured {
            self.state = CaptureState::Idle;
        }
    }

    pub fn preview(&mut self) -> Result<Frame> {
        if self.state != CaptureState::Active {
            return Err(invalid("read a preview frame", self.state));
        }
        self.active_stream()?.read_frame()
    }

    pub fn capture_still(&mut self) -> Result<&MediaCapture> {
        if self.state != CaptureState::Active {
            return Err(invalid("take a photo", self.state));
        }
        self.state = CaptureState::Photographed;

        let result = self.active_stream().and_then(|s| s.snapshot());
        match result {
            Ok(still) => {
                info!(
                    "Photo captured ({}x{}, {} bytes)",
                    still.width,
                    still.height,
                    still.jpeg.len()
                );
                self.finish_capture(MediaCapture::Still(still))
            }
            Err(e) => {
                warn!("Photo capture failed: {}", e);
                self.state = CaptureState::Active;
                Err(e)
            }
        }
    }

    /// Record a fixed-duration clip.
    ///
    /// Clips over the size ceiling are discarded with `PayloadTooLarge` and
    /// the camera stays active for another attempt.
    pub fn capture_clip(&mut self) -> Result<&MediaCapture> {
        if self.state != CaptureState::Active {
            return Err(invalid("record a clip", self.state));
        }

        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Err(invalid("record a clip", CaptureState::Idle)),
        };
        let mime_type = PREFERRED_RECORDING_TYPES
            .iter()
            .copied()
            .find(|m| stream.supports(m))
            .ok_or_else(|| {
                Error::DeviceUnavailable("camera supports no usable video format".into())
            })?;

        self.stop.reset();
        self.state = CaptureState::Recording;
        info!("Recording {:?} clip as {}", self.clip_duration, mime_type);

        let chunks = match stream.record(mime_type, self.clip_duration, &self.stop) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Recording failed: {}", e);
                self.release_stream();
                self.state = CaptureState::Idle;
                return Err(e);
            }
        };
        if self.stop.is_stopped() {
            info!("Recording stopped early, keeping {} buffered chunk(s)", chunks.len());
        }

        let clip = match VideoClip::assemble(chunks, mime_type) {
            Ok(clip) => clip,
            Err(e) => {
                self.state = CaptureState::Active;
                return Err(e);
            }
        };
        if clip.data.is_empty() {
            self.state = CaptureState::Active;
            return Err(Error::DeviceUnavailable("recorder produced no video data".into()));
        }
        if clip.size() > self.max_clip_bytes {
            warn!("Discarding {} byte clip (limit {})", clip.size(), self.max_clip_bytes);
            self.state = CaptureState::Active;
            return Err(Error::PayloadTooLarge {
                size: clip.size(),
                limit: self.max_clip_bytes,
            });
        }

        info!("Clip captured ({} bytes, {})", clip.size(), clip.mime_type);
        self.finish_capture(MediaCapture::Clip(clip))
    }

    /// Switch between front and back cameras. Ignored while recording.
    pub fn flip(&mut self) -> Result<()> {
        if self.state == CaptureState::Recording {
            debug!("Flip ignored while recording");
            return Ok(());
        }
        let restart = self.state == CaptureState::Active;
        if restart {
            self.release_stream();
            self.state = CaptureState::Idle;
        }
        self.facing = self.facing.flipped();
        info!("Camera facing mode is now {:?}", self.facing);
        if restart {
            self.start()?;
        }
        Ok(())
    }

    /// Drop the capture and start the camera again.
    pub fn retake(&mut self) -> Result<()> {
        self.discard_capture();
        self.start()
    }

    /// Forget the captured media without restarting the camera.
    pub fn discard_capture(&mut self) {
        if self.captured.take().is_some() {
            debug!("Captured media discarded");
        }
        self.release_stream();
        self.state = CaptureState::Idle;
    }

    /// Hand the captured media to the caller, leaving the session idle.
    pub fn take_capture(&mut self) -> Option<MediaCapture> {
        let media = self.captured.take();
        if media.is_some() {
            self.state = CaptureState::Idle;
        }
        media
    }

    fn finish_capture(&mut self, media: MediaCapture) -> Result<&MediaCapture> {
        self.release_stream();
        self.state = CaptureState::Captured;
        let media: &MediaCapture = self.captured.insert(media);
        Ok(media)
    }

    fn active_stream(&mut self) -> Result<&mut Box<dyn MediaStream>> {
        let state = self.state;
        self.stream.as_mut().ok_or_else(|| invalid("use the camera", state))
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!("Camera stream released");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release_stream();
    }
}

fn invalid(operation: &'static str, state: CaptureState) -> Error {
    Error::InvalidState {
        operation,
        state: state.as_str(),
    }
}
