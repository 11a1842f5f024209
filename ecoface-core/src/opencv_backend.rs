//! V4L2 camera, recorder and off-screen clip player built on OpenCV.

use opencv::{
    core::{Mat, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::camera::{CameraBackend, FacingMode, MediaStream, StopHandle};
use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::frame::{ClipPlayer, PlayerEvent};
use crate::media::{Frame, StillImage, VideoClip, VideoFormat};

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub device_id: i32,
    pub device_path: String,
    pub name: String,
}

pub struct OpenCvCamera {
    config: CameraConfig,
}

impl OpenCvCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl CameraBackend for OpenCvCamera {
    fn open(&mut self, facing: FacingMode) -> Result<Box<dyn MediaStream>> {
        let cameras = detect_cameras();
        if cameras.is_empty() {
            return Err(Error::DeviceUnavailable("no video capture devices found".into()));
        }

        let wanted = match facing {
            FacingMode::User => self.config.user_device,
            FacingMode::Environment => self.config.environment_device,
        };
        // Requested device first, then whatever else is attached.
        let mut ordered: Vec<&CameraInfo> =
            cameras.iter().filter(|c| c.device_id == wanted).collect();
        ordered.extend(cameras.iter().filter(|c| c.device_id != wanted));

        let mut last_error = Error::DeviceUnavailable("no working camera".into());
        for camera in ordered {
            info!("Trying camera video{} ({})", camera.device_id, camera.name);
            match open_stream(camera, &self.config) {
                Ok(stream) => return Ok(Box::new(stream)),
                Err(e @ Error::PermissionDenied(_)) => return Err(e),
                Err(e) => {
                    warn!("Camera video{} unusable: {}", camera.device_id, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

fn open_stream(camera: &CameraInfo, config: &CameraConfig) -> Result<OpenCvStream> {
    if let Err(e) = fs::File::open(&camera.device_path) {
        if e.kind() == ErrorKind::PermissionDenied {
            return Err(Error::PermissionDenied(format!("{}: {}", camera.device_path, e)));
        }
    }

    let mut capture = VideoCapture::new(camera.device_id, videoio::CAP_V4L2).map_err(device_err)?;
    if !capture.is_opened().unwrap_or(false) {
        return Err(Error::DeviceUnavailable(format!("{} failed to open", camera.device_path)));
    }

    let mut test_frame = Mat::default();
    if !capture.read(&mut test_frame).unwrap_or(false) || test_frame.empty() {
        let _ = capture.release();
        return Err(Error::DeviceUnavailable(format!("{} cannot read frames", camera.device_path)));
    }

    capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.frame_width as f64).ok();
    capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.frame_height as f64).ok();
    capture.set(videoio::CAP_PROP_FPS, config.fps).ok();

    Ok(OpenCvStream {
        capture,
        info: camera.clone(),
        fps: config.fps,
        jpeg_quality: config.jpeg_quality,
        writer_support: RefCell::new(HashMap::new()),
        released: false,
    })
}

pub struct OpenCvStream {
    capture: VideoCapture,
    info: CameraInfo,
    fps: f64,
    jpeg_quality: i32,
    writer_support: RefCell<HashMap<String, bool>>,
    released: bool,
}

impl OpenCvStream {
    fn read_mat(&mut self) -> Result<Mat> {
        let mut mat = Mat::default();
        self.capture.read(&mut mat).map_err(device_err)?;
        if mat.empty() {
            return Err(Error::DeviceUnavailable("empty frame captured".into()));
        }
        Ok(mat)
    }

    fn try_open_writer(&self, mime_type: &str) -> bool {
        let Some(format) = VideoFormat::from_mime(mime_type) else {
            return false;
        };
        let Ok(code) = fourcc_for(mime_type) else {
            return false;
        };
        let scratch = TempFile::new("writer-check", format.extension());
        let supported = scratch
            .path()
            .to_str()
            .and_then(|p| VideoWriter::new(p, code, self.fps, Size::new(64, 48), true).ok())
            .map(|mut w| {
                let opened = w.is_opened().unwrap_or(false);
                let _ = w.release();
                opened
            })
            .unwrap_or(false);
        debug!("Recorder support for {}: {}", mime_type, supported);
        supported
    }
}

impl MediaStream for OpenCvStream {
    fn description(&self) -> String {
        format!("{} ({})", self.info.name, self.info.device_path)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mat = self.read_mat()?;
        let mut rgb = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(device_err)?;
        let data = rgb.data_bytes().map_err(device_err)?.to_vec();
        Ok(Frame {
            rgb_data: data,
            width: rgb.cols() as u32,
            height: rgb.rows() as u32,
        })
    }

    fn snapshot(&mut self) -> Result<StillImage> {
        let mat = self.read_mat()?;
        encode_jpeg(&mat, self.jpeg_quality)
    }

    fn supports(&self, mime_type: &str) -> bool {
        let cached = self.writer_support.borrow().get(mime_type).copied();
        if let Some(known) = cached {
            return known;
        }
        let supported = self.try_open_writer(mime_type);
        self.writer_support
            .borrow_mut()
            .insert(mime_type.to_string(), supported);
        supported
    }

    fn record(
        &mut self,
        mime_type: &str,
        duration: Duration,
        stop: &StopHandle,
    ) -> Result<Vec<Vec<u8>>> {
        let format = VideoFormat::from_mime(mime_type)
            .ok_or_else(|| Error::DeviceUnavailable(format!("cannot record {}", mime_type)))?;
        let first = self.read_mat()?;
        let size = Size::new(first.cols(), first.rows());
        let clip_file = TempFile::new("clip", format.extension());
        let path_str = clip_file
            .path()
            .to_str()
            .ok_or_else(|| Error::DeviceUnavailable("temporary path is not UTF-8".into()))?;

        let fourcc = fourcc_for(mime_type)?;
        let mut writer =
            VideoWriter::new(path_str, fourcc, self.fps, size, true).map_err(device_err)?;
        if !writer.is_opened().unwrap_or(false) {
            self.writer_support
                .borrow_mut()
                .insert(mime_type.to_string(), false);
            return Err(Error::DeviceUnavailable(format!("no encoder for {}", mime_type)));
        }

        let started = Instant::now();
        let mut frames = 0u32;
        writer.write(&first).map_err(device_err)?;
        while started.elapsed() < duration && !stop.is_stopped() {
            match self.read_mat() {
                Ok(mat) => {
                    writer.write(&mat).map_err(device_err)?;
                    frames += 1;
                }
                Err(e) => {
                    warn!("Frame dropped while recording: {}", e);
                    break;
                }
            }
        }
        writer.release().map_err(device_err)?;
        debug!("Recorded {} frame(s) in {:?}", frames + 1, started.elapsed());

        let bytes = clip_file
            .read()
            .map_err(|e| Error::DeviceUnavailable(format!("reading clip: {}", e)))?;
        Ok(bytes.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.capture.release();
        }
    }
}

impl Drop for OpenCvStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Plays a clip from a temporary file to pull out its last frame.
pub struct OpenCvClipPlayer {
    jpeg_quality: i32,
    capture: Option<VideoCapture>,
    file: Option<TempFile>,
    events: Option<async_channel::Sender<PlayerEvent>>,
    duration: Option<f64>,
    last_frame: Option<Mat>,
}

impl OpenCvClipPlayer {
    pub fn new(jpeg_quality: i32) -> Self {
        Self {
            jpeg_quality,
            capture: None,
            file: None,
            events: None,
            duration: None,
            last_frame: None,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Decode to the end, keeping the final frame.
    fn scan_to_end(&mut self) -> bool {
        let Some(capture) = self.capture.as_mut() else {
            return false;
        };
        let mut last = None;
        let mut frame = Mat::default();
        while capture.read(&mut frame).unwrap_or(false) && !frame.empty() {
            last = Some(frame);
            frame = Mat::default();
        }
        self.last_frame = last;
        self.last_frame.is_some()
    }
}

impl ClipPlayer for OpenCvClipPlayer {
    fn open(&mut self, clip: &VideoClip, events: async_channel::Sender<PlayerEvent>) -> Result<()> {
        let format = clip
            .format()
            .ok_or_else(|| {
                Error::FrameExtractionFailed(format!("unsupported clip type {}", clip.mime_type))
            })?;
        self.close();
        let file = self.file.insert(TempFile::new("extract", format.extension()));
        fs::write(file.path(), &clip.data)
            .map_err(|e| Error::FrameExtractionFailed(e.to_string()))?;
        self.events = Some(events);

        let capture = file
            .path()
            .to_str()
            .and_then(|p| VideoCapture::from_file(p, videoio::CAP_ANY).ok())
            .filter(|c| c.is_opened().unwrap_or(false));
        let Some(capture) = capture else {
            self.emit(PlayerEvent::Error("clip could not be decoded".into()));
            return Ok(());
        };

        let frames = capture.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        self.duration = (frames > 0.0 && fps > 0.0).then(|| frames / fps);
        self.capture = Some(capture);

        self.emit(PlayerEvent::LoadedMetadata { duration: self.duration });
        self.emit(PlayerEvent::LoadedData);
        self.emit(PlayerEvent::CanPlay);
        Ok(())
    }

    fn seek(&mut self, seconds: f64) {
        let past_end = self.duration.map_or(true, |d| seconds >= d);
        let seeked = if past_end {
            self.scan_to_end()
        } else {
            self.capture
                .as_mut()
                .and_then(|c| c.set(videoio::CAP_PROP_POS_MSEC, seconds * 1000.0).ok())
                .unwrap_or(false)
        };
        if seeked {
            self.emit(PlayerEvent::Seeked);
        } else {
            debug!("Seek to {} did not complete", seconds);
        }
    }

    fn render_frame(&mut self) -> Result<StillImage> {
        if let Some(frame) = &self.last_frame {
            return encode_jpeg(frame, self.jpeg_quality);
        }
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| Error::FrameExtractionFailed("clip not loaded".into()))?;
        let mut frame = Mat::default();
        if !capture.read(&mut frame).unwrap_or(false) || frame.empty() {
            return Err(Error::FrameExtractionFailed("no frame at current position".into()));
        }
        encode_jpeg(&frame, self.jpeg_quality)
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
        }
        self.file = None;
        self.events = None;
        self.last_frame = None;
    }
}

impl Drop for OpenCvClipPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn detect_cameras() -> Vec<CameraInfo> {
    let mut cameras = Vec::new();
    let video_dir = Path::new("/sys/class/video4linux");

    if let Ok(entries) = fs::read_dir(video_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let parsed = name.strip_prefix("video").and_then(|s| s.parse::<i32>().ok());
            let Some(device_id) = parsed else {
                continue;
            };

            if !is_capture_node(device_id) {
                continue;
            }

            let camera_name = fs::read_to_string(entry.path().join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("Camera {}", device_id));
            cameras.push(CameraInfo {
                device_id,
                device_path: format!("/dev/video{}", device_id),
                name: camera_name,
            });
        }
    }

    cameras.sort_by_key(|c| c.device_id);
    info!("Detected {} camera(s)", cameras.len());
    for cam in &cameras {
        debug!("  video{}: {}", cam.device_id, cam.name);
    }
    cameras
}

/// Metadata nodes of integrated cameras have a non-zero index.
fn is_capture_node(device_id: i32) -> bool {
    let index_path = format!("/sys/class/video4linux/video{}/index", device_id);
    match fs::read_to_string(&index_path) {
        Ok(index) => index.trim().parse::<i32>().map_or(true, |i| i == 0),
        Err(_) => true,
    }
}

fn fourcc_for(mime_type: &str) -> Result<i32> {
    let lower = mime_type.to_ascii_lowercase();
    let code = if lower.starts_with("video/webm") {
        if lower.contains("vp9") {
            ('V', 'P', '9', '0')
        } else {
            ('V', 'P', '8', '0')
        }
    } else {
        ('m', 'p', '4', 'v')
    };
    VideoWriter::fourcc(code.0, code.1, code.2, code.3).map_err(device_err)
}

fn encode_jpeg(mat: &Mat, quality: i32) -> Result<StillImage> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let ok = imgcodecs::imencode(".jpg", mat, &mut buf, &params)
        .map_err(|e| Error::FrameExtractionFailed(format!("JPEG encoding failed: {}", e)))?;
    if !ok {
        return Err(Error::FrameExtractionFailed("JPEG encoding failed".into()));
    }
    Ok(StillImage::new(buf.to_vec(), mat.cols() as u32, mat.rows() as u32))
}

/// A file under the temp dir, removed when dropped.
struct TempFile(PathBuf);

impl TempFile {
    fn new(kind: &str, extension: &str) -> Self {
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let name = format!("ecoface-{}-{}-{}.{}", kind, std::process::id(), stamp, extension);
        Self(std::env::temp_dir().join(name))
    }

    fn path(&self) -> &Path {
        &self.0
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        fs::read(&self.0)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove {:?}: {}", self.0, e);
            }
        }
    }
}

fn device_err(e: opencv::Error) -> Error {
    Error::DeviceUnavailable(e.to_string())
}
