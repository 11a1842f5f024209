//! Captured media and the encodings used at the service boundary.

use base64::{engine::general_purpose, Engine as _};

use crate::error::{Error, Result};


/// Recording formats in order of preference.
pub const PREFERRED_RECORDING_TYPES: [&str; 4] = [
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    "video/mp4",
];

/// The two containers the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    Webm,
    Mp4,
}

impl VideoFormat {
    /// Parse a MIME type, ignoring any `;codecs=...` parameters.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match bare_mime(mime).as_str() {
            "video/webm" => Some(VideoFormat::Webm),
            "video/mp4" => Some(VideoFormat::Mp4),
            _ => None,
        }
    }

    /// The bare MIME type sent on the wire.
    pub fn mime(self) -> &'static str {
        match self {
            VideoFormat::Webm => "video/webm",
            VideoFormat::Mp4 => "video/mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            VideoFormat::Webm => "webm",
            VideoFormat::Mp4 => "mp4",
        }
    }
}

/// Strip MIME parameters and normalise case: `video/WebM; codecs=vp9` -> `video/webm`.
pub fn bare_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// A JPEG-encoded still.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl StillImage {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self { jpeg, width, height }
    }

    /// Base64 payload without a data-URI prefix, as the service expects.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.jpeg)
    }
}

/// A recorded clip and the MIME type the recorder declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl VideoClip {
    /// Join recorder chunks into one clip.
    pub fn assemble(chunks: Vec<Vec<u8>>, mime_type: &str) -> Result<Self> {
        if VideoFormat::from_mime(mime_type).is_none() {
            return Err(Error::ValidationError(format!(
                "unsupported video type {}",
                mime_type
            )));
        }
        let total = chunks.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(&chunk);
        }
        Ok(Self {
            data,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn format(&self) -> Option<VideoFormat> {
        VideoFormat::from_mime(&self.mime_type)
    }
}

/// What a capture session produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCapture {
    Still(StillImage),
    Clip(VideoClip),
}

impl MediaCapture {
    pub fn kind(&self) -> &'static str {
        match self {
            MediaCapture::Still(_) => "photo",
            MediaCapture::Clip(_) => "video",
        }
    }
}

/// A raw RGB preview frame from a live stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub rgb_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Mean luma on a 0-255 scale.
    pub fn mean_brightness(&self) -> f64 {
        let pixels = self.rgb_data.chunks_exact(3);
        let count = pixels.len();
        if count == 0 {
            return 0.0;
        }
        let total: f64 = pixels
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .sum();
        total / count as f64
    }
}

/// Remove any `data:...;base64,` header.
pub fn strip_data_uri(value: &str) -> &str {
    if value.starts_with("data:") {
        match value.find(',') {
            Some(idx) => &value[idx + 1..],
            None => value,
        }
    } else {
        value
    }
}

/// Decode a still from base64 or a data URI.
pub fn decode_still(value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(strip_data_uri(value).trim())
        .map_err(|e| Error::ValidationError(format!("invalid base64 image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_suffix_is_dropped() {
        assert_eq!(bare_mime("video/webm;codecs=vp9"), "video/webm");
        assert_eq!(bare_mime("Video/MP4; codecs=\"avc1\""), "video/mp4");
        assert_eq!(VideoFormat::from_mime("video/webm;codecs=vp8"), Some(VideoFormat::Webm));
        assert_eq!(VideoFormat::from_mime("video/ogg"), None);
    }

    #[test]
    fn data_uri_round_trip_at_boundary() {
        let still = StillImage::new(vec![0xff, 0xd8, 0xff], 1, 1);
        let uri = format!("data:image/jpeg;base64,{}", still.to_base64());
        assert_eq!(strip_data_uri(&uri), still.to_base64());
        assert_eq!(decode_still(&uri).unwrap(), still.jpeg);
        assert_eq!(decode_still(&still.to_base64()).unwrap(), still.jpeg);
    }

    #[test]
    fn plain_base64_is_left_alone() {
        assert_eq!(strip_data_uri("abcd"), "abcd");
    }

    #[test]
    fn assemble_joins_chunks_in_order() {
        let clip = VideoClip::assemble(vec![vec![1, 2], vec![], vec![3]], "video/mp4").unwrap();
        assert_eq!(clip.data, vec![1, 2, 3]);
        assert_eq!(clip.size(), 3);
        assert_eq!(clip.format(), Some(VideoFormat::Mp4));
    }

    #[test]
    fn assemble_rejects_unknown_container() {
        assert!(VideoClip::assemble(vec![vec![1]], "video/quicktime").is_err());
    }

    #[test]
    fn brightness_of_white_and_black() {
        let white = Frame { rgb_data: vec![255; 12], width: 2, height: 2 };
        let black = Frame { rgb_data: vec![0; 12], width: 2, height: 2 };
        assert!((white.mean_brightness() - 255.0).abs() < 0.01);
        assert_eq!(black.mean_brightness(), 0.0);
    }
}
