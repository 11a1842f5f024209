//! Verify and register against the recognition service.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EcofaceConfig;
use crate::error::{Error, Result};
use crate::media::{MediaCapture, StillImage, VideoClip};
use crate::models::{AccessLevel, Identity};
use crate::transport::{dispatch, multipart_file, ApiRequest, HttpTransport, Method, Transport};

#[derive(Serialize)]
struct VerifyStill {
    imagem_base64: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    nome: &'a str,
    nivel: AccessLevel,
    imagem_base64: String,
}

#[derive(Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    mensagem: Option<String>,
    usuario: Identity,
}

#[derive(Clone)]
pub struct RecognitionClient {
    transport: Arc<dyn Transport>,
}

impl RecognitionClient {
    pub fn new(config: &EcofaceConfig) -> Self {
        let transport = HttpTransport::new(&config.server.base_url, config.request_timeout());
        Self::with_transport(Arc::new(transport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The transport, for handing to a [`ProfileManager`](crate::profile::ProfileManager).
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Submit a capture for recognition.
    ///
    /// `NotRecognized` on 404; any other failure is a `TransportError`.
    pub fn verify(&self, media: &MediaCapture) -> Result<Identity> {
        let request = match media {
            MediaCapture::Still(still) => ApiRequest::json(
                Method::Post,
                "/verify",
                &VerifyStill {
                    imagem_base64: still.to_base64(),
                },
            )?,
            MediaCapture::Clip(clip) => verify_clip_request(clip)?,
        };

        info!("Verifying {} capture", media.kind());
        let response = dispatch(self.transport.as_ref(), request)?;
        match response.status {
            200..=299 => {
                let identity: Identity = response.json()?;
                info!("Recognized {} ({})", identity.name, identity.access_level);
                Ok(identity)
            }
            404 => {
                info!("Face not recognized");
                Err(Error::NotRecognized)
            }
            _ => {
                warn!("Verification failed: {}", response.error_message());
                Err(Error::TransportError(response.error_message()))
            }
        }
    }

    /// Register a new person. Input is validated before anything is sent.
    pub fn register(&self, name: &str, access_level: i64, image: &StillImage) -> Result<Identity> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ValidationError("name must not be empty".into()));
        }
        let level = u8::try_from(access_level)
            .map_err(|_| format!("access level must be 1, 2 or 3 (got {})", access_level))
            .and_then(AccessLevel::try_from)
            .map_err(Error::ValidationError)?;

        let request = ApiRequest::json(
            Method::Post,
            "/register",
            &RegisterRequest {
                nome: name,
                nivel: level,
                imagem_base64: image.to_base64(),
            },
        )?;

        info!("Registering {} at {}", name, level);
        let response = dispatch(self.transport.as_ref(), request)?;
        match response.status {
            200..=299 => {
                let body: RegisterResponse = response.json()?;
                if let Some(message) = &body.mensagem {
                    info!("Service: {}", message);
                }
                Ok(body.usuario)
            }
            400 | 422 => Err(Error::ValidationError(response.error_message())),
            _ => Err(Error::TransportError(response.error_message())),
        }
    }
}

fn verify_clip_request(clip: &VideoClip) -> Result<ApiRequest> {
    let format = clip
        .format()
        .ok_or_else(|| {
            Error::ValidationError(format!("unsupported video type {}", clip.mime_type))
        })?;
    let filename = format!("capture.{}", format.extension());
    let (content_type, body) = multipart_file("video", &filename, format.mime(), &clip.data);
    Ok(ApiRequest::new(Method::Post, "/verify")
        .header("Content-Type", &content_type)
        .header("X-Video-Format", format.mime())
        .body(body))
}
