//! HTTP plumbing shared by the recognition client and the profile manager.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn json<T: Serialize>(
        method: Method,
        path: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| Error::ValidationError(format!("cannot encode request: {}", e)))?;
        Ok(Self::new(method, path)
            .header("Content-Type", "application/json")
            .body(body))
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::TransportError(format!("unexpected response body: {}", e)))
    }

    /// The service's error text (`erro`, `message`, `mensagem` or `error`), or
    /// a short fallback.
    pub fn error_message(&self) -> String {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            for key in ["erro", "message", "mensagem", "error"] {
                if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                    return format!("{} - {}", self.status, text);
                }
            }
        }
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.is_empty() || text.len() > 200 {
            format!("HTTP {}", self.status)
        } else {
            format!("{} - {}", self.status, text)
        }
    }
}

/// Sends one request and returns whatever status came back. `Err` is only
/// for failures with no HTTP response (DNS, refused connection, timeout).
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, String>;
}

/// Blocking HTTP transport against the service base URL.
pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn read_response(response: ureq::Response) -> std::result::Result<ApiResponse, String> {
        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| format!("failed to read response: {}", e))?;
        Ok(ApiResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> std::result::Result<ApiResponse, String> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{} {}", request.method.as_str(), url);

        let mut call = self.agent.request(request.method.as_str(), &url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        let result = match &request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };

        match result {
            Ok(response) => Self::read_response(response),
            Err(ureq::Error::Status(_, response)) => Self::read_response(response),
            Err(ureq::Error::Transport(e)) => Err(e.to_string()),
        }
    }
}

/// Send through `transport`, mapping connection failures to `TransportError`.
pub(crate) fn dispatch(transport: &dyn Transport, request: ApiRequest) -> Result<ApiResponse> {
    let label = format!("{} {}", request.method.as_str(), request.path);
    let response = transport
        .send(request)
        .map_err(|e| Error::TransportError(format!("{}: {}", label, e)))?;
    debug!("{} -> {}", label, response.status);
    Ok(response)
}

/// A `multipart/form-data` body carrying one file field.
///
/// Returns the `Content-Type` header value and the encoded body.
pub fn multipart_file(
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> (String, Vec<u8>) {
    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let boundary = format!("----ecoface-{:x}-{:x}", stamp, data.len());

    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    (format!("multipart/form-data; boundary={}", boundary), body)
}
