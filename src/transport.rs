//! Fetching CRLs and chain files over an authenticated channel.

use std::{fs, path::Path, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{config::SourceConfig, error::ErrorKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("cannot load pinned root {path}: {message}")]
    PinnedRoot { path: String, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("transport failure: {0}")]
    Request(String),
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

/// Where to fetch from and which root certificate the server must chain to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSource {
    pub url: String,
    /// PEM or DER encoded root certificate, the only trust anchor for the TLS session
    pub pinned_root: Vec<u8>,
    pub timeout: Duration,
}

impl FetchSource {
    pub fn from_config(config: &SourceConfig, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            url: config.url.clone(),
            pinned_root: read_pinned_root(&config.pinned_root_path)?,
            timeout,
        })
    }
}

fn read_pinned_root(path: &Path) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|e| TransportError::PinnedRoot {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Response of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub body: Bytes,
    /// Server-suggested filename, from `Content-Disposition`
    pub filename: Option<String>,
}

/// Blocking fetch of one blob. Implementations never retry.
pub trait Transport: Send + Sync {
    fn fetch(&self, source: &FetchSource) -> Result<Fetched, TransportError>;
}

/// Extracts `filename` from a `Content-Disposition` header value
pub(crate) fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_owned())
        .filter(|name| !name.is_empty())
}

/// HTTPS GET that accepts only servers chaining to the pinned root
#[cfg(feature = "fetch")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpsTransport;

#[cfg(feature = "fetch")]
impl HttpsTransport {
    fn client(source: &FetchSource) -> Result<reqwest::blocking::Client, TransportError> {
        let root = if source.pinned_root.starts_with(b"-----BEGIN") {
            reqwest::Certificate::from_pem(&source.pinned_root)
        } else {
            reqwest::Certificate::from_der(&source.pinned_root)
        }
        .map_err(|e| TransportError::PinnedRoot {
            path: source.url.clone(),
            message: e.to_string(),
        })?;
        reqwest::blocking::Client::builder()
            .tls_built_in_root_certs(false)
            .add_root_certificate(root)
            .https_only(true)
            .timeout(source.timeout)
            .build()
            .map_err(TransportError::from)
    }
}

#[cfg(feature = "fetch")]
impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(value.to_string())
        }
    }
}

#[cfg(feature = "fetch")]
impl Transport for HttpsTransport {
    fn fetch(&self, source: &FetchSource) -> Result<Fetched, TransportError> {
        let response = Self::client(source)?.get(&source.url).send().map_err(|e| {
            tracing::warn!(url = %source.url, error = %e, "fetch failed");
            TransportError::from(e)
        })?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %source.url, %status, "fetch rejected");
            return Err(TransportError::Status(status.as_u16()));
        }
        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename);
        let body = response.bytes()?;
        tracing::debug!(url = %source.url, length = body.len(), ?filename, "fetched");
        Ok(Fetched { body, filename })
    }
}
