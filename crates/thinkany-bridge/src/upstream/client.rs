//! Streaming HTTP client for the backend
//!
//! Sends the composed payload with a rotated cookie and turns the chunked
//! response body into a stream of text lines.

use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER};
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{BridgeError, Result};
use crate::proxy::ProxyError;

use super::credentials::Credential;
use super::payload::UpstreamPayload;

/// Path of the backend's streaming completion endpoint
const COMPLETIONS_PATH: &str = "/api/chat/completions";

/// Longest upstream error body kept for diagnostics
const MAX_ERROR_BODY: usize = 2048;

/// Longest event line accepted; longer lines are dropped whole
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Lines of the upstream event stream, in arrival order
pub type LineStream = Pin<Box<dyn Stream<Item = std::result::Result<String, ProxyError>> + Send>>;

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: Url,
    origin: String,
    referer: String,
    accept_language: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| BridgeError::Config(format!("Invalid upstream base_url: {e}")))?;
        let endpoint = base
            .join(COMPLETIONS_PATH)
            .map_err(|e| BridgeError::Config(format!("Invalid upstream endpoint: {e}")))?;

        let origin = base.origin().ascii_serialization();
        let referer = format!("{origin}/{}", config.locale);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            origin,
            referer,
            accept_language: config.accept_language.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn headers(&self, credential: &Credential) -> std::result::Result<HeaderMap, ProxyError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let value = |name: &str, v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| ProxyError::Request(format!("Invalid {name} header: {e}")))
        };
        headers.insert(ACCEPT_LANGUAGE, value("Accept-Language", &self.accept_language)?);
        headers.insert(COOKIE, value("Cookie", credential.expose())?);
        headers.insert(ORIGIN, value("Origin", &self.origin)?);
        headers.insert(REFERER, value("Referer", &self.referer)?);
        Ok(headers)
    }

    /// Open the backend stream; non-2xx statuses become [`ProxyError::Upstream`]
    pub async fn open(
        &self,
        payload: &UpstreamPayload,
        credential: &Credential,
    ) -> std::result::Result<LineStream, ProxyError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers(credential)?)
            .json(payload)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        tracing::info!("Upstream returned status {status}");

        if !status.is_success() {
            let body = read_capped(response.bytes_stream(), MAX_ERROR_BODY).await;
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(split_lines(response.bytes_stream())))
    }
}

fn network_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProxyError::Network(format!("Failed to connect to upstream: {e}"))
    } else {
        ProxyError::Network(format!("Request failed: {e}"))
    }
}

/// Read at most `limit` bytes of a body as text
///
/// Stops pulling chunks once the limit is reached. A read error ends the body
/// early; a multibyte character cut at the limit is dropped.
pub async fn read_capped<S, E>(bytes: S, limit: usize) -> String
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    let mut bytes = Box::pin(bytes);
    let mut body = Vec::new();

    while body.len() < limit {
        match bytes.next().await {
            Some(Ok(chunk)) => {
                let room = limit - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            _ => break,
        }
    }

    if let Err(e) = std::str::from_utf8(&body) {
        if e.error_len().is_none() {
            body.truncate(e.valid_up_to());
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Split a chunked byte stream into lines
///
/// Line endings (`\n` or `\r\n`) are stripped, invalid UTF-8 is replaced, and
/// a trailing line without a newline is still yielded. A read error is yielded
/// once and ends the stream. Lines longer than [`MAX_LINE_BYTES`] are dropped.
pub fn split_lines<S, E>(bytes: S) -> impl Stream<Item = std::result::Result<String, ProxyError>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    split_lines_capped(bytes, MAX_LINE_BYTES)
}

/// [`split_lines`] with an explicit line cap
pub fn split_lines_capped<S, E>(
    bytes: S,
    max_line: usize,
) -> impl Stream<Item = std::result::Result<String, ProxyError>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer = BytesMut::new();
        // Bytes of `buffer` already known to hold no newline
        let mut scanned = 0;
        // Inside an oversized line, skipping to its newline
        let mut discarding = false;

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(offset) = buffer[scanned..].iter().position(|&b| b == b'\n') {
                        let raw = buffer.split_to(scanned + offset + 1);
                        scanned = 0;
                        if std::mem::take(&mut discarding) {
                            continue;
                        }
                        if raw.len() > max_line {
                            tracing::warn!("Dropping upstream line of {} bytes", raw.len());
                            continue;
                        }
                        yield Ok(decode_line(&raw));
                    }
                    scanned = buffer.len();

                    if buffer.len() > max_line {
                        if !discarding {
                            tracing::warn!("Upstream line exceeds {max_line} bytes, dropping it");
                            discarding = true;
                        }
                        buffer.clear();
                        scanned = 0;
                    }
                }
                Err(e) => {
                    yield Err(ProxyError::Network(format!("Upstream stream interrupted: {e}")));
                    return;
                }
            }
        }

        if !buffer.is_empty() && !discarding {
            yield Ok(decode_line(&buffer));
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}
