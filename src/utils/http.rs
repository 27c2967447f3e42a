use chardet::detect;
use encoding_rs::{Encoding, UTF_8};
use mime::Mime;
use reqwest::Client;
use std::time::Duration;

use super::rate_limit::RateLimiter;
use crate::core::error::FetchError;

const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Response body read up to a byte cap.
#[derive(Debug, Clone)]
pub struct CappedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub truncated: bool,
}

/// Accumulates body chunks up to `max_bytes`, keeping the earliest bytes.
#[derive(Debug)]
pub struct ByteCap {
    bytes: Vec<u8>,
    max_bytes: usize,
    truncated: bool,
}

impl ByteCap {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_bytes,
            truncated: false,
        }
    }

    /// Appends a chunk. Returns false once the cap is hit and further chunks would be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let remaining = self.max_bytes - self.bytes.len();
        if chunk.len() > remaining {
            self.bytes.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    pub fn finish(self) -> (Vec<u8>, bool) {
        (self.bytes, self.truncated)
    }
}

/// GETs from a rate-limited upstream that requires client identification.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    limiter: RateLimiter,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(client: Client, user_agent: &str, limiter: RateLimiter, max_retries: u32) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
            limiter,
            max_retries,
        }
    }

    pub async fn get_text(&self, url: &str, accept: Mime) -> Result<String, FetchError> {
        let response = self.send_with_retry(url, &accept).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    /// Reads at most `max_bytes`, keeping the earliest bytes of the body.
    pub async fn get_capped(
        &self,
        url: &str,
        accept: Mime,
        max_bytes: usize,
    ) -> Result<CappedBody, FetchError> {
        let mut response = self.send_with_retry(url, &accept).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|ct| ct.to_string());

        if let Some(length) = response.content_length() {
            log::debug!("Expected content length: {}", length);
            if length as usize > max_bytes {
                log::info!(
                    "Document at {} is {} bytes, keeping the first {}",
                    url,
                    length,
                    max_bytes
                );
            }
        }

        let mut cap = ByteCap::new(max_bytes);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            if !cap.push(&chunk) {
                break;
            }
        }
        let (bytes, truncated) = cap.finish();
        log::debug!("Received {} bytes from {}", bytes.len(), url);

        Ok(CappedBody {
            bytes,
            content_type,
            truncated,
        })
    }

    async fn send_with_retry(
        &self,
        url: &str,
        accept: &Mime,
    ) -> Result<reqwest::Response, FetchError> {
        let mut attempt = 0;
        loop {
            match self.send(url, accept).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    attempt += 1;
                    log::warn!(
                        "Request to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        url,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, url: &str, accept: &Mime) -> Result<reqwest::Response, FetchError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| FetchError::Malformed {
                url: url.to_string(),
                reason: format!("rate limiter unavailable: {}", e),
            })?;

        log::debug!("Fetching URL: {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, accept.as_ref())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        log::debug!("Response status: {}", response.status());
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

/// Decodes a document body, detecting the charset when it is not UTF-8.
///
/// A body cut at a byte cap may end inside a multi-byte sequence; that tail is dropped.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => {
            let charenc = detect(bytes).0;
            log::debug!("Detected character encoding: {}", charenc);
            let encoding = Encoding::for_label(charenc.as_bytes()).unwrap_or(UTF_8);
            let (text, _, had_errors) = encoding.decode(bytes);
            if had_errors {
                log::debug!("Lossy decode using {}", encoding.name());
            }
            text.into_owned()
        }
    }
}
