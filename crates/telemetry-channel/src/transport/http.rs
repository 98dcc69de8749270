// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of batches to a logs intake endpoint.
//!
//! # Wire format
//!
//! ```text
//! POST <endpoint>
//! Content-Type: application/json
//! Content-Encoding: zstd        (only when compression is enabled)
//! <api key header>: <api key>   (only when a key is configured)
//!
//! {"logs":[<payload 1>,<payload 2>,...]}
//! ```
//!
//! Payloads are already-serialized JSON documents and are spliced into the
//! body verbatim, in batch order. A payload that is not valid JSON makes the
//! whole batch undeliverable.
//!
//! Each call performs a single attempt. Retrying is the channel's decision,
//! driven by the returned [`SendOutcome`].

use std::io::Write;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use serde::de::IgnoredAny;
use tracing::{debug, error};
use zstd::stream::write::Encoder;

use crate::batch::Batch;
use crate::config::Config;
use crate::transport::{classify_status, SendOutcome, Transport};

const BODY_PREFIX: &[u8] = br#"{"logs":["#;
const BODY_SUFFIX: &[u8] = b"]}";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    /// zstd level, `None` when bodies are sent uncompressed.
    compression_level: Option<i32>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        HttpTransport {
            client: get_client(config.request_timeout),
            endpoint: config.endpoint.clone(),
            headers: build_headers(config),
            compression_level: config.use_compression.then_some(config.compression_level),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn compress(&self, level: i32, data: &[u8]) -> Option<Vec<u8>> {
        let encode = || -> std::io::Result<Vec<u8>> {
            let mut encoder = Encoder::new(Vec::new(), level)?;
            encoder.write_all(data)?;
            encoder.finish()
        };
        match encode() {
            Ok(compressed) => Some(compressed),
            Err(e) => {
                debug!("TRANSPORT | Failed to compress body, sending it uncompressed: {e}");
                None
            }
        }
    }
}

/// Builds the reqwest client, falling back to reqwest defaults when the
/// configured builder is rejected.
fn get_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("TRANSPORT | Failed to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

fn build_headers(config: &Config) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(api_key) = &config.api_key {
        let name = HeaderName::from_bytes(config.api_key_header.as_bytes());
        let value = HeaderValue::from_str(api_key);
        match (name, value) {
            (Ok(name), Ok(mut value)) => {
                value.set_sensitive(true);
                headers.insert(name, value);
            }
            _ => error!(
                "TRANSPORT | Ignoring API key: '{}' is not a valid header",
                config.api_key_header
            ),
        }
    }
    headers
}

/// Joins the batch payloads into the `{"logs":[...]}` envelope.
pub(crate) fn build_body(batch: &Batch) -> Result<Vec<u8>, String> {
    let size = batch.payloads().map(|p| p.len() + 1).sum::<usize>();
    let mut body = Vec::with_capacity(BODY_PREFIX.len() + size + BODY_SUFFIX.len());
    body.extend_from_slice(BODY_PREFIX);
    for (index, stored) in batch.entries.iter().enumerate() {
        if let Err(e) = serde_json::from_slice::<IgnoredAny>(&stored.entry.payload) {
            return Err(format!("entry {} is not valid JSON: {e}", stored.id));
        }
        if index > 0 {
            body.push(b',');
        }
        body.extend_from_slice(&stored.entry.payload);
    }
    body.extend_from_slice(BODY_SUFFIX);
    Ok(body)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        let body = match build_body(batch) {
            Ok(body) => body,
            Err(e) => return SendOutcome::FatalFailure(e),
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone());
        let compressed = self
            .compression_level
            .and_then(|level| self.compress(level, &body));
        request = match compressed {
            Some(compressed) => request
                .header(CONTENT_ENCODING, HeaderValue::from_static("zstd"))
                .body(compressed),
            None => request.body(body),
        };

        let start = Instant::now();
        match request.send().await {
            Ok(response) => {
                let outcome = classify_status(response.status());
                debug!(
                    "TRANSPORT | {} | Batch {} of {} logs answered {} after {} ms",
                    batch.channel,
                    batch.id,
                    batch.len(),
                    response.status(),
                    start.elapsed().as_millis()
                );
                outcome
            }
            Err(e) => SendOutcome::RetryableFailure(format!(
                "request failed after {} ms: {e}",
                start.elapsed().as_millis()
            )),
        }
    }
}
