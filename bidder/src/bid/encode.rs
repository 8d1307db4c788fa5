use std::{io::Write as _, sync::Arc};

use flate2::{Compression, write::GzEncoder};
use rama::{
    http::{
        Body, HeaderMap, HeaderValue, Response, StatusCode,
        header::{ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING},
        headers::ContentType,
        service::web::response::{Headers, IntoResponse},
    },
    telemetry::tracing,
    utils::time::now_unix_ms,
};
use serde::Serialize;

use crate::config::TuningConfig;

use super::{BidRequestHint, DelayDecision};

const BLOB_FILLER: char = 'x';

#[derive(Debug, Serialize)]
/// Synthetic bid response, filler only.
pub struct BidResponse<'a> {
    pub id: &'a str,
    pub upstream: &'a str,
    pub ts: i64,
    pub took_ms: u64,
    pub echo_tmax: u64,
    pub blob: &'a str,
}

/// Transport encoding negotiated for a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFraming {
    /// Client accepts a gzip encoded body.
    pub accepts_gzip: bool,
    /// Client speaks HTTP/1.0 or HTTP/1.1 and gets an explicit keep-alive.
    pub keep_alive: bool,
}

impl ResponseFraming {
    pub fn from_request_parts(version: rama::http::Version, headers: &HeaderMap) -> Self {
        Self {
            accepts_gzip: accepts_gzip(headers),
            keep_alive: matches!(
                version,
                rama::http::Version::HTTP_10 | rama::http::Version::HTTP_11
            ),
        }
    }
}

/// Whether any `Accept-Encoding` value mentions gzip.
///
/// Deliberately loose (no q-value parsing): callers under test
/// either send `gzip` or they don't.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("gzip"))
}

/// Builds bid response payloads from the immutable [`TuningConfig`].
#[derive(Debug, Clone)]
pub struct ResponseEncoder {
    upstream: Arc<str>,
    blob: Arc<str>,
    gzip_enabled: bool,
}

impl ResponseEncoder {
    pub fn new(cfg: &TuningConfig) -> Self {
        Self {
            upstream: cfg.upstream.as_str().into(),
            blob: BLOB_FILLER.to_string().repeat(cfg.blob_bytes).into(),
            gzip_enabled: cfg.gzip_enabled,
        }
    }

    /// Serialize the JSON payload for a decided bid request.
    pub fn payload(&self, hint: &BidRequestHint, decision: DelayDecision) -> Vec<u8> {
        let response = BidResponse {
            id: &hint.id,
            upstream: &self.upstream,
            ts: now_unix_ms(),
            took_ms: decision.delay_ms,
            echo_tmax: hint.tmax,
            blob: &self.blob,
        };
        // a struct of strings and integers has no failing serialization path
        serde_json::to_vec(&response).unwrap_or_default()
    }

    /// Build the full HTTP response for a decided bid request.
    ///
    /// Compression runs on the blocking pool so that it never stalls
    /// the other in-flight bids. If it fails for whatever reason the
    /// uncompressed payload is used instead.
    pub async fn encode(
        &self,
        hint: &BidRequestHint,
        decision: DelayDecision,
        framing: ResponseFraming,
    ) -> Response {
        let payload = self.payload(hint, decision);

        if !(self.gzip_enabled && framing.accepts_gzip) {
            return json_response(payload, None, framing);
        }

        let payload_len = payload.len();
        match tokio::task::spawn_blocking(move || {
            let compressed = gzip(&payload);
            (payload, compressed)
        })
        .await
        {
            Ok((_, Ok(compressed))) => {
                tracing::trace!(
                    payload.size = payload_len,
                    payload.compressed_size = compressed.len(),
                    "bid response gzipped"
                );
                json_response(compressed, Some(HeaderValue::from_static("gzip")), framing)
            }
            Ok((payload, Err(err))) => {
                tracing::warn!("failed to gzip bid response: send it uncompressed: {err}");
                json_response(payload, None, framing)
            }
            Err(err) => {
                tracing::warn!("gzip task for bid response failed: send it uncompressed: {err}");
                json_response(self.payload(hint, decision), None, framing)
            }
        }
    }
}

fn gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::fast());
    encoder.write_all(payload)?;
    encoder.finish()
}

fn json_response(
    body: Vec<u8>,
    content_encoding: Option<HeaderValue>,
    framing: ResponseFraming,
) -> Response {
    let mut response = (
        StatusCode::OK,
        Headers::single(ContentType::json()),
        Body::from(body),
    )
        .into_response();

    let headers = response.headers_mut();
    if let Some(encoding) = content_encoding {
        headers.insert(CONTENT_ENCODING, encoding);
    }
    if framing.keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
    response
}
