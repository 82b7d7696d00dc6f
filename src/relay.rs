//! Streaming relay for chat-completion endpoints.
//!
//! The relay never interprets the response body. Whatever bytes arrive after
//! a `200` are handed to the consumer in order, one chunk per received byte
//! range, and the stream ends when the server closes the body.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
    USER_AGENT,
};
use reqwest::Url;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ReviewError};

const CANONICAL_SUFFIX: &str = "/v1/chat/completions";
const ACCEPTED_SUFFIXES: [&str; 2] = ["/v1/chat/completions", "/chat/completions"];
const ERROR_BODY_PREVIEW: usize = 512;
const CHUNK_BUFFER: usize = 16;

/// Sampling and length parameters sent with every request.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub top_p: f32,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    frequency_penalty: f32,
    presence_penalty: f32,
    top_p: f32,
    stop: Option<Vec<String>>,
}

impl CompletionPolicy {
    fn request_body(&self, prompt: &str) -> Result<Vec<u8>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            top_p: self.top_p,
            stop: None,
        };
        serde_json::to_vec(&request)
            .map_err(|e| ReviewError::InvalidArgument(format!("cannot encode request: {}", e)))
    }
}

/// Resolves the full chat-completions URL for a user-supplied base URL.
///
/// Any path prefix is kept; `/v1/chat/completions` is appended unless the
/// path already ends in a chat-completions suffix. Plain `http` is accepted
/// for loopback hosts only.
pub fn normalize_endpoint(base: &str) -> Result<Url> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| ReviewError::InvalidArgument(format!("invalid endpoint '{}': {}", base, e)))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback(&url) => {}
        other => {
            return Err(ReviewError::InvalidArgument(format!(
                "endpoint scheme '{}' is not allowed, use https",
                other
            )))
        }
    }

    let path = url.path().trim_end_matches('/').to_string();
    if !ACCEPTED_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        url.set_path(&format!("{}{}", path, CANONICAL_SUFFIX));
    }
    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

/// Issues streaming completion requests.
#[derive(Clone)]
pub struct AiRelay {
    client: reqwest::Client,
    policy: CompletionPolicy,
    header_timeout: Duration,
}

impl AiRelay {
    pub fn new(policy: CompletionPolicy, header_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(header_timeout)
            .build()
            .map_err(|e| ReviewError::ConnectionFailed(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            policy,
            header_timeout,
        })
    }

    /// Starts a completion and returns its chunk stream once a `200` arrived.
    ///
    /// Status failures are reported here, before any chunk exists. The
    /// header deadline covers connecting and receiving the status line only.
    pub async fn analyze(&self, endpoint: &str, credential: &str, prompt: &str) -> Result<ChunkStream> {
        if credential.trim().is_empty() {
            return Err(ReviewError::InvalidArgument("credential is required".to_string()));
        }
        if prompt.is_empty() {
            return Err(ReviewError::InvalidArgument("prompt is required".to_string()));
        }
        let url = normalize_endpoint(endpoint)?;
        let body = self.policy.request_body(prompt)?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.trim()))
            .map_err(|_| ReviewError::InvalidArgument("credential contains invalid characters".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("vcs-review-service/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        tracing::info!("Starting completion stream against {}", url);
        let send = self.client.post(url.clone()).headers(headers).body(body).send();
        let response = match tokio::time::timeout(self.header_timeout, send).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ReviewError::NetworkTimeout(format!(
                    "no response headers from {} within {:?}",
                    url, self.header_timeout
                )))
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let preview = tokio::time::timeout(self.header_timeout, response.text())
                .await
                .ok()
                .and_then(|body| body.ok())
                .unwrap_or_default();
            let preview: String = preview.chars().take(ERROR_BODY_PREVIEW).collect();
            tracing::warn!("Completion endpoint answered {}: {}", status, preview);
            return Err(ReviewError::from_status(status.as_u16()));
        }

        let cancel = CancellationToken::new();
        Ok(ChunkStream::new(response, cancel))
    }
}

/// Ordered chunks of one completion response.
///
/// Yields `Ok(bytes)` per received range, at most one `Err` on a transport
/// failure, then ends. Cancelling the handle or dropping the stream closes
/// the connection.
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    cancel: CancellationToken,
}

impl ChunkStream {
    fn new(response: reqwest::Response, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(pump_body(response, tx, cancel.clone()));
        let inner = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// Token that aborts this relay from another task.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns the response and forwards its body until it ends, fails, or the
/// token fires. Returning drops the response, which closes the connection.
async fn pump_body(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes>>,
    token: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut chunks = 0usize;
    let mut saw_error_marker = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!("Completion stream cancelled after {} chunks", chunks);
                return;
            }
            next = body.next() => next,
        };
        let item = match next {
            Some(Ok(bytes)) => {
                chunks += 1;
                if !saw_error_marker && contains(&bytes, b"error") {
                    saw_error_marker = true;
                }
                Ok(bytes)
            }
            Some(Err(e)) => {
                tracing::warn!("Completion stream failed after {} chunks: {}", chunks, e);
                Err(ReviewError::from(e))
            }
            None => {
                if saw_error_marker {
                    tracing::warn!("Completion stream carried an error marker");
                }
                tracing::info!("Completion stream finished with {} chunks", chunks);
                return;
            }
        };
        let failed = item.is_err();
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        if failed {
            return;
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
