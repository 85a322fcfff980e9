//! HTTP transport for the conversation service.
//!
//! [`Transport`] is everything a [`Session`](crate::Session) needs from the
//! network: buffered GET/POST/PATCH and a streaming POST whose body arrives as
//! text lines.  Status codes are handed back untouched; checking them is the
//! session's job.  [`HttpTransport`] is the `reqwest` implementation.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Proxy, RequestBuilder, Response};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::{Error, Result};

/// Service root used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://chatgpt.duti.tech/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
// Each event line carries the whole answer so far.
const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// A streamed response body, one line at a time, without line terminators.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Create a new buffered response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A response whose body is still arriving.
pub struct StreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body lines; dropping the stream closes the connection.
    pub lines: LineStream,
}

impl StreamResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated request/response access to the service.
///
/// Paths are relative to the service root, e.g. `api/conversations?offset=0`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET path`, buffered.
    async fn get(&self, path: &str) -> Result<RawResponse>;

    /// `POST path` with a JSON body, buffered.
    async fn post(&self, path: &str, body: Value) -> Result<RawResponse>;

    /// `PATCH path` with a JSON body, buffered.
    async fn patch(&self, path: &str, body: Value) -> Result<RawResponse>;

    /// `POST path` with a JSON body, streaming the response as lines.
    ///
    /// `timeout` bounds each wait on the network: for the response head and
    /// then for every line of the body.  A slow answer that keeps arriving is
    /// never cut off.
    async fn post_stream(&self, path: &str, body: Value, timeout: Duration)
    -> Result<StreamResponse>;
}

/// [`Transport`] over `reqwest`, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `base_url` using `access_token`, optionally
    /// routing every request through `proxy`.
    pub fn new(base_url: &str, access_token: &str, proxy: Option<&str>) -> Result<Self> {
        Self::with_options(base_url, access_token, proxy, None)
    }

    /// Create a transport with a custom timeout for buffered requests.
    pub fn with_options(
        base_url: &str,
        access_token: &str,
        proxy: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut builder = ReqwestClient::builder().default_headers(default_headers(access_token)?);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| {
                Error::connection(format!("Invalid proxy {proxy}: {e}"), Some(Box::new(e)))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// The service root every path is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Response> {
        request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))
    }

    async fn send_streaming(&self, request: RequestBuilder, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, request.send()).await {
            Ok(sent) => sent.map_err(|e| send_error(e, timeout)),
            Err(_) => Err(Error::timeout(
                format!("No response within {timeout:?}"),
                Some(timeout.as_secs_f64()),
            )),
        }
    }

    async fn buffered(&self, request: RequestBuilder) -> Result<RawResponse> {
        let response = self.send(request, self.timeout).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Reading response timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else {
                Error::http_client(format!("Failed to read response: {e}"), Some(Box::new(e)))
            }
        })?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<RawResponse> {
        let url = self.url(path)?;
        self.buffered(self.client.get(url)).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<RawResponse> {
        let url = self.url(path)?;
        self.buffered(self.client.post(url).json(&body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<RawResponse> {
        let url = self.url(path)?;
        self.buffered(self.client.patch(url).json(&body)).await
    }

    async fn post_stream(
        &self,
        path: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<StreamResponse> {
        let url = self.url(path)?;
        let response = self
            .send_streaming(self.client.post(url).json(&body), timeout)
            .await?;
        let status = response.status().as_u16();
        Ok(StreamResponse {
            status,
            lines: line_stream(response.bytes_stream(), timeout),
        })
    }
}

/// Split a byte stream into text lines.
///
/// Lines may span chunks; `\n` and `\r\n` both terminate a line, and a final
/// unterminated line is still delivered.  Waiting longer than `timeout` for
/// the next line fails with [`Error::Timeout`].  The stream ends after its
/// first error.
pub fn line_stream<S>(byte_stream: S, timeout: Duration) -> LineStream
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    framed_lines(byte_stream, timeout, MAX_LINE_LENGTH)
}

fn framed_lines<S>(byte_stream: S, timeout: Duration, max_length: usize) -> LineStream
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let reader = StreamReader::new(byte_stream.map_err(io::Error::other));
    let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_length))
        .map_err(read_error)
        .boxed();
    Box::pin(stream::unfold(Some(lines), move |lines| async move {
        let mut lines = lines?;
        match tokio::time::timeout(timeout, lines.next()).await {
            Ok(Some(Ok(line))) => Some((Ok(line), Some(lines))),
            Ok(Some(Err(err))) => Some((Err(err), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::timeout(
                    format!("No stream data within {timeout:?}"),
                    Some(timeout.as_secs_f64()),
                )),
                None,
            )),
        }
    }))
}

fn normalize_base_url(base_url: &str) -> Result<Url> {
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{base_url}/"))?)
    }
}

fn default_headers(access_token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        header::REFERER,
        HeaderValue::from_static("https://chat.openai.com/chat"),
    );
    let mut bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
        .map_err(|_| Error::authentication("access token contains invalid header characters"))?;
    bearer.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, bearer);
    Ok(headers)
}

fn send_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::timeout(
            format!("Request timed out: {e}"),
            Some(timeout.as_secs_f64()),
        )
    } else if e.is_connect() {
        Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
    } else {
        Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
    }
}

fn read_error(e: LinesCodecError) -> Error {
    match e {
        LinesCodecError::Io(e) => {
            Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
        }
        LinesCodecError::MaxLineLengthExceeded => {
            Error::streaming("Stream line exceeded the maximum length", None)
        }
    }
}
