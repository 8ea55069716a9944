//! HTTP transport collaborator.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable, Aborted};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

/// `User-Agent` sent with every outgoing request.
pub static DEFAULT_USER_AGENT: &str = concat!("registry-client/", env!("CARGO_PKG_VERSION"));

/// Progress callback: (bytes received so far, expected total if known).
pub type ProgressHandler = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// HTTP methods used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

/// A single outgoing request.
#[derive(Debug)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Additional headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
}

impl Request {
    /// A bare request for `method` and `url`.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Append a header.
    pub fn header<S: Into<String>, V: Into<String>>(mut self, name: S, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Bound the HTTP leg of this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response headers, with case-insensitive names.
///
/// Repeated headers are comma-joined, which is what the `Link` parsers
/// expect.
#[derive(Clone, Debug, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    /// Record `value` under `name`.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self.0.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(mut entry) => {
                let joined = format!("{}, {}", entry.get(), value);
                entry.insert(joined);
            }
            Entry::Vacant(entry) => {
                entry.insert(value.to_string());
            }
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A decoded response.
#[derive(Debug, Default)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body; empty for streamed downloads.
    pub body: Vec<u8>,
}

/// Failures at the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request was aborted by [`HttpTransport::cancel`].
    #[error("request cancelled")]
    Cancelled,

    /// The HTTP stack failed.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing a streamed body to disk failed.
    #[error("i/o error during transfer: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP transport consumed by the client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute `request`, buffering the response body in memory.
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;

    /// Execute `request`, streaming a 200 response body to `destination`.
    ///
    /// Bodies of non-200 responses are buffered into the returned
    /// [`Response`] instead, so callers can decode problem details.
    async fn download(
        &self,
        request: Request,
        destination: &Path,
        progress: Option<&ProgressHandler>,
    ) -> Result<Response, TransportError>;

    /// Abort in-flight requests and refuse to start new ones.
    fn cancel(&self);
}

/// [`HttpTransport`] over a shared reqwest client.
pub struct ReqwestTransport {
    hclient: reqwest::Client,
    aborts: Mutex<HashMap<u64, AbortHandle>>,
    next_abort: AtomicU64,
    cancelled: AtomicBool,
}

impl ReqwestTransport {
    /// A transport with default reqwest options.
    pub fn new() -> Result<Self, TransportError> {
        let hclient = reqwest::ClientBuilder::new().gzip(true).build()?;
        Ok(Self::with_client(hclient))
    }

    /// A transport over an existing reqwest client.
    pub fn with_client(hclient: reqwest::Client) -> Self {
        Self {
            hclient,
            aborts: Mutex::new(HashMap::new()),
            next_abort: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn build(&self, request: Request) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let mut builder = self
            .hclient
            .request(method, request.url)
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }

    fn register_abort(&self) -> Result<AbortSlot<'_>, TransportError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Cancelled);
        }
        let (handle, registration) = AbortHandle::new_pair();
        let id = self.next_abort.fetch_add(1, Ordering::SeqCst);
        self.aborts
            .lock()
            .expect("abort registry poisoned")
            .insert(id, handle);
        Ok(AbortSlot {
            transport: self,
            id,
            registration: Some(registration),
        })
    }
}

// Keeps the abort registry from growing with completed requests.
struct AbortSlot<'a> {
    transport: &'a ReqwestTransport,
    id: u64,
    registration: Option<futures::future::AbortRegistration>,
}

impl AbortSlot<'_> {
    fn registration(&mut self) -> futures::future::AbortRegistration {
        self.registration.take().expect("registration taken twice")
    }
}

impl Drop for AbortSlot<'_> {
    fn drop(&mut self) {
        self.transport
            .aborts
            .lock()
            .expect("abort registry poisoned")
            .remove(&self.id);
    }
}

fn collect_headers(response: &reqwest::Response) -> Headers {
    let mut headers = Headers::default();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    headers
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let mut slot = self.register_abort()?;
        let builder = self.build(request);

        let round_trip = async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = collect_headers(&response);
            let body = response.bytes().await?.to_vec();
            Ok(Response {
                status,
                headers,
                body,
            })
        };

        match Abortable::new(round_trip, slot.registration()).await {
            Ok(result) => result,
            Err(Aborted) => Err(TransportError::Cancelled),
        }
    }

    async fn download(
        &self,
        request: Request,
        destination: &Path,
        progress: Option<&ProgressHandler>,
    ) -> Result<Response, TransportError> {
        let mut slot = self.register_abort()?;
        let builder = self.build(request);

        let round_trip = async move {
            let mut response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = collect_headers(&response);

            if status != 200 {
                let body = response.bytes().await?.to_vec();
                return Ok(Response {
                    status,
                    headers,
                    body,
                });
            }

            let total = response.content_length();
            let mut file = tokio::fs::File::create(destination).await?;
            let mut received: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                received += chunk.len() as u64;
                if let Some(progress) = progress {
                    progress(received, total);
                }
            }
            file.flush().await?;

            Ok(Response {
                status,
                headers,
                body: Vec::new(),
            })
        };

        match Abortable::new(round_trip, slot.registration()).await {
            Ok(result) => result,
            Err(Aborted) => Err(TransportError::Cancelled),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut aborts = self.aborts.lock().expect("abort registry poisoned");
        for (_, handle) in aborts.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive_and_joined() {
        let mut headers = Headers::default();
        headers.insert("Link", "<https://a>; rel=\"canonical\"");
        headers.insert("link", "<https://b>; rel=\"alternate\"");

        assert_eq!(
            headers.get("LINK"),
            Some("<https://a>; rel=\"canonical\", <https://b>; rel=\"alternate\"")
        );
        assert_eq!(headers.get("location"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_round_trip() {
        let _m = mockito::mock("GET", "/ping")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create();

        let transport = ReqwestTransport::new().unwrap();
        let url = Url::parse(&format!("{}/ping", mockito::server_url())).unwrap();
        let response = transport
            .execute(Request::new(Method::Get, url))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
        assert_eq!(response.body, br#"{"ok":true}"#.to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_streams_to_disk() {
        let _m = mockito::mock("GET", "/blob.zip")
            .with_status(200)
            .with_header("content-type", "application/zip")
            .with_body(vec![0x50, 0x4b, 0x03, 0x04])
            .create();

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("blob.zip");

        let transport = ReqwestTransport::new().unwrap();
        let url = Url::parse(&format!("{}/blob.zip", mockito::server_url())).unwrap();
        let response = transport
            .download(Request::new(Method::Get, url), &destination, None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(
            std::fs::read(&destination).unwrap(),
            vec![0x50, 0x4b, 0x03, 0x04]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_transport_refuses_requests() {
        let transport = ReqwestTransport::new().unwrap();
        transport.cancel();

        let url = Url::parse("https://registry.invalid/ping").unwrap();
        let result = transport.execute(Request::new(Method::Get, url)).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
