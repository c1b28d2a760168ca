//! HTTP Client
//!
//! Uses hyper with tokio for HTTP/1.1 over plain TCP or rustls.
//! Features:
//! - Whole-request timeout plus a separate connect timeout
//! - Redirect following (bounded)
//! - Response body size limit

use http_body_util::{BodyExt, Empty, Limited};
use hyper::body::Bytes;
use hyper::header::{HOST, HeaderMap, LOCATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use rustls::ClientConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use url::{Host, Position, Url};

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Body read error: {0}")]
    BodyError(String),

    #[error("Too many redirects")]
    TooManyRedirects,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout, redirects included
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
    /// Maximum response body size
    pub max_body_size: usize,
    /// Redirects followed before giving up
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("mdla/{}", env!("CARGO_PKG_VERSION")),
            max_body_size: 10 * 1024 * 1024, // 10 MB
            max_redirects: 5,
        }
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
    /// Time to first byte of the last hop
    pub ttfb: Duration,
    /// Total time, redirects included
    pub total_time: Duration,
    /// Final URL (after redirects)
    pub final_url: String,
}

impl Response {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get body as string
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }
}

/// Client statistics
#[derive(Debug, Default)]
pub struct ClientStats {
    pub requests_made: AtomicU64,
    pub bytes_downloaded: AtomicU64,
}

/// HTTP client
pub struct HttpClient {
    config: HttpClientConfig,
    stats: ClientStats,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Self {
        info!(
            "HTTP client initialized (timeout: {:?}, max redirects: {})",
            config.timeout, config.max_redirects
        );

        Self {
            config,
            stats: ClientStats::default(),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Perform a GET request, following redirects
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        let start = Instant::now();
        let mut response = tokio::time::timeout(self.config.timeout, self.follow(url))
            .await
            .map_err(|_| HttpError::Timeout)??;
        response.total_time = start.elapsed();
        Ok(response)
    }

    async fn follow(&self, url: &str) -> Result<Response, HttpError> {
        let mut current = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

        for _ in 0..=self.config.max_redirects {
            let response = self.fetch_once(&current).await?;
            if !response.status.is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let Some(location) = location else {
                return Ok(response);
            };
            let next = current
                .join(&location)
                .map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
            debug!("Redirect {} -> {}", current, next);
            current = next;
        }

        Err(HttpError::TooManyRedirects)
    }

    async fn fetch_once(&self, url: &Url) -> Result<Response, HttpError> {
        self.stats.requests_made.fetch_add(1, Ordering::Relaxed);

        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(HttpError::InvalidUrl(format!("Unsupported scheme: {}", other))),
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(HttpError::InvalidUrl("No host in URL".to_string())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::InvalidUrl("No port in URL".to_string()))?;

        let path = &url[Position::BeforePath..Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };
        let authority = &url[Position::BeforeHost..Position::AfterPort];

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(HOST, authority)
            .header(USER_AGENT, &self.config.user_agent)
            .body(Empty::<Bytes>::new())
            .map_err(|e| HttpError::HttpError(e.to_string()))?;

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        .map_err(|_| HttpError::Timeout)?
        .map_err(|e| HttpError::ConnectionFailed(e.to_string()))?;

        let ttfb_start = Instant::now();
        let response = if is_https {
            let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                .map_err(|_| HttpError::TlsError("Invalid server name".to_string()))?;
            let tls_stream = tls_connector()?
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::TlsError(e.to_string()))?;
            send(tls_stream, request).await?
        } else {
            send(stream, request).await?
        };
        let ttfb = ttfb_start.elapsed();

        let status = response.status();
        let headers = response.headers().clone();

        let collected = Limited::new(response.into_body(), self.config.max_body_size)
            .collect()
            .await
            .map_err(|e| HttpError::BodyError(e.to_string()))?;
        let body = collected.to_bytes().to_vec();

        self.stats
            .bytes_downloaded
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        debug!(
            "HTTP GET {} -> {} ({} bytes, {:?} TTFB)",
            url,
            status,
            body.len(),
            ttfb
        );

        Ok(Response {
            status,
            headers,
            body,
            ttfb,
            total_time: ttfb,
            final_url: url.to_string(),
        })
    }

    /// (requests made, bytes downloaded)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.requests_made.load(Ordering::Relaxed),
            self.stats.bytes_downloaded.load(Ordering::Relaxed),
        )
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn tls_connector() -> Result<TlsConnector, HttpError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::TlsError(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

async fn send<T>(
    io: T,
    request: Request<Empty<Bytes>>,
) -> Result<hyper::Response<hyper::body::Incoming>, HttpError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(io);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HttpError::HttpError(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("Connection error: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| HttpError::HttpError(e.to_string()))
}
