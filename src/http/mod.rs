//! HTTP collaborator.
//!
//! Executors talk to the repository service only through [`HttpClient`], so
//! the transfer logic can be driven by the blocking `reqwest` client in the
//! binary and by [`mock::MockHttpClient`] in tests.

pub mod mock;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::TransferError;
use crate::config::ServerDetails;
use crate::util::retry_operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// Streamed from disk when sent.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: Body::Empty }
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        find_header(&self.headers, key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self { status, ..Default::default() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        find_header(&self.headers, key)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
}

/// Blocking HTTP transport used by every executor.
///
/// `Err` means the exchange itself failed (connection, I/O); any status code
/// the server answered with comes back as `Ok`.
pub trait HttpClient: Send + Sync {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse>;

    /// Like `send`, but a 2xx body is streamed into `out` instead of being
    /// buffered. The returned response then has an empty body.
    fn download_to(&self, req: &HttpRequest, out: &mut dyn Write) -> Result<HttpResponse>;
}

/// Join a repository-relative path (and query parameters) onto the base URL.
pub fn build_url(details: &ServerDetails, path: &str, params: &[(&str, &str)]) -> Result<String> {
    let base = url::Url::parse(&details.url)
        .map_err(|e| TransferError::Config(format!("invalid url '{}': {}", details.url, e)))?;
    // "./" keeps a first segment containing ':' from being read as a scheme
    let rel = format!("./{}", path.trim_start_matches('/'));
    let mut url = base.join(&rel).with_context(|| format!("joining '{}' onto base url", path))?;
    if !params.is_empty() {
        let mut q = url.query_pairs_mut();
        for (k, v) in params {
            q.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

trait WithAuth {
    fn with_auth(self, details: &ServerDetails) -> Self;
}

impl WithAuth for reqwest::blocking::RequestBuilder {
    fn with_auth(self, details: &ServerDetails) -> Self {
        if let Some(token) = &details.access_token {
            self.bearer_auth(token)
        } else if let Some(user) = &details.user {
            self.basic_auth(user, details.password.as_ref())
        } else {
            self
        }
    }
}

/// `reqwest` blocking transport with auth injection and retries.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    details: ServerDetails,
}

impl ReqwestClient {
    pub fn new(details: ServerDetails) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .context("building http client")?;
        Ok(Self { client, details })
    }

    fn execute(&self, req: &HttpRequest) -> Result<reqwest::blocking::Response> {
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        retry_operation(self.details.retries, self.details.retry_backoff, || {
            let mut builder =
                self.client.request(method.clone(), &req.url).with_auth(&self.details);
            for (k, v) in &req.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            builder = match &req.body {
                Body::Empty => builder,
                Body::Bytes(b) => builder.body(b.clone()),
                Body::File(p) => {
                    let f = std::fs::File::open(p)
                        .with_context(|| format!("open {}", p.display()))?;
                    builder.body(reqwest::blocking::Body::from(f))
                }
            };
            tracing::debug!("[http] {} {}", req.method.as_str(), req.url);
            builder
                .send()
                .map_err(|e| TransferError::Http(format!("{} {}: {}", req.method.as_str(), req.url, e)).into())
        })
    }
}

fn response_headers(resp: &reqwest::blocking::Response) -> Vec<(String, String)> {
    resp.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

impl HttpClient for ReqwestClient {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        let resp = self.execute(req)?;
        let status = resp.status().as_u16();
        let headers = response_headers(&resp);
        let body = resp
            .bytes()
            .map_err(|e| TransferError::Http(format!("reading body of {}: {}", req.url, e)))?
            .to_vec();
        Ok(HttpResponse { status, headers, body })
    }

    fn download_to(&self, req: &HttpRequest, out: &mut dyn Write) -> Result<HttpResponse> {
        let mut resp = self.execute(req)?;
        let status = resp.status().as_u16();
        let headers = response_headers(&resp);
        if !resp.status().is_success() {
            let body = resp.bytes().map(|b| b.to_vec()).unwrap_or_default();
            return Ok(HttpResponse { status, headers, body });
        }
        resp.copy_to(out)
            .map_err(|e| TransferError::Http(format!("streaming {}: {}", req.url, e)))?;
        Ok(HttpResponse { status, headers, body: Vec::new() })
    }
}
