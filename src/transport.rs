//! One request, one response.
//!
//! Everything above this module speaks [`HttpRequest`] / [`HttpResponse`], so
//! the reqwest-backed transport can be swapped for [`ScriptedTransport`] in
//! tests, or for anything else that implements [`Transport`].

use reqwest::Method;
use reqwest::blocking::Client as HttpClient;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, MultipartPhase, Result};
use crate::multipart::MultipartForm;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// Serialized JSON, sent as `application/json`.
    Json(String),
    Multipart(MultipartForm),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Sent verbatim as the `Authorization` header; empty means no header.
    pub auth: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a JSON body and matching content type.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Box<dyn Read + Send>,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<HttpResponse> for StreamingResponse {
    fn from(resp: HttpResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            body: Box::new(Cursor::new(resp.body)),
        }
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs a single HTTP exchange.
///
/// Implementations must be shareable across threads: several pollers may use
/// the same transport at once. A non-2xx status is not an error at this
/// level; only failing to complete the exchange is.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Like [`send`](Self::send), but hands back the body unread so large
    /// downloads need not sit in memory. Defaults to buffering via `send`.
    fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        self.send(request).map(StreamingResponse::from)
    }
}

/// [`Transport`] backed by a pooled `reqwest` blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, verify: bool) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pzsvc-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("pzsvc-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout);

        if !verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(anyhow::Error::new(e).context("failed to build HTTP client")))?;
        Ok(Self { http })
    }

    /// Wraps an already configured client.
    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }

    fn execute(&self, request: &HttpRequest) -> Result<reqwest::blocking::Response> {
        let mut req = self.http.request(request.method.clone(), &request.url);
        if !request.auth.is_empty() {
            req = req.header(AUTHORIZATION, request.auth.as_str());
        }
        req = match &request.body {
            RequestBody::Empty => req,
            RequestBody::Json(s) => req.header(CONTENT_TYPE, "application/json").body(s.clone()),
            RequestBody::Multipart(form) => req.multipart(to_form(form.clone())?),
            RequestBody::Form(pairs) => req.form(pairs),
        };
        req.send().map_err(|e| Self::transport_error(request, e))
    }

    fn transport_error(request: &HttpRequest, err: reqwest::Error) -> Error {
        Error::Transport {
            method: request.method.clone(),
            url: request.url.clone(),
            source: Box::new(err),
        }
    }
}

fn to_form(form: MultipartForm) -> Result<Form> {
    let form = form.finish()?;
    let mut out = Form::new();
    for (name, value) in form.fields {
        out = out.text(name, value);
    }
    if let Some(file) = form.file {
        let part = Part::bytes(file.data)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|e| Error::Multipart {
                phase: MultipartPhase::Finish,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;
        out = out.part(file.field, part);
    }
    Ok(out)
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let resp = self.execute(&request)?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        // Reading to the end hands the connection back to the pool.
        let body = resp
            .bytes()
            .map_err(|e| Self::transport_error(&request, e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let resp = self.execute(&request)?;
        Ok(StreamingResponse {
            status: resp.status().as_u16(),
            headers: resp.headers().clone(),
            body: Box::new(resp),
        })
    }
}

/// A canned reply for [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(HttpResponse),
    /// Fail the exchange as if the connection had been refused.
    ConnectionError(String),
}

impl From<HttpResponse> for ScriptedReply {
    fn from(resp: HttpResponse) -> Self {
        Self::Respond(resp)
    }
}

/// [`Transport`] that replays canned replies in order and records every
/// request it sees.
///
/// Once the script runs out it keeps answering with the fallback reply,
/// which defaults to `200 {}`.
#[derive(Debug)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            fallback: ScriptedReply::Respond(HttpResponse::json(200, "{}")),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies `200` with each body in turn.
    pub fn json_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(bodies.into_iter().map(|b| HttpResponse::json(200, b)))
    }

    pub fn with_fallback(mut self, reply: impl Into<ScriptedReply>) -> Self {
        self.fallback = reply.into();
        self
    }

    /// Number of requests sent so far.
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the requests sent so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            ScriptedReply::Respond(resp) => Ok(resp),
            ScriptedReply::ConnectionError(msg) => Err(Error::Transport {
                method: request.method,
                url: request.url,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    msg,
                )),
            }),
        }
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).send(request)
    }

    fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        (**self).send_streaming(request)
    }
}
