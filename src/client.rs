use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::load_config;
use crate::decode::{Decoded, decode_json};
use crate::error::{Error, Result, extract_backend_message};
use crate::multipart::MultipartForm;
use crate::poll::{CancelToken, JobPoller, PollConfig};
use crate::transport::{
    HttpRequest, HttpResponse, ReqwestTransport, RequestBody, StreamingResponse, Transport,
};
use crate::util::urljoin;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway base URL, e.g. `https://pz-gateway.example.com`.
    pub url: String,
    /// Sent verbatim as the `Authorization` header on every request.
    pub key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

/// Gateway client.
///
/// Cheap to clone; clones share the underlying transport and its connection
/// pool, so one client can drive many concurrent job waits.
#[derive(Clone)]
pub struct Client {
    url: String,
    key: String,

    poll: PollConfig,
    progress: bool,

    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("poll", &self.poll)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.pzsvcrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`key` arguments
    /// - environment variables `PZSVC_URL` / `PZSVC_AUTH`
    /// - config file from `PZSVC_RC` or `.pzsvcrc`
    /// - for the url only, the gateway derived from `DOMAIN`
    pub fn new(url: Option<String>, key: Option<String>, verify: Option<bool>) -> Result<Self> {
        let cfg = load_config(url, key, verify)?;
        Self::from_config(cfg, DEFAULT_TIMEOUT)
    }

    /// Creates a client over a fresh `reqwest` transport.
    pub fn from_config(cfg: ClientConfig, timeout: Duration) -> Result<Self> {
        let transport = ReqwestTransport::new(timeout, cfg.verify)?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    /// Creates a client over any transport, e.g. a scripted one in tests.
    pub fn with_transport(cfg: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: cfg.url.trim_end_matches('/').to_string(),
            key: cfg.key,
            poll: PollConfig::default(),
            progress: true,
            transport,
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.poll.max_polls = max_polls;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub(crate) fn progress(&self) -> bool {
        self.progress
    }

    /// Absolute URL for a path under the gateway.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        urljoin(&self.url, path)
    }

    /// Sends one GET/POST/PUT/DELETE call and checks the status.
    ///
    /// A non-empty `body` goes out as `application/json`. A status outside
    /// 200..=299 comes back as [`Error::HttpStatus`] carrying the full body.
    pub fn submit_single_part(&self, method: &str, body: &str, url: &str) -> Result<HttpResponse> {
        let method = parse_method(method)?;
        check_url(url)?;
        let body = if body.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Json(body.to_string())
        };
        self.send(method, url, body)
    }

    /// POSTs a `multipart/form-data` request with a `data` field holding
    /// `body` and, optionally, a `file` part.
    ///
    /// Form assembly happens before anything is sent; a failure there is
    /// reported as [`Error::Multipart`] naming the phase.
    pub fn submit_multipart(
        &self,
        body: &str,
        url: &str,
        file: Option<(&str, &mut dyn Read)>,
    ) -> Result<HttpResponse> {
        check_url(url)?;
        let mut form = MultipartForm::new().text("data", body)?;
        if let Some((file_name, reader)) = file {
            form = form.file("file", file_name, reader)?;
        }
        self.submit_form(url, form)
    }

    pub(crate) fn submit_form(&self, url: &str, form: MultipartForm) -> Result<HttpResponse> {
        let form = form.finish()?;
        self.send(Method::POST, url, RequestBody::Multipart(form))
    }

    /// Sends a call whose response is JSON of a known shape and decodes it.
    ///
    /// The raw body is returned alongside the value for diagnostics.
    pub fn request_known_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &str,
        url: &str,
    ) -> Result<Decoded<T>> {
        let resp = self.submit_single_part(method, body, url)?;
        decode_json(resp.body)
    }

    /// Polls `job_id` until it finishes and returns its result payload.
    pub fn get_job_response(&self, job_id: &str) -> Result<Value> {
        self.get_job_response_cancellable(job_id, &CancelToken::new())
    }

    /// Like [`get_job_response`](Self::get_job_response), but gives up with
    /// [`Error::Cancelled`] once `cancel` fires.
    pub fn get_job_response_cancellable(&self, job_id: &str, cancel: &CancelToken) -> Result<Value> {
        JobPoller::new(self.transport.as_ref(), &self.poll).wait(job_id, &self.url, &self.key, cancel)
    }

    pub(crate) fn send(&self, method: Method, url: &str, body: RequestBody) -> Result<HttpResponse> {
        self.send_as(method, url, &self.key, body)
    }

    /// Sends with an explicit `Authorization` value; empty sends none.
    pub(crate) fn send_as(
        &self,
        method: Method,
        url: &str,
        auth: &str,
        body: RequestBody,
    ) -> Result<HttpResponse> {
        debug!(%method, url, "sending request");
        let resp = self.transport.send(HttpRequest {
            method: method.clone(),
            url: url.to_string(),
            auth: auth.to_string(),
            body,
        })?;

        if !resp.is_success() {
            return Err(Error::HttpStatus {
                method,
                url: url.to_string(),
                status: resp.status,
                message: extract_backend_message(&resp.body),
                body: resp.body,
            });
        }
        Ok(resp)
    }

    /// GETs `url` and returns the response with its body unread.
    ///
    /// A non-2xx status is still read in full so the error carries the body.
    pub(crate) fn get_streaming(&self, url: &str) -> Result<StreamingResponse> {
        debug!(url, "opening download");
        let mut resp = self.transport.send_streaming(HttpRequest {
            method: Method::GET,
            url: url.to_string(),
            auth: self.key.clone(),
            body: RequestBody::Empty,
        })?;

        if !resp.is_success() {
            let mut body = Vec::new();
            resp.body
                .read_to_end(&mut body)
                .map_err(|e| read_error(Method::GET, url, e))?;
            return Err(Error::HttpStatus {
                method: Method::GET,
                url: url.to_string(),
                status: resp.status,
                message: extract_backend_message(&body),
                body,
            });
        }
        Ok(resp)
    }

    pub(crate) fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Decoded<T>> {
        let resp = self.send(Method::GET, url, RequestBody::Empty)?;
        decode_json(resp.body)
    }

    pub(crate) fn post_json<B, T>(&self, method: Method, url: &str, body: &B) -> Result<Decoded<T>>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send_json(method, url, body)?;
        decode_json(resp.body)
    }

    pub(crate) fn send_json<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<HttpResponse> {
        let json = serde_json::to_string(body)
            .map_err(|e| Error::InvalidArgument(format!("request body is not serializable: {e}")))?;
        self.send(method, url, RequestBody::Json(json))
    }
}

/// A response body that broke off mid-read.
pub(crate) fn read_error(method: Method, url: &str, err: std::io::Error) -> Error {
    Error::Transport {
        method,
        url: url.to_string(),
        source: Box::new(err),
    }
}

fn parse_method(method: &str) -> Result<Method> {
    if method.trim().is_empty() {
        return Err(Error::InvalidArgument("HTTP method is empty".to_string()));
    }
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::InvalidArgument(format!("invalid HTTP method {method:?}")))
}

fn check_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::InvalidArgument("URL is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedReply, ScriptedTransport};

    fn client(t: &Arc<ScriptedTransport>) -> Client {
        let cfg = ClientConfig {
            url: "http://gw/".to_string(),
            key: "testAuthKey".to_string(),
            verify: true,
        };
        Client::with_transport(cfg, t.clone()).with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn test_submit_single_part_sends_headers_and_body() {
        let t = Arc::new(ScriptedTransport::new([HttpResponse::json(250, "{}")]));
        let c = client(&t);
        let resp = c
            .submit_single_part("TRACE", "testBody", "http://testURL.net")
            .unwrap();
        assert_eq!(resp.status, 250);

        let req = &t.requests()[0];
        assert_eq!(req.method.as_str(), "TRACE");
        assert_eq!(req.url, "http://testURL.net");
        assert_eq!(req.auth, "testAuthKey");
        assert!(matches!(&req.body, RequestBody::Json(b) if b == "testBody"));
    }

    #[test]
    fn test_submit_single_part_status_errors() {
        for status in [500, 100] {
            let t = Arc::new(ScriptedTransport::new([HttpResponse::json(
                status,
                r#"{"message":"broken"}"#,
            )]));
            let err = client(&t)
                .submit_single_part("GET", "", "http://testURL.net")
                .unwrap_err();
            assert_eq!(err.status(), Some(status));
            assert_eq!(err.body(), Some(&br#"{"message":"broken"}"#[..]));
        }
    }

    #[test]
    fn test_transport_error_is_distinct() {
        let t = Arc::new(ScriptedTransport::new([ScriptedReply::ConnectionError(
            "connection refused".into(),
        )]));
        let err = client(&t)
            .submit_single_part("GET", "", "http://testURL.net")
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_invalid_arguments_send_nothing() {
        let t = Arc::new(ScriptedTransport::new(Vec::<HttpResponse>::new()));
        let c = client(&t);
        assert!(matches!(
            c.submit_single_part("", "", "http://x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            c.submit_single_part("GET", "", " "),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            c.submit_single_part("GE T", "", "http://x"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(t.calls(), 0);
    }

    #[test]
    fn test_submit_multipart() {
        let t = Arc::new(ScriptedTransport::new([
            HttpResponse::json(250, "{}"),
            HttpResponse::json(550, ""),
        ]));
        let c = client(&t);
        let mut data: &[u8] = b"testtesttest";
        c.submit_multipart("testBody", "http://testURL.net", Some(("name", &mut data as &mut dyn Read)))
            .unwrap();

        match &t.requests()[0].body {
            RequestBody::Multipart(form) => {
                assert_eq!(form.field("data"), Some("testBody"));
                let file = form.file_part().unwrap();
                assert_eq!(file.field, "file");
                assert_eq!(file.file_name, "name");
                assert_eq!(file.data, b"testtesttest");
            }
            other => panic!("expected multipart body, got {other:?}"),
        }

        let err = c
            .submit_multipart("testBody", "http://testURL.net", None)
            .unwrap_err();
        assert_eq!(err.status(), Some(550));
    }

    #[test]
    fn test_request_known_json() {
        #[derive(Debug, serde::Deserialize)]
        struct Progress {
            #[serde(rename = "percentComplete")]
            percent_complete: u32,
        }

        let t = Arc::new(ScriptedTransport::json_bodies([
            r#"{"percentComplete":0}"#,
            "XXXXX",
        ]));
        let c = client(&t);
        let ok = c
            .request_known_json::<Progress>("GET", "", "http://testURL.net")
            .unwrap();
        assert_eq!(ok.value.percent_complete, 0);

        let err = c
            .request_known_json::<Progress>("GET", "", "http://testURL.net")
            .unwrap_err();
        assert!(matches!(err, Error::DecodeFailed { ref raw, .. } if raw == b"XXXXX"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let t = Arc::new(ScriptedTransport::new(Vec::<HttpResponse>::new()));
        let s = format!("{:?}", client(&t));
        assert!(s.contains("http://gw"));
        assert!(!s.contains("testAuthKey"));
    }
}
