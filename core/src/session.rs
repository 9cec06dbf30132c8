//! Minimal blocking client session with per-prefix transports.
//!
//! A `Session` knows nothing about sockets: every request is handed to the
//! `Transport` mounted at the longest prefix of its URL. Redirects are not
//! followed and no cookies are kept.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use url::{form_urlencoded, Url};

use crate::error::{Error, Result};
use crate::http::{find_header, IncomingResponse, OutgoingRequest, SendOptions, Timeout};

/// Something that can answer an `OutgoingRequest`.
pub trait Transport: Send + Sync {
    fn send(&self, request: &OutgoingRequest, options: &SendOptions) -> Result<IncomingResponse>;
}

const USER_AGENT: &str = concat!("inproc-http/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct Session {
    /// Kept sorted longest prefix first.
    transports: Vec<(String, Arc<dyn Transport>)>,
    headers: Vec<(String, String)>,
    timeout: Option<Timeout>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefixes: Vec<&str> = self.transports.iter().map(|(p, _)| p.as_str()).collect();
        f.debug_struct("Session")
            .field("prefixes", &prefixes)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            headers: vec![
                ("User-Agent".to_string(), USER_AGENT.to_string()),
                ("Accept".to_string(), "*/*".to_string()),
            ],
            timeout: None,
        }
    }

    /// Routes every URL starting with `prefix` to `transport`, replacing a
    /// transport already mounted at the same prefix.
    pub fn mount(&mut self, prefix: impl Into<String>, transport: impl Transport + 'static) {
        let prefix = prefix.into();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        self.transports.retain(|(existing, _)| *existing != prefix);
        self.transports.push((prefix, transport));
        self.transports.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
    }

    /// Transport for `url`, matching prefixes case-insensitively.
    pub fn transport_for(&self, url: &str) -> Result<&Arc<dyn Transport>> {
        let lowered = url.to_ascii_lowercase();
        self.transports
            .iter()
            .find(|(prefix, _)| lowered.starts_with(&prefix.to_ascii_lowercase()))
            .map(|(_, transport)| transport)
            .ok_or_else(|| Error::NoTransport(url.to_string()))
    }

    /// Sets a header sent with every request unless the request sets it too.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn set_timeout(&mut self, timeout: impl Into<Timeout>) {
        self.timeout = Some(timeout.into());
    }

    pub fn request(&self, method: &str, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            session: self,
            request: OutgoingRequest::new(method.to_ascii_uppercase(), url),
            options: SendOptions {
                stream: false,
                timeout: self.timeout,
            },
            error: None,
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        self.request("GET", url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder<'_> {
        self.request("HEAD", url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder<'_> {
        self.request("DELETE", url)
    }

    pub fn options(&self, url: &str) -> RequestBuilder<'_> {
        self.request("OPTIONS", url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        self.request("POST", url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder<'_> {
        self.request("PUT", url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder<'_> {
        self.request("PATCH", url)
    }

    /// Sends a fully prepared request through the matching transport.
    pub fn send(&self, request: &OutgoingRequest, options: &SendOptions) -> Result<IncomingResponse> {
        self.transport_for(&request.url)?.send(request, options)
    }

    fn prepare(&self, mut request: OutgoingRequest) -> OutgoingRequest {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| find_header(&request.headers, name).is_none())
            .cloned()
            .collect();
        headers.append(&mut request.headers);
        request.headers = headers;
        request
    }
}

/// Builder for one request; errors are reported by `send`.
#[must_use]
pub struct RequestBuilder<'a> {
    session: &'a Session,
    request: OutgoingRequest,
    options: SendOptions,
    error: Option<Error>,
}

impl RequestBuilder<'_> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    /// Appends query pairs to the URL.
    pub fn query<K: AsRef<str>, V: AsRef<str>>(mut self, pairs: &[(K, V)]) -> Self {
        match Url::parse(&self.request.url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
                self.request.url = url.into();
            }
            Err(e) => self.fail(e.into()),
        }
        self
    }

    /// Raw body, sent as is.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.set_default_content_type("application/json");
                self.request.body = Some(body.into());
            }
            Err(e) => self.fail(e.into()),
        }
        self
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn form<K: AsRef<str>, V: AsRef<str>>(mut self, pairs: &[(K, V)]) -> Self {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();
        self.set_default_content_type("application/x-www-form-urlencoded");
        self.request.body = Some(encoded.into());
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.options.timeout = Some(timeout.into());
        self
    }

    /// Ask for the body to be delivered as it is produced.
    pub fn stream(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }

    pub fn build(self) -> Result<OutgoingRequest> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.session.prepare(self.request)),
        }
    }

    pub fn send(self) -> Result<IncomingResponse> {
        let session = self.session;
        let options = self.options;
        let request = self.build()?;
        session.send(&request, &options)
    }

    fn set_default_content_type(&mut self, value: &str) {
        if self.request.header("content-type").is_none() {
            self.request
                .headers
                .push(("Content-Type".to_string(), value.to_string()));
        }
    }

    fn fail(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }
}
