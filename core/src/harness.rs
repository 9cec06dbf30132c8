//! Test harness around an in-process application.
//!
//! # Design
//! `TestApp` wraps an `axum::Router` and drives it with `Runtime::block_on`
//! on a runtime it owns, which turns the router into a plain blocking call.
//! It offers one entry point per common verb plus a generic `request` for
//! everything else, and builds the per-call `Environ` the way a test request
//! built straight from a URL would.
//!
//! The public entry points always buffer the response body. Only the adapter,
//! when it did the wrapping itself, asks for a lazily streamed body.

use std::{fmt, sync::Arc};

use axum::{body::Body as AppBody, Router};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use hyper::ext::ReasonPhrase;
use serde::de::DeserializeOwned;
use tokio::runtime::{self, Runtime};
use tower::ServiceExt;
use url::Url;

use crate::environ::{self, Environ};
use crate::error::{Error, Result};
use crate::http::{Body, BodyStream};
use crate::lint;

/// How the response body is handed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Delivery {
    #[default]
    Buffered,
    Streaming,
}

/// Arguments of one harness call.
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Merged over the harness's own overrides for this call only.
    pub extra_environ: Environ,
    pub body: Option<Bytes>,
    /// When false, a 4xx/5xx status is reported as `Error::UnexpectedStatus`.
    pub expect_errors: bool,
    pub(crate) delivery: Delivery,
}

impl Call {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            extra_environ: Environ::new(),
            body: None,
            expect_errors: false,
            delivery: Delivery::Buffered,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn extra_environ(mut self, environ: impl Into<Environ>) -> Self {
        self.extra_environ = environ.into();
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn expect_errors(mut self, expect: bool) -> Self {
        self.expect_errors = expect;
        self
    }

    pub(crate) fn delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    fn without_body(mut self) -> Self {
        self.body = None;
        self
    }
}

/// What the application answered.
#[derive(Debug)]
pub struct TestResponse {
    /// Status line, e.g. `"200 OK"`.
    pub status: String,
    pub status_code: u16,
    /// Headers in the order the application produced them.
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl TestResponse {
    pub fn bytes(self) -> Result<Bytes> {
        self.body.into_bytes()
    }

    pub fn text(self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes()?)?)
    }
}

pub struct TestAppBuilder {
    router: Router,
    extra_environ: Environ,
    lint: bool,
}

impl TestAppBuilder {
    /// Entries merged into the environment of every call.
    pub fn extra_environ(mut self, environ: impl Into<Environ>) -> Self {
        self.extra_environ = environ.into();
        self
    }

    /// Validate every call against the calling convention.
    pub fn lint(mut self, enabled: bool) -> Self {
        self.lint = enabled;
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("inproc-app")
            .enable_all()
            .build()?;
        Ok(TestApp {
            router: self.router,
            runtime: Arc::new(runtime),
            extra_environ: self.extra_environ,
            lint: self.lint,
        })
    }
}

/// Blocking handle on an in-process application.
#[derive(Clone)]
pub struct TestApp {
    router: Router,
    runtime: Arc<Runtime>,
    extra_environ: Environ,
    lint: bool,
}

impl fmt::Debug for TestApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestApp")
            .field("extra_environ", &self.extra_environ)
            .field("lint", &self.lint)
            .finish_non_exhaustive()
    }
}

impl TestApp {
    pub fn new(router: Router) -> Result<Self> {
        Self::builder(router).build()
    }

    pub fn builder(router: Router) -> TestAppBuilder {
        TestAppBuilder {
            router,
            extra_environ: Environ::new(),
            lint: false,
        }
    }

    pub fn extra_environ(&self) -> &Environ {
        &self.extra_environ
    }

    pub fn lint_enabled(&self) -> bool {
        self.lint
    }

    pub fn get(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::GET, call.without_body())
    }

    pub fn head(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::HEAD, call.without_body())
    }

    pub fn delete(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::DELETE, call.without_body())
    }

    pub fn options(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::OPTIONS, call.without_body())
    }

    pub fn post(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::POST, call)
    }

    pub fn put(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::PUT, call)
    }

    pub fn patch(&self, call: Call) -> Result<TestResponse> {
        self.run(Method::PATCH, call)
    }

    /// Generic entry point for any method, including ones without a named
    /// shortcut.
    pub fn request(&self, method: &str, call: Call) -> Result<TestResponse> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::InvalidMethod(method.to_string()))?;
        self.run(method, call)
    }

    fn run(&self, method: Method, call: Call) -> Result<TestResponse> {
        let url = call.url.clone();
        let expect_errors = call.expect_errors;
        let delivery = call.delivery;
        let request = self.build_request(&method, call)?;

        let response = self
            .runtime
            .block_on(self.router.clone().oneshot(request))
            .unwrap_or_else(|never| match never {});
        let (parts, body) = response.into_parts();

        let forbid_content = if self.lint {
            lint::check_response(&method, parts.status, &parts.headers)?
        } else {
            None
        };
        let status = status_line(parts.status, parts.extensions.get::<ReasonPhrase>());
        tracing::debug!(%method, %url, %status, "application answered");

        if !expect_errors && (parts.status.is_client_error() || parts.status.is_server_error()) {
            return Err(Error::UnexpectedStatus { status, url });
        }

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let stream = BodyStream::new(body, Arc::clone(&self.runtime), forbid_content);
        let body = match delivery {
            Delivery::Streaming => Body::Streaming(stream),
            Delivery::Buffered => Body::Buffered(stream.collect_bytes()?),
        };

        Ok(TestResponse {
            status,
            status_code: parts.status.as_u16(),
            headers,
            body,
        })
    }

    fn build_request(&self, method: &Method, call: Call) -> Result<Request<AppBody>> {
        let mut url = Url::parse(&call.url)?;
        url.set_fragment(None);

        let mut environ = Environ::from_url(method.as_str(), &url);
        environ.merge(&self.extra_environ);
        environ.merge(&call.extra_environ);
        if let Some(body) = &call.body {
            environ.insert(environ::CONTENT_LENGTH, body.len().to_string());
        }
        if self.lint {
            lint::check_environ(&environ)?;
        }

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::InvalidUri(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in environ.headers() {
            headers.insert(header_name(&name)?, header_value(value)?);
        }
        // Explicit headers win over anything the environment implies.
        for (name, _) in &call.headers {
            headers.remove(header_name(name)?);
        }
        for (name, value) in &call.headers {
            headers.append(header_name(name)?, header_value(value)?);
        }

        let mut request = Request::new(AppBody::from(call.body.unwrap_or_default()));
        *request.method_mut() = method.clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(environ);
        Ok(request)
    }
}

fn status_line(status: StatusCode, reason: Option<&ReasonPhrase>) -> String {
    let reason = match reason {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or("Unknown").to_string(),
    };
    format!("{} {}", status.as_u16(), reason)
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader(name.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(value.to_string()))
}
