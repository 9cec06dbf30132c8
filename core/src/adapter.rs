//! Transport that hands requests straight to an in-process application.
//!
//! # Design
//! The adapter owns a `TestApp`. Given a raw router it builds that harness
//! itself, forwarding any construction-time overrides; given an existing
//! harness it uses it as is, and overrides are rejected because they can only
//! be applied at wrap time.
//!
//! Each `send` derives the `Host` a network client would have announced,
//! picks the harness entry point for the method, runs the call under the read
//! timeout and converts the answer into an `IncomingResponse`. Error statuses
//! are ordinary responses.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use http::Method;
use url::Url;

use crate::environ::{self, Environ, HTTP_HOST};
use crate::error::{Error, Result};
use crate::harness::{Call, Delivery, TestApp, TestResponse};
use crate::http::{merge_headers, IncomingResponse, OutgoingRequest, SendOptions};
use crate::session::{Session, Transport};
use crate::timeout;

/// Prefix `Adapter::session` mounts the adapter at.
pub const DEFAULT_PREFIX: &str = "http://";

/// The application an adapter talks to.
#[derive(Debug)]
pub enum Target {
    /// A raw router; the adapter wraps it.
    App(Router),
    /// A harness somebody else already built.
    Harness(TestApp),
}

impl From<Router> for Target {
    fn from(router: Router) -> Self {
        Target::App(router)
    }
}

impl From<TestApp> for Target {
    fn from(app: TestApp) -> Self {
        Target::Harness(app)
    }
}

#[derive(Debug)]
pub struct AdapterBuilder {
    target: Target,
    extra_environ: Option<Environ>,
    lint: Option<bool>,
}

impl AdapterBuilder {
    /// Environment entries merged into every call. Only valid for raw apps.
    pub fn extra_environ(mut self, environ: impl Into<Environ>) -> Self {
        self.extra_environ = Some(environ.into());
        self
    }

    /// Strict validation of the application. Only valid for raw apps.
    pub fn lint(mut self, enabled: bool) -> Self {
        self.lint = Some(enabled);
        self
    }

    pub fn build(self) -> Result<Adapter> {
        let (app, streaming) = match self.target {
            Target::App(router) => {
                let mut builder = TestApp::builder(router);
                if let Some(environ) = self.extra_environ {
                    builder = builder.extra_environ(environ);
                }
                if let Some(lint) = self.lint {
                    builder = builder.lint(lint);
                }
                (builder.build()?, true)
            }
            Target::Harness(app) => {
                if self.extra_environ.is_some() || self.lint.is_some() {
                    return Err(Error::Config(
                        "cannot pass extra environ or lint settings together with an \
                         already-wrapped TestApp"
                            .to_string(),
                    ));
                }
                (app, false)
            }
        };

        Ok(Adapter {
            app,
            streaming,
            warned_stream: AtomicBool::new(false),
        })
    }
}

/// Harness entry point chosen for a request method.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatch {
    Get,
    Head,
    Delete,
    Options,
    Post,
    Put,
    Patch,
    Other(Method),
}

impl Dispatch {
    fn classify(method: &str) -> Result<Self> {
        Ok(match method {
            "GET" => Dispatch::Get,
            "HEAD" => Dispatch::Head,
            "DELETE" => Dispatch::Delete,
            "OPTIONS" => Dispatch::Options,
            "POST" => Dispatch::Post,
            "PUT" => Dispatch::Put,
            "PATCH" => Dispatch::Patch,
            other => Dispatch::Other(
                Method::from_bytes(other.as_bytes())
                    .map_err(|_| Error::InvalidMethod(other.to_string()))?,
            ),
        })
    }

    fn carries_body(&self) -> bool {
        matches!(self, Dispatch::Post | Dispatch::Put | Dispatch::Patch)
    }

    fn invoke(&self, app: &TestApp, call: Call) -> Result<TestResponse> {
        match self {
            Dispatch::Get => app.get(call),
            Dispatch::Head => app.head(call),
            Dispatch::Delete => app.delete(call),
            Dispatch::Options => app.options(call),
            Dispatch::Post => app.post(call),
            Dispatch::Put => app.put(call),
            Dispatch::Patch => app.patch(call),
            Dispatch::Other(method) => app.request(method.as_str(), call),
        }
    }
}

/// In-process transport.
#[derive(Debug)]
pub struct Adapter {
    app: TestApp,
    /// True when the adapter built the harness and can deliver bodies lazily.
    streaming: bool,
    warned_stream: AtomicBool,
}

impl Adapter {
    pub fn new(target: impl Into<Target>) -> Result<Self> {
        Self::builder(target).build()
    }

    pub fn builder(target: impl Into<Target>) -> AdapterBuilder {
        AdapterBuilder {
            target: target.into(),
            extra_environ: None,
            lint: None,
        }
    }

    pub fn app(&self) -> &TestApp {
        &self.app
    }

    /// A session with this adapter mounted at `DEFAULT_PREFIX`.
    pub fn session(self) -> Session {
        self.session_at(DEFAULT_PREFIX)
    }

    pub fn session_at(self, prefix: impl Into<String>) -> Session {
        let mut session = Session::new();
        session.mount(prefix, self);
        session
    }

    pub fn send(&self, request: &OutgoingRequest, options: &SendOptions) -> Result<IncomingResponse> {
        let url = Url::parse(&request.url)?;

        // A network client announces host[:port]; leave an explicit override alone.
        let mut environ = Environ::new();
        if !self.app.extra_environ().contains(HTTP_HOST) {
            environ.insert(HTTP_HOST, environ::host_header(&url));
        }

        let dispatch = Dispatch::classify(&request.method)?;
        let mut call = Call::new(request.url.clone())
            .extra_environ(environ)
            .expect_errors(true)
            .delivery(self.delivery(options.stream));
        call.headers = request.headers.clone();
        if dispatch.carries_body() {
            call.body = request.body.clone();
        }

        tracing::debug!(method = %request.method, url = %request.url, ?dispatch, "sending in-process request");
        let app = self.app.clone();
        let read_timeout = options.timeout.map(|timeout| timeout.read());
        let response = timeout::invoke(read_timeout, move || dispatch.invoke(&app, call))?;

        Ok(translate(response, request))
    }

    fn delivery(&self, stream: bool) -> Delivery {
        if !stream {
            return Delivery::Buffered;
        }
        if self.streaming {
            return Delivery::Streaming;
        }
        if !self.warned_stream.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "streaming requested through an already-wrapped TestApp; \
                 the body is buffered before it is returned"
            );
        }
        Delivery::Buffered
    }
}

impl Transport for Adapter {
    fn send(&self, request: &OutgoingRequest, options: &SendOptions) -> Result<IncomingResponse> {
        Adapter::send(self, request, options)
    }
}

/// Everything after the first space of a status line.
pub fn reason_phrase(status_line: &str) -> &str {
    status_line.split_once(' ').map_or("", |(_, reason)| reason)
}

fn translate(response: TestResponse, request: &OutgoingRequest) -> IncomingResponse {
    IncomingResponse {
        status: response.status_code,
        reason: reason_phrase(&response.status).to_string(),
        url: request.url.clone(),
        headers: merge_headers(response.headers),
        request: request.clone(),
        body: response.body,
    }
}
