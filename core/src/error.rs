//! Error types for the in-process transport.
//!
//! # Design
//! HTTP error statuses coming back from the application are not errors here:
//! the adapter hands them back as ordinary responses. `UnexpectedStatus` only
//! appears when a `TestApp` is driven directly without `expect_errors`, and
//! `Status` only when the caller opts in through `error_for_status`.
//!
//! Panics raised by the application are never caught or wrapped; they unwind
//! to whoever called `send`.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the adapter, the harness and the session.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction arguments that cannot be combined.
    #[error("configuration error: {0}")]
    Config(String),

    /// The in-process call did not finish within the read timeout.
    #[error("in-process call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL parsed but could not be expressed as a request target.
    #[error("invalid request uri: {0}")]
    InvalidUri(String),

    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A 4xx/5xx status seen by a `TestApp` call made without `expect_errors`.
    #[error("bad response: {status} (not 2xx or 3xx) for {url}")]
    UnexpectedStatus { status: String, url: String },

    /// Raised by `IncomingResponse::error_for_status`.
    #[error("HTTP {status} {reason} for {url}")]
    Status {
        status: u16,
        reason: String,
        url: String,
    },

    /// The application broke the calling convention while lint was enabled.
    #[error("lint violation: {0}")]
    Lint(String),

    /// Reading the response body failed.
    #[error("body error: {0}")]
    Body(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No transport is mounted for the URL.
    #[error("no transport mounted for {0}")]
    NoTransport(String),

    /// The harness runtime or a worker thread could not be started.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("worker thread exited without producing a result")]
    WorkerLost,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
