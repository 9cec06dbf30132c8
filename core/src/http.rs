//! Request and response values exchanged with the client session.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data, the same
//! shape a network client would use, so code written against a `Session`
//! does not care whether a socket is involved. All fields use owned types
//! and are created fresh for every call.
//!
//! A response body is either fully materialised or a `BodyStream` that pulls
//! frames out of the application one at a time, in the order they were
//! produced.

use std::{
    fmt, io,
    sync::Arc,
    time::Duration,
};

use axum::body::Body as AppBody;
use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};

/// Client-side timeout for one call.
///
/// Only the read half of a split timeout bounds the in-process call; there is
/// no connection to establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Total(Duration),
    Split { connect: Duration, read: Duration },
}

impl Timeout {
    pub fn read(&self) -> Duration {
        match *self {
            Timeout::Total(total) => total,
            Timeout::Split { read, .. } => read,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(total: Duration) -> Self {
        Timeout::Total(total)
    }
}

impl From<(Duration, Duration)> for Timeout {
    fn from((connect, read): (Duration, Duration)) -> Self {
        Timeout::Split { connect, read }
    }
}

/// Per-call transport options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub stream: bool,
    pub timeout: Option<Timeout>,
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug)]
pub struct IncomingResponse {
    pub status: u16,
    pub reason: String,
    pub url: String,
    /// One entry per header name; repeated headers are joined with `", "`.
    pub headers: Vec<(String, String)>,
    /// The request that produced this response.
    pub request: OutgoingRequest,
    pub body: Body,
}

impl IncomingResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.header("location").is_some()
    }

    /// Turns a 4xx/5xx response into `Error::Status`.
    pub fn error_for_status(self) -> Result<Self> {
        if (400..600).contains(&self.status) {
            return Err(Error::Status {
                status: self.status,
                reason: self.reason,
                url: self.url,
            });
        }
        Ok(self)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Streaming(_))
    }

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

/// Response content, buffered or still being produced.
pub enum Body {
    Buffered(Bytes),
    Streaming(BodyStream),
}

impl Body {
    /// Reads everything that is left.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Streaming(stream) => stream.collect_bytes(),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Lazily drained application body.
///
/// Every `next` blocks on the harness runtime until the application yields
/// its next data frame. Dropping the stream drops the application body.
pub struct BodyStream {
    body: AppBody,
    runtime: Arc<Runtime>,
    /// Set when the response must not carry content; any data frame is a
    /// lint violation.
    forbid_content: Option<String>,
    pending: Bytes,
    done: bool,
}

impl BodyStream {
    pub(crate) fn new(body: AppBody, runtime: Arc<Runtime>, forbid_content: Option<String>) -> Self {
        Self {
            body,
            runtime,
            forbid_content,
            pending: Bytes::new(),
            done: false,
        }
    }

    fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        if self.done {
            return None;
        }
        loop {
            let frame = match self.runtime.block_on(self.body.frame()) {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(Error::Body(e.to_string())));
                }
                Some(Ok(frame)) => frame,
            };
            // Trailers carry no content.
            let Ok(data) = frame.into_data() else { continue };
            if data.is_empty() {
                continue;
            }
            if let Some(reason) = &self.forbid_content {
                self.done = true;
                return Some(Err(Error::Lint(format!("{reason} must not return content"))));
            }
            return Some(Ok(data));
        }
    }

    pub fn collect_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        for chunk in &mut self {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Iterator for BodyStream {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.pending.is_empty() {
            return Some(Ok(std::mem::take(&mut self.pending)));
        }
        self.next_chunk()
    }
}

impl io::Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.next_chunk() {
                None => return Ok(0),
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

/// Collapses repeated header names into one comma-joined value, keeping the
/// first spelling of each name and the order names first appeared in.
pub fn merge_headers<I, K, V>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());
        match merged.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => merged.push((name.to_string(), value.to_string())),
        }
    }
    merged
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
