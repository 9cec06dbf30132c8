//! In-process HTTP transport for tests.
//!
//! # Overview
//! Sends client requests straight into an `axum::Router` running in the same
//! process, so HTTP client code can be exercised without opening a port.
//!
//! # Design
//! - `Adapter` is a `Transport`: it translates an `OutgoingRequest` into a
//!   call on a `TestApp` harness and the answer back into an
//!   `IncomingResponse`. Error statuses are ordinary responses.
//! - `TestApp` turns the router into a blocking call with named verb entry
//!   points and a generic one for any other method.
//! - Read timeouts are emulated by running the call on a worker thread that
//!   is abandoned, not killed, when the deadline passes.
//! - `Session` mounts transports per URL prefix; `Adapter::session` builds one
//!   with the adapter already mounted.
//!
//! Everything here blocks. Call it from plain threads, not from inside an
//! async runtime.

pub mod adapter;
pub mod environ;
pub mod error;
pub mod harness;
pub mod http;
pub mod lint;
pub mod session;
pub mod timeout;

pub use adapter::{Adapter, AdapterBuilder, Target, DEFAULT_PREFIX};
pub use environ::{Environ, HTTP_HOST};
pub use error::{Error, Result};
pub use harness::{Call, TestApp, TestAppBuilder, TestResponse};
pub use self::http::{Body, BodyStream, IncomingResponse, OutgoingRequest, SendOptions, Timeout};
pub use session::{RequestBuilder, Session, Transport};
