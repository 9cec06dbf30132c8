//! Deadline emulation for blocking in-process calls.
//!
//! # Design
//! The application call cannot be cancelled mid-flight, so a deadline is
//! enforced by running it on a worker thread and waiting on a single-slot
//! `oneshot` channel. When the deadline passes the caller drops its receiver
//! and returns `Error::Timeout`; the worker keeps running, and when it
//! finishes its `send` fails and the result (including any open body stream)
//! is dropped on the worker thread.

use std::{panic, thread, time::Duration};

use oneshot::RecvTimeoutError;

use crate::error::{Error, Result};

/// Runs `operation`, giving up after `timeout`.
///
/// With no timeout (or a zero one) the operation runs on the calling thread.
/// A panic inside the operation is resumed on the calling thread with its
/// original payload.
pub fn invoke<T, F>(timeout: Option<Duration>, operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
        return operation();
    };

    let (tx, rx) = oneshot::channel();
    let worker = thread::Builder::new()
        .name("inproc-call".to_string())
        .spawn(move || {
            if tx.send(operation()).is_err() {
                tracing::debug!("caller stopped waiting; discarding late result");
            }
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            drop(rx);
            tracing::warn!(?timeout, "in-process call exceeded its read timeout");
            Err(Error::Timeout(timeout))
        }
        // The sender only goes away unsent when the operation panicked.
        Err(RecvTimeoutError::Disconnected) => match worker.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => Err(Error::WorkerLost),
        },
    }
}
