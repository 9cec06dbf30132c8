//! Strict validation of the calling convention.
//!
//! Enabled per harness. Checks run on the environment before the call and on
//! the response head after it; the "no content" rule is enforced while the
//! body is read, so it also covers streamed bodies.

use http::{header, HeaderMap, Method, StatusCode};

use crate::environ::Environ;
use crate::error::{Error, Result};

pub fn check_environ(environ: &Environ) -> Result<()> {
    for key in ["HTTP_CONTENT_TYPE", "HTTP_CONTENT_LENGTH"] {
        if environ.contains(key) {
            let bare = key.trim_start_matches("HTTP_");
            return Err(Error::Lint(format!(
                "environ contains {key}, which should be {bare}"
            )));
        }
    }
    if environ.get("REQUEST_METHOD").map_or(true, str::is_empty) {
        return Err(Error::Lint("environ has no REQUEST_METHOD".to_string()));
    }
    if let Some(path) = environ.get("PATH_INFO") {
        if !path.is_empty() && !path.starts_with('/') {
            return Err(Error::Lint(format!(
                "PATH_INFO doesn't start with \"/\": {path:?}"
            )));
        }
    }
    Ok(())
}

/// Validates a response head. Returns a description of the response when it
/// must not carry content.
pub fn check_response(method: &Method, status: StatusCode, headers: &HeaderMap) -> Result<Option<String>> {
    if headers.keys().any(|name| name.as_str() == "status") {
        return Err(Error::Lint(
            "the Status header cannot be used; set the status code instead".to_string(),
        ));
    }

    let no_message_body = matches!(status.as_u16(), 204 | 304);
    let has_content_type = headers.contains_key(header::CONTENT_TYPE);
    if no_message_body && has_content_type {
        return Err(Error::Lint(format!(
            "Content-Type header found in a {} response, which must not return content",
            status.as_u16()
        )));
    }
    if !no_message_body && !status.is_informational() && !has_content_type {
        return Err(Error::Lint(format!(
            "no Content-Type header found in a {} response",
            status.as_u16()
        )));
    }

    if no_message_body {
        return Ok(Some(format!("a {} response", status.as_u16())));
    }
    if *method == Method::HEAD {
        return Ok(Some("a HEAD response".to_string()));
    }
    Ok(None)
}
