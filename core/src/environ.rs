//! Per-call context handed to the application.
//!
//! # Design
//! Keys follow the CGI naming the synchronous web calling conventions share:
//! `REQUEST_METHOD`, `PATH_INFO`, `QUERY_STRING`, `SERVER_NAME`, and one
//! `HTTP_*` entry per request header. The harness turns `HTTP_*` entries into
//! real request headers and stores the whole map in the request extensions,
//! so handlers can read it back with `Extension<Environ>`.

use std::collections::BTreeMap;

use url::Url;

/// Reserved entry identifying the host the request was addressed to.
pub const HTTP_HOST: &str = "HTTP_HOST";

pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";

const HEADER_PREFIX: &str = "HTTP_";

/// Ordered string map of call-context entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ(BTreeMap<String, String>);

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Sets `key`, replacing any earlier value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Overlays every entry of `other` on top of this map.
    pub fn merge(&mut self, other: &Environ) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Base environment for a request to `url`.
    ///
    /// `HTTP_HOST` always carries the port here, default or not, the way a
    /// test request built straight from a URL does. The adapter overrides it
    /// with the value a real client would have sent.
    pub fn from_url(method: &str, url: &Url) -> Self {
        let scheme = url.scheme();
        let server_name = url.host_str().unwrap_or("localhost").to_string();
        let port = url
            .port_or_known_default()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "80".to_string());

        let mut environ = Self::new();
        environ.insert("REQUEST_METHOD", method);
        environ.insert("SCRIPT_NAME", "");
        environ.insert("PATH_INFO", url.path());
        environ.insert("QUERY_STRING", url.query().unwrap_or(""));
        environ.insert(HTTP_HOST, format!("{server_name}:{port}"));
        environ.insert("SERVER_NAME", server_name);
        environ.insert("SERVER_PORT", port);
        environ.insert("SERVER_PROTOCOL", "HTTP/1.1");
        environ.insert("URL_SCHEME", scheme);
        if scheme == "https" {
            environ.insert("HTTPS", "on");
        }
        environ
    }

    /// Header name/value pairs carried by this environment.
    pub fn headers(&self) -> impl Iterator<Item = (String, &str)> {
        self.0.iter().filter_map(|(key, value)| {
            let name = match key.as_str() {
                CONTENT_TYPE => "content-type".to_string(),
                CONTENT_LENGTH => "content-length".to_string(),
                key => key
                    .strip_prefix(HEADER_PREFIX)?
                    .to_ascii_lowercase()
                    .replace('_', "-"),
            };
            Some((name, value.as_str()))
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environ {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Environ {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

/// The host a network client would announce for `url`: `host` for default
/// ports, `host:port` otherwise.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
