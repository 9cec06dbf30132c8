//! httpbin-style application used as the in-process target in tests.
//!
//! The router is plain axum, so the same `app()` can be driven in-process
//! (through `tower::ServiceExt::oneshot` or the `inproc-http` adapter) or
//! served over a real socket with `run`.

use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, RawQuery},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use hyper::ext::ReasonPhrase;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use url::form_urlencoded;
use uuid::Uuid;

/// Longest delay `/delay` and `/drip` will honour, in seconds.
pub const MAX_DELAY_SECS: f64 = 10.0;

const MAX_DRIP_BYTES: usize = 10 * 1024 * 1024;

/// Everything the application saw about a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub url: String,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub data: String,
    pub json: Option<serde_json::Value>,
    pub form: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Headers {
    pub headers: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct StatusParams {
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RedirectParams {
    url: String,
    status_code: Option<u16>,
}

#[derive(Deserialize)]
struct DripParams {
    #[serde(default = "default_numbytes")]
    numbytes: usize,
    #[serde(default = "default_duration")]
    duration: f64,
    #[serde(default)]
    delay: f64,
    #[serde(default = "default_code")]
    code: u16,
}

fn default_numbytes() -> usize {
    10
}

fn default_duration() -> f64 {
    2.0
}

fn default_code() -> u16 {
    200
}

pub fn app() -> Router {
    Router::new()
        .route("/anything", any(anything))
        .route("/anything/{*path}", any(anything))
        .route("/headers", get(headers))
        .route("/uuid", get(uuid))
        .route("/status/{code}", any(status))
        .route("/response-headers", any(response_headers))
        .route("/redirect-to", any(redirect_to))
        .route("/delay/{seconds}", any(delay))
        .route("/drip", get(drip))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app().layer(TraceLayer::new_for_http())).await
}

async fn anything(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    Json(echo(&method, &uri, &headers, &body))
}

async fn headers(headers: HeaderMap) -> Json<Headers> {
    Json(Headers {
        headers: header_map(&headers),
    })
}

async fn uuid() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "uuid": Uuid::new_v4() }))
}

async fn status(Path(code): Path<u16>, Query(params): Query<StatusParams>) -> Response {
    let Ok(status) = StatusCode::from_u16(code) else {
        return (StatusCode::BAD_REQUEST, "invalid status code").into_response();
    };
    // 204 and 304 must not describe content they cannot carry.
    let mut response = if matches!(code, 204 | 304) {
        Body::empty().into_response()
    } else {
        String::new().into_response()
    };
    *response.status_mut() = status;
    if let Some(reason) = params.reason {
        if let Ok(phrase) = ReasonPhrase::try_from(reason) {
            response.extensions_mut().insert(phrase);
        }
    }
    response
}

async fn response_headers(RawQuery(query): RawQuery) -> Response {
    let pairs: Vec<(String, String)> = query
        .as_deref()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut listed: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &pairs {
        listed.entry(name.clone()).or_default().push(value.clone());
    }

    let mut response = Json(listed).into_response();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            response.headers_mut().append(name, value);
        }
    }
    response
}

async fn redirect_to(Query(params): Query<RedirectParams>) -> Response {
    let status = params
        .status_code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .filter(StatusCode::is_redirection)
        .unwrap_or(StatusCode::FOUND);
    (status, [(header::LOCATION, params.url)], String::new()).into_response()
}

async fn delay(
    Path(seconds): Path<f64>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    tokio::time::sleep(seconds_to_duration(seconds)).await;
    Json(echo(&method, &uri, &headers, &body))
}

/// Streams `numbytes` asterisks spread evenly over `duration` seconds, after
/// an initial `delay`.
async fn drip(Query(params): Query<DripParams>) -> Response {
    let numbytes = params.numbytes.min(MAX_DRIP_BYTES);
    let initial = seconds_to_duration(params.delay);
    let pause = if numbytes == 0 {
        Duration::ZERO
    } else {
        seconds_to_duration(params.duration) / numbytes as u32
    };
    let status = StatusCode::from_u16(params.code).unwrap_or(StatusCode::OK);

    let stream = futures_util::stream::unfold(0usize, move |sent| async move {
        tokio::time::sleep(if sent == 0 { initial } else { pause }).await;
        if sent == numbytes {
            return None;
        }
        Some((Ok::<_, Infallible>(Bytes::from_static(b"*")), sent + 1))
    });

    axum::http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, numbytes)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn echo(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Echo {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let json = if content_type.starts_with("application/json") {
        serde_json::from_slice(body).ok()
    } else {
        None
    };
    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        parse_pairs(body)
    } else {
        BTreeMap::new()
    };
    let data = if form.is_empty() {
        String::from_utf8_lossy(body).into_owned()
    } else {
        String::new()
    };

    Echo {
        method: method.to_string(),
        url: request_url(uri, headers),
        args: uri.query().map(|q| parse_pairs(q.as_bytes())).unwrap_or_default(),
        headers: header_map(headers),
        data,
        json,
        form,
    }
}

/// Rebuilds the URL the client asked for. In-process calls carry an absolute
/// URI; requests read off a socket only carry the path, so the scheme falls
/// back to plain http.
fn request_url(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{scheme}://{host}{path}")
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

fn parse_pairs(input: &[u8]) -> BTreeMap<String, String> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.clamp(0.0, MAX_DELAY_SECS)).unwrap_or_default()
}
