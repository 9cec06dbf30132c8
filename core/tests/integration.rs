//! End-to-end tests through a `Session` with the adapter mounted.
//!
//! # Design
//! The mock server's router is driven in-process only; no port is opened.
//! Timing assertions use generous margins so they hold on a loaded machine.

use std::{
    io::{self, Read},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{extract::Extension, routing::get, Router};
use http::StatusCode;
use inproc_http::{
    Adapter, Body, Environ, Error, OutgoingRequest, SendOptions, Session, TestApp, HTTP_HOST,
};
use mock_server::{Echo, Headers};

fn session() -> Session {
    let mut session = Session::new();
    session.mount("http://", Adapter::new(mock_server::app()).unwrap());
    session.mount("https://", Adapter::new(mock_server::app()).unwrap());
    session
}

fn echo(session: &Session, url: &str) -> Echo {
    session.get(url).send().unwrap().error_for_status().unwrap().json().unwrap()
}

// --- urls and hosts ---

#[test]
fn requested_url_is_what_the_app_sees() {
    let session = session();
    for url in [
        "http://myapp.local/anything/hello.world",
        "http://myapp2.local/anything/hello.world?how=are+you",
        "http://myapp3.local:17180/anything/hello.world",
        "https://myapp4.local/anything/hello.world",
    ] {
        assert_eq!(echo(&session, url).url, url);
    }
}

#[test]
fn derived_host_includes_only_non_default_ports() {
    let session = session();
    let host = |url: &str| -> String {
        let headers: Headers = session.get(url).send().unwrap().json().unwrap();
        headers.headers["host"].clone()
    };
    assert_eq!(host("http://myapp.local/headers"), "myapp.local");
    assert_eq!(host("http://myapp.local:80/headers"), "myapp.local");
    assert_eq!(host("https://myapp.local:443/headers"), "myapp.local");
    assert_eq!(host("http://myapp3.local:17180/headers"), "myapp3.local:17180");
}

#[test]
fn explicit_host_override_is_never_replaced() {
    let adapter = Adapter::builder(mock_server::app())
        .extra_environ([(HTTP_HOST, "override.local")])
        .build()
        .unwrap();
    let session = adapter.session();

    let echo = echo(&session, "http://myapp.local:8080/anything");
    assert_eq!(echo.headers["host"], "override.local");
    assert_eq!(echo.url, "http://override.local/anything");
}

#[test]
fn environment_overrides_reach_every_call() {
    let router = Router::new().route(
        "/remote",
        get(|Extension(environ): Extension<Environ>| async move {
            environ.get("REMOTE_ADDR").unwrap_or("missing").to_string()
        }),
    );
    let session = Adapter::builder(router)
        .extra_environ([("REMOTE_ADDR", "10.0.0.9")])
        .build()
        .unwrap()
        .session();

    for _ in 0..2 {
        let text = session.get("http://myapp.local/remote").send().unwrap().text().unwrap();
        assert_eq!(text, "10.0.0.9");
    }
}

// --- requests ---

#[test]
fn request_headers_are_forwarded() {
    let resp = session()
        .get("http://myapp.local/headers")
        .header("User-Agent", "me")
        .header("X-HeyBoy", "HeyGirl")
        .send()
        .unwrap();
    let headers: Headers = resp.error_for_status().unwrap().json().unwrap();
    assert_eq!(headers.headers["user-agent"], "me");
    assert_eq!(headers.headers["x-heyboy"], "HeyGirl");
}

#[test]
fn post_json() {
    let url = "http://myapp2.local/anything/hello.world?how=are+you";
    let echo: Echo = session().post(url).json(&[1, 3]).send().unwrap().json().unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.url, url);
    assert_eq!(echo.json, Some(serde_json::json!([1, 3])));
}

#[test]
fn post_form() {
    let url = "http://myapp2.local/anything/hello.world?how=are+you";
    let echo: Echo = session()
        .post(url)
        .form(&[("ab", "cd")])
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.url, url);
    assert_eq!(echo.form["ab"], "cd");
}

#[test]
fn raw_body_is_passed_unmodified() {
    let echo: Echo = session()
        .patch("http://myapp.local/anything")
        .header("Content-Type", "application/octet-stream")
        .body(&b"\x00raw\xffbytes"[..])
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "PATCH");
    assert_eq!(echo.data, String::from_utf8_lossy(b"\x00raw\xffbytes"));
}

#[test]
fn common_methods_reach_the_application() {
    let session = session();
    for method in ["GET", "DELETE", "OPTIONS", "POST", "PUT", "PATCH"] {
        let echo: Echo = session
            .request(method, "http://myapp.local/anything")
            .send()
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(echo.method, method);
    }

    let resp = session.head("http://myapp.local/anything").send().unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.bytes().unwrap().is_empty());
}

#[test]
fn unknown_methods_use_the_generic_entry_point() {
    let session = session();
    let echo: Echo = session
        .request("TRACE", "http://myapp.local/anything")
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "TRACE");

    // Only POST, PUT and PATCH carry a body into the application.
    let echo: Echo = session
        .request("PROPFIND", "http://myapp.local/anything")
        .body("dropped")
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "PROPFIND");
    assert!(echo.data.is_empty());
}

#[test]
fn invalid_method_is_reported() {
    let err = session()
        .request("NOT VALID", "http://myapp.local/anything")
        .send()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMethod(_)));
}

#[test]
fn malformed_url_is_a_parse_error() {
    let adapter = Adapter::new(mock_server::app()).unwrap();
    let request = OutgoingRequest::new("GET", "http://");
    let err = adapter.send(&request, &SendOptions::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}

#[test]
fn send_leaves_the_request_untouched() {
    let adapter = Adapter::new(mock_server::app()).unwrap();
    let mut request = OutgoingRequest::new("POST", "http://myapp.local:9000/anything");
    request.headers.push(("X-Trace".to_string(), "1".to_string()));
    request.body = Some("payload".into());
    let before = request.clone();

    let resp = adapter.send(&request, &SendOptions::default()).unwrap();
    assert_eq!(request, before);
    assert_eq!(request.header("host"), None);
    assert_eq!(resp.request, before);
    assert_eq!(resp.url, "http://myapp.local:9000/anything");

    // A second call derives its host afresh.
    let other = OutgoingRequest::new("GET", "http://elsewhere.local/anything");
    let echo: Echo = adapter.send(&other, &SendOptions::default()).unwrap().json().unwrap();
    assert_eq!(echo.headers["host"], "elsewhere.local");
}

// --- responses ---

#[test]
fn error_statuses_are_ordinary_responses() {
    let session = session();
    let resp = session.get("http://myapp.local/status/418").send().unwrap();
    assert_eq!(resp.status, 418);
    assert_eq!(resp.reason, "I'm a teapot");

    let resp = session.delete("http://myapp.local/status/503").send().unwrap();
    assert_eq!(resp.status, 503);
    assert!(matches!(
        resp.error_for_status(),
        Err(Error::Status { status: 503, .. })
    ));
}

#[test]
fn reason_phrase_may_contain_spaces() {
    let resp = session()
        .get("http://myapp.local/status/200?reason=Hi+There")
        .send()
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.reason, "Hi There");
}

#[test]
fn repeated_response_headers_are_merged() {
    let resp = session()
        .get("http://myapp.local/response-headers?X-Men=Xavier&X-Men=Cyclops")
        .send()
        .unwrap();
    assert_eq!(resp.header("X-Men"), Some("Xavier, Cyclops"));
    assert_eq!(
        resp.headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case("x-men")).count(),
        1
    );
}

#[test]
fn redirects_are_returned_not_followed() {
    let resp = session()
        .get("http://myapp.local/redirect-to")
        .query(&[("url", "http://myapp.local/headers"), ("status_code", "307")])
        .send()
        .unwrap();
    assert_eq!(resp.status, 307);
    assert!(resp.is_redirect());
    assert_eq!(resp.header("location"), Some("http://myapp.local/headers"));
}

// --- timeouts ---

#[test]
fn slow_call_without_timeout_completes() {
    let started = Instant::now();
    let resp = session().get("http://myapp.local/delay/0.5").send().unwrap();
    assert_eq!(resp.status, 200);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[test]
fn short_read_timeout_fails_early() {
    let started = Instant::now();
    let err = session()
        .get("http://myapp.local/delay/2")
        .timeout(Duration::from_millis(300))
        .send()
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn only_the_read_half_of_a_split_timeout_counts() {
    let session = session();
    let resp = session
        .get("http://myapp.local/delay/0.2")
        .timeout((Duration::from_millis(1), Duration::from_secs(5)))
        .send()
        .unwrap();
    assert_eq!(resp.status, 200);

    let err = session
        .get("http://myapp.local/delay/2")
        .timeout((Duration::from_secs(5), Duration::from_millis(200)))
        .send()
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[test]
fn generous_timeout_completes_normally() {
    let echo: Echo = session()
        .get("http://myapp.local/delay/0.2")
        .timeout(Duration::from_secs(5))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "GET");
}

#[test]
fn session_default_timeout_applies() {
    let mut session = session();
    session.set_timeout(Duration::from_millis(200));
    let err = session.get("http://myapp.local/delay/2").send().unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

// --- streaming ---

const DRIP: &str = "http://myapp.local/drip?numbytes=4&duration=1";

fn first_byte_and_rest(body: Body) -> (Duration, Vec<u8>) {
    let started = Instant::now();
    let Body::Streaming(mut stream) = body else {
        panic!("expected a streaming body");
    };
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).unwrap();
    let elapsed = started.elapsed();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    let mut all = first.to_vec();
    all.extend(rest);
    (elapsed, all)
}

#[test]
fn streamed_body_arrives_incrementally() {
    let started = Instant::now();
    let resp = session().get(DRIP).stream(true).send().unwrap();
    assert!(resp.is_streaming());
    let (first_after, body) = first_byte_and_rest(resp.body);
    assert!(first_after < Duration::from_millis(500), "first byte took {first_after:?}");
    assert_eq!(body, b"****");
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[test]
fn streamed_body_survives_the_timeout_worker() {
    let resp = session()
        .get(DRIP)
        .stream(true)
        .timeout(Duration::from_secs(5))
        .send()
        .unwrap();
    let (first_after, body) = first_byte_and_rest(resp.body);
    assert!(first_after < Duration::from_millis(500));
    assert_eq!(body, b"****");
}

#[test]
fn stream_iterator_yields_chunks_in_order() {
    let resp = session().get(DRIP).stream(true).send().unwrap();
    let Body::Streaming(stream) = resp.body else {
        panic!("expected a streaming body");
    };
    let chunks: Vec<_> = stream.map(Result::unwrap).collect();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| &c[..] == b"*"));
}

#[test]
fn buffered_body_waits_for_everything() {
    let started = Instant::now();
    let resp = session().get(DRIP).send().unwrap();
    assert!(!resp.is_streaming());
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(&resp.bytes().unwrap()[..], b"****");
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn streaming_through_a_prewrapped_harness_buffers_and_warns_once() {
    let harness = TestApp::new(mock_server::app()).unwrap();
    let session = Adapter::new(harness).unwrap().session();

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..2 {
            let resp = session
                .get("http://myapp.local/drip?numbytes=2&duration=0.1")
                .stream(true)
                .send()
                .unwrap();
            assert!(!resp.is_streaming());
            assert_eq!(&resp.bytes().unwrap()[..], b"**");
        }
    });

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert_eq!(logs.matches("already-wrapped TestApp").count(), 1, "{logs}");
}

// --- construction ---

#[test]
fn prewrapped_harness_rejects_overrides() {
    let harness = TestApp::new(mock_server::app()).unwrap();
    let err = Adapter::builder(harness)
        .extra_environ([("REMOTE_ADDR", "1.2.3.4")])
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let adapter = Adapter::builder(mock_server::app())
        .extra_environ([("REMOTE_ADDR", "1.2.3.4")])
        .build();
    assert!(adapter.is_ok());
}

#[test]
fn prewrapped_harness_keeps_its_own_overrides() {
    let harness = TestApp::builder(mock_server::app())
        .extra_environ([(HTTP_HOST, "harness.local")])
        .build()
        .unwrap();
    let session = Adapter::new(harness).unwrap().session();
    let echo = echo(&session, "http://myapp.local:1234/anything");
    assert_eq!(echo.headers["host"], "harness.local");
}

#[test]
fn lint_is_off_unless_requested() {
    let bare = || Router::new().route("/bare", get(|| async { StatusCode::OK }));

    let session = Adapter::new(bare()).unwrap().session();
    assert_eq!(session.get("http://myapp.local/bare").send().unwrap().status, 200);

    let session = Adapter::builder(bare()).lint(true).build().unwrap().session();
    let err = session.get("http://myapp.local/bare").send().unwrap_err();
    assert!(matches!(err, Error::Lint(_)));
}

#[test]
fn session_at_custom_prefix() {
    let session = Adapter::new(mock_server::app())
        .unwrap()
        .session_at("http://myapp.local/");
    assert!(session.get("http://myapp.local/anything").send().is_ok());
    let err = session.get("http://other.local/anything").send().unwrap_err();
    assert!(matches!(err, Error::NoTransport(_)));
}

// --- application faults ---

async fn explode() -> &'static str {
    panic!("handler exploded")
}

#[test]
#[should_panic(expected = "handler exploded")]
fn application_panics_propagate() {
    let session = Adapter::new(Router::new().route("/boom", get(explode)))
        .unwrap()
        .session();
    let _ = session.get("http://myapp.local/boom").send();
}

#[test]
#[should_panic(expected = "handler exploded")]
fn application_panics_propagate_through_the_worker() {
    let session = Adapter::new(Router::new().route("/boom", get(explode)))
        .unwrap()
        .session();
    let _ = session
        .get("http://myapp.local/boom")
        .timeout(Duration::from_secs(5))
        .send();
}
