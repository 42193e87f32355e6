use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Auth;
use crate::body::{BodyPayload, FilePart, prepare_body};
use crate::codec::{self, CodecSet};
use crate::cookie::{Cookie, fold_into_header, parse_set_cookie};
use crate::error::{Error, ErrorCode, TransportErrorKind, classify_transport_error_text};
use crate::proxy::{NoProxy, ProxySelector, validate_proxy_url};
use crate::redirect::{RedirectAttempt, RedirectPolicy, RedirectRecord, hop_headers};
use crate::retry::BackoffStrategy;
use crate::transport::RequestBody;
use crate::util::{normalize_host, overlay_queries, substitute_path_params};

fn default_codecs() -> CodecSet {
    CodecSet::default()
}

#[test]
fn constant_backoff_ignores_attempt() {
    let strategy = BackoffStrategy::constant(Duration::from_millis(250));
    assert_eq!(strategy.delay(0), Duration::from_millis(250));
    assert_eq!(strategy.delay(7), Duration::from_millis(250));
}

#[test]
fn linear_backoff_scales_with_attempt() {
    let strategy = BackoffStrategy::linear(Duration::from_millis(100));
    assert_eq!(strategy.delay(0), Duration::from_millis(100));
    assert_eq!(strategy.delay(2), Duration::from_millis(300));
}

#[test]
fn exponential_backoff_caps() {
    let strategy = BackoffStrategy::exponential(
        Duration::from_millis(100),
        2.0,
        Duration::from_millis(450),
    );
    assert_eq!(strategy.delay(0), Duration::from_millis(100));
    assert_eq!(strategy.delay(1), Duration::from_millis(200));
    assert_eq!(strategy.delay(2), Duration::from_millis(400));
    assert_eq!(strategy.delay(3), Duration::from_millis(450));
    assert_eq!(strategy.delay(10), Duration::from_millis(450));
}

#[test]
fn jitter_backoff_stays_within_fraction_bounds() {
    let strategy = BackoffStrategy::jitter(BackoffStrategy::constant(Duration::from_secs(1)), 0.25);
    let low = Duration::from_millis(750);
    let high = Duration::from_millis(1250);
    for _ in 0..100 {
        let sampled = strategy.delay(0);
        assert!(sampled >= low && sampled <= high, "sampled {sampled:?}");
    }
}

#[test]
fn jitter_backoff_zero_fraction_is_exact() {
    let strategy = BackoffStrategy::jitter(BackoffStrategy::constant(Duration::from_secs(1)), 0.0);
    for _ in 0..100 {
        assert_eq!(strategy.delay(0), Duration::from_secs(1));
    }
}

#[test]
fn custom_backoff_uses_closure() {
    let strategy = BackoffStrategy::custom(|attempt| Duration::from_millis(attempt as u64));
    assert_eq!(strategy.delay(42), Duration::from_millis(42));
}

#[test]
fn no_proxy_wildcard_matches_everything() {
    let rules = NoProxy::parse("*");
    assert!(rules.matches("anything.example.com"));
    assert!(rules.matches("10.0.0.1"));
}

#[test]
fn no_proxy_domain_rules() {
    let rules = NoProxy::parse(".internal.com, 10.0.0.0/8");
    assert!(rules.matches("srv.internal.com"));
    assert!(rules.matches("SRV.INTERNAL.COM:8443"));
    assert!(rules.matches("10.1.2.3:443"));
    assert!(!rules.matches("internal.com"));
    assert!(!rules.matches("external.com"));
    assert!(!rules.matches("11.1.2.3"));
}

#[test]
fn no_proxy_bare_domain_matches_apex_and_subdomains() {
    let rules = NoProxy::parse("example.com");
    assert!(rules.matches("example.com"));
    assert!(rules.matches("api.example.com"));
    assert!(!rules.matches("notexample.com"));
}

#[test]
fn no_proxy_ip_and_cidr_rules() {
    let rules = NoProxy::parse("192.168.1.5, 172.16.0.0/12, fd00::/8");
    assert!(rules.matches("192.168.1.5"));
    assert!(!rules.matches("192.168.1.6"));
    assert!(rules.matches("172.17.3.4"));
    assert!(!rules.matches("172.32.0.1"));
    assert!(rules.matches("fd12:3456::1"));
    assert!(!rules.matches("fe80::1"));
}

#[test]
fn proxy_validation_rejects_unknown_scheme() {
    let error = validate_proxy_url("ftp://proxy.example.com").expect_err("scheme must be rejected");
    assert_eq!(error.code(), ErrorCode::UnsupportedProxyScheme);
    assert!(validate_proxy_url("socks5://proxy.example.com:1080").is_ok());
}

#[test]
fn proxy_rotation_rejects_empty_list() {
    let error = ProxySelector::round_robin(Vec::<String>::new()).expect_err("empty list");
    assert_eq!(error.code(), ErrorCode::NoProxies);
}

#[test]
fn round_robin_proxy_rotation_is_monotonic() {
    let selector = ProxySelector::round_robin(["http://p1:8080", "http://p2:8080"])
        .expect("valid proxies");
    let target = Url::parse("https://api.example.com/v1").expect("target url");
    let first = selector.select(&target).expect("select").expect("proxy");
    let second = selector.select(&target).expect("select").expect("proxy");
    let third = selector.select(&target).expect("select").expect("proxy");
    assert_eq!(first.as_str(), "http://p1:8080/");
    assert_eq!(second.as_str(), "http://p2:8080/");
    assert_eq!(third.as_str(), "http://p1:8080/");
}

#[test]
fn bypass_selector_goes_direct_for_matching_hosts() {
    let selector = ProxySelector::with_bypass("http://proxy:3128", ".internal.com")
        .expect("valid proxy");
    let bypassed = Url::parse("https://srv.internal.com/x").expect("url");
    let proxied = Url::parse("https://external.com/x").expect("url");
    assert!(selector.select(&bypassed).expect("select").is_none());
    assert!(selector.select(&proxied).expect("select").is_some());
}

#[test]
fn custom_selector_decides_per_request() {
    let selector = ProxySelector::custom(|target| {
        if target.path().starts_with("/direct") {
            Ok(None)
        } else {
            Ok(Some(Url::parse("http://proxy:3128").expect("proxy url")))
        }
    });
    let direct = Url::parse("https://api.example.com/direct").expect("url");
    let proxied = Url::parse("https://api.example.com/other").expect("url");
    assert!(selector.select(&direct).expect("select").is_none());
    assert!(selector.select(&proxied).expect("select").is_some());
}

fn record(method: http::Method, url: &str, headers: HeaderMap) -> RedirectRecord {
    RedirectRecord {
        method,
        url: Url::parse(url).expect("record url"),
        headers,
    }
}

fn attempt_for(status: u16, method: http::Method, url: &str, headers: HeaderMap) -> RedirectAttempt {
    RedirectAttempt {
        status: http::StatusCode::from_u16(status).expect("status"),
        method,
        url: Url::parse(url).expect("attempt url"),
        headers,
        drop_body: false,
    }
}

#[test]
fn prohibit_policy_rejects_all_redirects() {
    let policy = RedirectPolicy::prohibit();
    let mut attempt = attempt_for(302, http::Method::GET, "https://a.test/b", HeaderMap::new());
    let history = vec![record(http::Method::GET, "https://a.test/a", HeaderMap::new())];
    let error = policy.apply(&mut attempt, &history).expect_err("prohibited");
    assert_eq!(error.code(), ErrorCode::AutoRedirectDisabled);
}

#[test]
fn bounded_policy_enforces_cap() {
    let policy = RedirectPolicy::bounded(2);
    let history = vec![
        record(http::Method::GET, "https://a.test/1", HeaderMap::new()),
        record(http::Method::GET, "https://a.test/2", HeaderMap::new()),
    ];
    let mut attempt = attempt_for(301, http::Method::GET, "https://a.test/3", HeaderMap::new());
    let error = policy.apply(&mut attempt, &history).expect_err("over cap");
    assert_eq!(error.code(), ErrorCode::TooManyRedirects);
}

#[test]
fn domain_policy_is_case_insensitive_and_port_agnostic() {
    let policy = RedirectPolicy::domains(["Trusted.Test:8443"]);
    let history = vec![record(http::Method::GET, "https://a.test/a", HeaderMap::new())];

    let mut allowed = attempt_for(302, http::Method::GET, "https://trusted.test/b", HeaderMap::new());
    policy.apply(&mut allowed, &history).expect("allowed host");

    let mut rejected = attempt_for(302, http::Method::GET, "https://evil.test/b", HeaderMap::new());
    let error = policy.apply(&mut rejected, &history).expect_err("rejected");
    assert_eq!(error.code(), ErrorCode::RedirectNotAllowed);
}

#[test]
fn hop_headers_copies_on_same_host() {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
    headers.insert(COOKIE, HeaderValue::from_static("session=1"));
    headers.insert("x-trace", HeaderValue::from_static("abc"));

    let previous = record(http::Method::GET, "https://a.test/a", headers);
    let next = Url::parse("https://a.test/b").expect("next url");
    let copied = hop_headers(&previous, &next);
    assert_eq!(copied.get(AUTHORIZATION).map(|v| v.as_bytes()), Some(&b"Bearer secret"[..]));
    assert_eq!(copied.get("x-trace").map(|v| v.as_bytes()), Some(&b"abc"[..]));
}

#[test]
fn hop_headers_strips_sensitive_cross_host_and_on_downgrade() {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
    headers.insert(COOKIE, HeaderValue::from_static("session=1"));
    headers.insert("cookie2", HeaderValue::from_static("legacy"));
    headers.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
    headers.insert("www-authenticate", HeaderValue::from_static("Negotiate"));
    headers.insert("x-trace", HeaderValue::from_static("abc"));

    let previous = record(http::Method::GET, "https://a.test/a", headers.clone());
    let cross_host = Url::parse("https://b.test/b").expect("next url");
    let stripped = hop_headers(&previous, &cross_host);
    assert!(stripped.get(AUTHORIZATION).is_none());
    assert!(stripped.get(COOKIE).is_none());
    assert!(stripped.get("cookie2").is_none());
    assert!(stripped.get("proxy-authorization").is_none());
    assert!(stripped.get("www-authenticate").is_none());
    assert_eq!(stripped.get("x-trace").map(|v| v.as_bytes()), Some(&b"abc"[..]));

    let previous = record(http::Method::GET, "https://a.test/a", headers);
    let downgraded = Url::parse("http://a.test/b").expect("next url");
    let stripped = hop_headers(&previous, &downgraded);
    assert!(stripped.get(AUTHORIZATION).is_none());
}

#[test]
fn smart_policy_downgrades_post_on_302() {
    let policy = RedirectPolicy::smart(5);
    let history = vec![record(http::Method::POST, "https://a.test/a", HeaderMap::new())];
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("content-length", HeaderValue::from_static("42"));
    let mut attempt = attempt_for(302, http::Method::POST, "https://a.test/b", headers);

    policy.apply(&mut attempt, &history).expect("followed");
    assert_eq!(attempt.method, http::Method::GET);
    assert!(attempt.drop_body);
    assert!(attempt.headers.get(CONTENT_TYPE).is_none());
    assert!(attempt.headers.get("content-length").is_none());
}

#[test]
fn smart_policy_preserves_method_on_307() {
    let policy = RedirectPolicy::smart(5);
    let history = vec![record(http::Method::POST, "https://a.test/a", HeaderMap::new())];
    let mut attempt = attempt_for(307, http::Method::POST, "https://a.test/b", HeaderMap::new());
    policy.apply(&mut attempt, &history).expect("followed");
    assert_eq!(attempt.method, http::Method::POST);
    assert!(!attempt.drop_body);
}

#[test]
fn smart_policy_keeps_head_on_303() {
    let policy = RedirectPolicy::smart(5);
    let history = vec![record(http::Method::HEAD, "https://a.test/a", HeaderMap::new())];
    let mut attempt = attempt_for(303, http::Method::HEAD, "https://a.test/b", HeaderMap::new());
    policy.apply(&mut attempt, &history).expect("followed");
    assert_eq!(attempt.method, http::Method::HEAD);

    let history = vec![record(http::Method::PUT, "https://a.test/a", HeaderMap::new())];
    let mut attempt = attempt_for(303, http::Method::PUT, "https://a.test/b", HeaderMap::new());
    policy.apply(&mut attempt, &history).expect("followed");
    assert_eq!(attempt.method, http::Method::GET);
}

#[test]
fn path_params_substitute_and_escape() {
    let mut params = HashMap::new();
    params.insert("id".to_owned(), "my id/42".to_owned());
    let prepared = substitute_path_params("/users/{id}/posts/{slug}", &params);
    assert_eq!(prepared, "/users/my%20id%2F42/posts/{slug}");
}

#[test]
fn query_overlay_replaces_same_key_values() {
    let mut url = Url::parse("https://a.test/p?a=1&b=2").expect("url");
    overlay_queries(
        &mut url,
        &[
            ("a".to_owned(), "9".to_owned()),
            ("a".to_owned(), "10".to_owned()),
        ],
    );
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("b".to_owned(), "2".to_owned()),
            ("a".to_owned(), "9".to_owned()),
            ("a".to_owned(), "10".to_owned()),
        ]
    );
}

#[test]
fn host_normalization_strips_ports_and_lowercases() {
    assert_eq!(normalize_host("API.Example.COM:8443"), "api.example.com");
    assert_eq!(normalize_host("api.example.com"), "api.example.com");
    assert_eq!(normalize_host("[::1]:443"), "::1");
    assert_eq!(normalize_host("10.0.0.1:80"), "10.0.0.1");
}

#[test]
fn cookies_fold_in_order_after_existing_header() {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("a=1"));
    fold_into_header(
        &mut headers,
        &[Cookie::new("b", "2"), Cookie::new("c", "3")],
    );
    assert_eq!(
        headers.get(COOKIE).map(|v| v.as_bytes()),
        Some(&b"a=1; b=2; c=3"[..])
    );
}

#[test]
fn set_cookie_headers_parse_ignoring_attributes() {
    let mut headers = HeaderMap::new();
    headers.append(
        "set-cookie",
        HeaderValue::from_static("session=abc; Path=/; HttpOnly"),
    );
    headers.append("set-cookie", HeaderValue::from_static("theme=dark"));
    let cookies = parse_set_cookie(&headers);
    assert_eq!(
        cookies,
        vec![Cookie::new("session", "abc"), Cookie::new("theme", "dark")]
    );
}

#[test]
fn basic_auth_sets_encoded_header() {
    let mut headers = HeaderMap::new();
    Auth::basic("user", "pass").apply(&mut headers);
    assert_eq!(
        headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
        Some(&b"Basic dXNlcjpwYXNz"[..])
    );
}

#[test]
fn bearer_and_custom_auth_set_headers() {
    let mut headers = HeaderMap::new();
    Auth::bearer("token-1").apply(&mut headers);
    assert_eq!(
        headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
        Some(&b"Bearer token-1"[..])
    );

    let mut headers = HeaderMap::new();
    Auth::custom("Signature keyId=1").apply(&mut headers);
    assert_eq!(
        headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
        Some(&b"Signature keyId=1"[..])
    );
}

#[test]
fn empty_auth_is_ignored() {
    let mut headers = HeaderMap::new();
    Auth::bearer("").apply(&mut headers);
    assert!(headers.get(AUTHORIZATION).is_none());
    assert!(!Auth::basic("", "pass").is_valid());
}

#[tokio::test]
async fn body_inference_prefers_shape() {
    let prepared = prepare_body(&[], Vec::new(), None, Some(BodyPayload::from("hello")), None, &default_codecs())
        .await
        .expect("text body");
    assert_eq!(prepared.content_type.as_deref(), Some("text/plain"));

    let prepared = prepare_body(
        &[],
        Vec::new(),
        None,
        Some(BodyPayload::from(serde_json::json!({"a": 1}))),
        None,
        &default_codecs(),
    )
    .await
    .expect("structured body");
    assert_eq!(prepared.content_type.as_deref(), Some("application/json"));
    match prepared.body {
        RequestBody::Bytes(bytes) => assert_eq!(&bytes[..], br#"{"a":1}"#),
        other => panic!("expected buffered body, got {other:?}"),
    }

    let prepared = prepare_body(
        &[],
        Vec::new(),
        None,
        Some(BodyPayload::from(vec![
            ("b".to_owned(), "2".to_owned()),
            ("a".to_owned(), "1".to_owned()),
        ])),
        None,
        &default_codecs(),
    )
    .await
    .expect("form body");
    assert_eq!(
        prepared.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    match prepared.body {
        RequestBody::Bytes(bytes) => assert_eq!(&bytes[..], b"b=2&a=1"),
        other => panic!("expected buffered body, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_content_type_wins_over_inference() {
    let prepared = prepare_body(
        &[],
        Vec::new(),
        None,
        Some(BodyPayload::from(serde_json::json!({"a": 1}))),
        Some("application/yaml"),
        &default_codecs(),
    )
    .await
    .expect("yaml body");
    assert_eq!(prepared.content_type.as_deref(), Some("application/yaml"));
    match prepared.body {
        RequestBody::Bytes(bytes) => {
            assert_eq!(String::from_utf8_lossy(&bytes), "a: 1\n");
        }
        other => panic!("expected buffered body, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_content_type_is_rejected() {
    let error = prepare_body(
        &[],
        Vec::new(),
        None,
        Some(BodyPayload::from(serde_json::json!({"a": 1}))),
        Some("application/msgpack"),
        &default_codecs(),
    )
    .await
    .expect_err("unsupported");
    assert_eq!(error.code(), ErrorCode::UnsupportedContentType);
}

#[tokio::test]
async fn fields_only_forms_are_urlencoded() {
    let fields = vec![("name".to_owned(), "demo?&".to_owned())];
    let prepared = prepare_body(&fields, Vec::new(), None, None, None, &default_codecs())
        .await
        .expect("urlencoded form");
    assert_eq!(
        prepared.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    match prepared.body {
        RequestBody::Bytes(bytes) => assert_eq!(&bytes[..], b"name=demo%3F%26"),
        other => panic!("expected buffered body, got {other:?}"),
    }
}

#[tokio::test]
async fn files_force_multipart_with_custom_boundary() {
    let fields = vec![("kind".to_owned(), "report".to_owned())];
    let files = vec![FilePart::new("file", "report.txt", "file-content")];
    let prepared = prepare_body(
        &fields,
        files,
        Some("test-boundary"),
        None,
        None,
        &default_codecs(),
    )
    .await
    .expect("multipart form");

    assert_eq!(
        prepared.content_type.as_deref(),
        Some("multipart/form-data; boundary=test-boundary")
    );
    let body = match prepared.body {
        RequestBody::Bytes(bytes) => bytes,
        other => panic!("expected buffered body, got {other:?}"),
    };
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("--test-boundary\r\n"));
    assert!(text.contains("Content-Disposition: form-data; name=\"kind\"\r\n\r\nreport"));
    assert!(text.contains("Content-Disposition: form-data; name=\"file\"; filename=\"report.txt\""));
    assert!(text.contains("file-content"));
    assert!(text.ends_with("--test-boundary--\r\n"));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

#[test]
fn json_codec_round_trips() {
    let codecs = default_codecs();
    let encoded = codecs.encode_json(&Point { x: 1, y: -2 }).expect("encode");
    let decoded: Point = codecs.decode_json(&encoded).expect("decode");
    assert_eq!(decoded, Point { x: 1, y: -2 });
}

#[test]
fn yaml_codec_round_trips() {
    let codecs = default_codecs();
    let encoded = codecs.encode_yaml(&Point { x: 3, y: 4 }).expect("encode");
    let decoded: Point = codecs.decode_yaml(&encoded).expect("decode");
    assert_eq!(decoded, Point { x: 3, y: 4 });
}

#[test]
fn xml_codec_round_trips() {
    let encoded = codec::encode_xml(&Point { x: 5, y: 6 }).expect("encode");
    assert_eq!(
        String::from_utf8_lossy(&encoded),
        "<Point><x>5</x><y>6</y></Point>"
    );
    let decoded: Point = codec::decode_xml(&encoded).expect("decode");
    assert_eq!(decoded, Point { x: 5, y: 6 });
}

#[test]
fn json_marshal_override_is_used() {
    let mut codecs = default_codecs();
    codecs.with_json_marshal(Arc::new(|_| Ok(b"CUSTOM".to_vec())));
    let encoded = codecs.encode_json(&Point { x: 0, y: 0 }).expect("encode");
    assert_eq!(&encoded[..], b"CUSTOM");
}

#[test]
fn error_codes_are_stable() {
    assert_eq!(Error::NoProxies.code(), ErrorCode::NoProxies);
    assert_eq!(ErrorCode::NoProxies.as_str(), "no_proxies");
    assert_eq!(Error::AutoRedirectDisabled.code().as_str(), "auto_redirect_disabled");
}

#[test]
fn timeout_classification_chases_wrapped_layers() {
    let timeout = Error::Timeout {
        timeout_ms: 100,
        method: http::Method::GET,
        url: "https://a.test/x".to_owned(),
    };
    assert!(timeout.is_timeout());
    assert!(!timeout.is_connection_error());

    let annotated = Error::Attempt {
        attempt: 1,
        total: 2,
        source: Box::new(timeout),
    };
    assert!(annotated.is_timeout());

    let joined = Error::Multiple(vec![Error::NoProxies, annotated]);
    assert!(joined.is_timeout());
}

#[test]
fn connection_error_classification() {
    let connect = Error::Transport {
        kind: TransportErrorKind::Connect,
        method: http::Method::GET,
        url: "https://a.test/x".to_owned(),
        source: "connection refused".into(),
    };
    assert!(connect.is_connection_error());
    assert!(!connect.is_timeout());

    let read = Error::Transport {
        kind: TransportErrorKind::Read,
        method: http::Method::GET,
        url: "https://a.test/x".to_owned(),
        source: "connection reset".into(),
    };
    assert!(!read.is_connection_error());
}

#[test]
fn transport_error_text_classifier() {
    assert_eq!(
        classify_transport_error_text("dns lookup failed for host"),
        TransportErrorKind::Dns
    );
    assert_eq!(
        classify_transport_error_text("tls handshake eof"),
        TransportErrorKind::Tls
    );
    assert_eq!(
        classify_transport_error_text("tcp connect error: connection refused"),
        TransportErrorKind::Connect
    );
    assert_eq!(
        classify_transport_error_text("connection reset by peer"),
        TransportErrorKind::Read
    );
    assert_eq!(
        classify_transport_error_text("operation was weird"),
        TransportErrorKind::Other
    );
}

#[test]
fn attempt_annotation_renders_in_message() {
    let error = Error::Attempt {
        attempt: 2,
        total: 3,
        source: Box::new(Error::NoProxies),
    };
    assert_eq!(error.to_string(), "attempt 2/3: no proxy URLs provided");

    let joined = Error::Multiple(vec![
        Error::AutoRedirectDisabled,
        Error::NoProxies,
    ]);
    assert_eq!(
        joined.to_string(),
        "auto redirect disabled; no proxy URLs provided"
    );
}

#[test]
fn pool_reuses_buffers_and_copies_out() {
    let mut buffer = crate::pool::get();
    buffer.extend_from_slice(b"pooled-bytes");
    let owned = crate::pool::copy_out(buffer);
    assert_eq!(&owned[..], b"pooled-bytes");

    let reused = crate::pool::get();
    assert!(reused.is_empty());
    crate::pool::put(reused);
}

#[test]
fn request_body_take_for_attempt_clones_bytes() {
    let mut body = RequestBody::Bytes(Bytes::from_static(b"payload"));
    for _ in 0..3 {
        match body.take_for_attempt() {
            RequestBody::Bytes(bytes) => assert_eq!(&bytes[..], b"payload"),
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    let stream = crate::transport::buffered_stream(Bytes::from_static(b"once"));
    let mut body = RequestBody::Stream(stream);
    assert!(matches!(body.take_for_attempt(), RequestBody::Stream(_)));
    assert!(matches!(body.take_for_attempt(), RequestBody::Empty));
}

#[test]
fn builder_clone_isolates_accumulated_state() {
    let client = crate::Client::url("https://api.example.com").expect("client");
    let original = client
        .get("/items/{id}")
        .path_param("id", "1")
        .query("page", "1")
        .cookie("session", "abc")
        .form_field("k", "v")
        .try_header("x-trace", "t1")
        .expect("header");

    let clone = original
        .clone()
        .path_param("id", "2")
        .query("page", "2")
        .cookie("session", "xyz")
        .form_field("k2", "v2")
        .del_cookie(["session"]);

    assert_eq!(original.path_params.get("id").map(String::as_str), Some("1"));
    assert_eq!(clone.path_params.get("id").map(String::as_str), Some("2"));
    assert_eq!(original.queries, vec![("page".to_owned(), "1".to_owned())]);
    assert_eq!(
        clone.queries,
        vec![("page".to_owned(), "1".to_owned()), ("page".to_owned(), "2".to_owned())]
    );
    assert_eq!(original.cookies.len(), 1);
    assert!(clone.cookies.is_empty());
    assert_eq!(original.form_fields.len(), 1);
    assert_eq!(clone.form_fields.len(), 2);
    assert!(original.headers.contains_key("x-trace"));
    assert!(clone.headers.contains_key("x-trace"));
}

#[test]
fn builder_clone_leaves_one_shot_state_behind() {
    let client = crate::Client::url("https://api.example.com").expect("client");
    let original = client
        .post("/upload")
        .file("f", "a.txt", "data")
        .raw_body(Bytes::from_static(b"body"))
        .max_retries(7)
        .stream(Arc::new(|_| Ok(())));

    let clone = original.clone();
    assert!(original.body.is_some());
    assert!(clone.body.is_none());
    assert_eq!(original.form_files.len(), 1);
    assert!(clone.form_files.is_empty());
    assert_eq!(original.max_retries, Some(7));
    assert!(clone.max_retries.is_none());
    assert!(original.stream.is_some());
    assert!(clone.stream.is_none());
}
