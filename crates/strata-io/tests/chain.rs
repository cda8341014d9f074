use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use strata_io::{Client, ErrorKind, MetalinkMode, RequestParams};
use strata_transport::Method;
use strata_transport::fake::{FakeResponse, FakeServer, Fault};
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn client(server: &FakeServer, params: RequestParams) -> Client {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Client::with_factory(Arc::new(server.clone())).with_params(params)
}

fn no_metalink() -> RequestParams {
    RequestParams::default().metalink_mode(MetalinkMode::Disable)
}

const METALINK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metalink xmlns="urn:ietf:params:xml:ns:metalink">
  <file name="f">
    <url priority="1">http://dead.example/f</url>
    <url priority="2">http://alive.example/f</url>
  </file>
</metalink>"#;

fn advertise_metalink(server: &FakeServer, resource: &str) {
    server.route(
        Method::Head,
        resource,
        FakeResponse::new(200).header(
            "Link",
            r#"</f.meta4>; rel=describedby; type="application/metalink4+xml""#,
        ),
    );
    server.insert("http://h/f.meta4", METALINK);
}

#[test]
fn test_get_and_put() {
    let server = FakeServer::new();
    let client = client(&server, RequestParams::default());
    let target = url("http://h/dir/f");

    assert_eq!(client.put(&target, b"hello".to_vec()).unwrap(), 5);
    assert_eq!(server.get("http://h/dir/f").unwrap(), b"hello");
    assert_eq!(client.get(&target).unwrap(), b"hello");

    let info = client.stat(&target).unwrap();
    assert_eq!(info.size, 5);
    assert!(!info.is_dir());
    assert!(info.etag.is_some());
}

#[test]
fn test_retry_makes_max_plus_one_attempts() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(503), 10);
    let client = client(&server, no_metalink().max_retries(3));

    let err = client.get(&url("http://h/f")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidServerResponse);
    assert!(err.message().ends_with("after 4 attempts"), "{err}");
    assert_eq!(server.requests_to("http://h/f").len(), 4);
}

#[test]
fn test_retry_recovers() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"payload".to_vec());
    server.fail("http://h/f", Fault::Error(ErrorKind::ConnectionReset), 2);
    let client = client(&server, no_metalink());

    assert_eq!(client.get(&url("http://h/f")).unwrap(), b"payload");
    assert_eq!(server.requests_to("http://h/f").len(), 3);
}

#[test]
fn test_permission_denied_is_not_retried() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(403), 5);
    let client = client(&server, RequestParams::default());

    let err = client.stat(&url("http://h/f")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_canceled_before_first_attempt() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"x".to_vec());
    let flag = Arc::new(AtomicBool::new(true));
    let client = client(&server, RequestParams::default().cancel_flag(flag));

    let err = client.get(&url("http://h/f")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_operation_timeout_stops_retries() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(500), 100);
    let params = no_metalink()
        .max_retries(50)
        .retry_delay(Duration::from_millis(20))
        .operation_timeout(Duration::from_millis(50));
    let client = client(&server, params);

    let err = client.get(&url("http://h/f")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationTimeout);
    assert!(server.request_count() < 10);
}

#[test]
fn test_metalink_failover_reaches_live_replica() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(500), 3);
    advertise_metalink(&server, "http://h/f");
    server.insert("http://alive.example/f", b"from replica".to_vec());
    let client = client(&server, RequestParams::default());

    assert_eq!(client.get(&url("http://h/f")).unwrap(), b"from replica");
    // Each replica goes through the retry loop on its own.
    assert_eq!(server.requests_to("http://dead.example/f").len(), 3);
    assert_eq!(server.requests_to("http://alive.example/f").len(), 1);
}

#[test]
fn test_metalink_failover_returns_original_error() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(500), 3);
    advertise_metalink(&server, "http://h/f");
    let client = client(&server, RequestParams::default());

    let err = client.get(&url("http://h/f")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidServerResponse);
    assert!(err.message().contains("after 3 attempts"), "{err}");
}

#[test]
fn test_metalink_disabled_skips_discovery() {
    let server = FakeServer::new();
    server.fail("http://h/f", Fault::Status(500), 3);
    advertise_metalink(&server, "http://h/f");
    let client = client(&server, no_metalink());

    assert!(client.get(&url("http://h/f")).is_err());
    assert_eq!(server.requests_to("http://h/f.meta4").len(), 0);
}

#[test]
fn test_replicas_listing() {
    let server = FakeServer::new();
    advertise_metalink(&server, "http://h/f");
    let client = client(&server, RequestParams::default());

    let replicas = client.replicas(&url("http://h/f")).unwrap();
    assert_eq!(
        replicas,
        vec![url("http://dead.example/f"), url("http://alive.example/f")]
    );

    server.insert("http://h/plain", b"x".to_vec());
    let err = client.replicas(&url("http://h/plain")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationNotSupported);
    assert_eq!(err.message(), "Server does not support Metalink standard");
}

#[test]
fn test_redirect_is_followed_and_cached() {
    let server = FakeServer::new();
    server.redirect("http://h/f", "http://disk1.example/f", 302);
    server.insert("http://disk1.example/f", b"data".to_vec());
    let client = client(&server, RequestParams::default());
    let target = url("http://h/f");

    assert_eq!(client.get(&target).unwrap(), b"data");
    assert_eq!(client.get(&target).unwrap(), b"data");

    assert_eq!(server.requests_to("http://h/f").len(), 1);
    assert_eq!(server.requests_to("http://disk1.example/f").len(), 2);
    assert_eq!(client.context().redirect_cache().len(), 1);
}

#[test]
fn test_stale_cached_redirect_is_dropped() {
    let server = FakeServer::new();
    server.redirect("http://h/f", "http://disk1.example/f", 302);
    server.insert("http://disk1.example/f", b"old".to_vec());
    let client = client(&server, no_metalink());
    let target = url("http://h/f");
    client.get(&target).unwrap();

    // The head node now sends clients elsewhere; the cached disk is gone.
    server.redirect("http://h/f", "http://disk2.example/f", 302);
    server.fail("http://disk1.example/f", Fault::Status(404), 1);
    server.insert("http://disk2.example/f", b"new".to_vec());

    assert_eq!(client.get(&target).unwrap(), b"new");
    assert_eq!(server.requests_to("http://h/f").len(), 2);
}

#[test]
fn test_redirect_loop_is_bounded() {
    let server = FakeServer::new();
    server.redirect("http://h/a", "http://h/b", 307);
    server.redirect("http://h/b", "http://h/a", 307);
    let client = client(&server, no_metalink().max_redirects(4).redirect_caching(false));

    let err = client.stat(&url("http://h/a")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyRedirects);
}

#[test]
fn test_redirect_without_transparent_following() {
    let server = FakeServer::new();
    server.redirect("http://h/f", "http://disk1.example/f", 302);
    let client = client(&server, RequestParams::default().transparent_redirects(false));

    let err = client.get(&url("http://h/f")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RedirectionNeeded);
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_read_to_writer_fails_over_to_replica() {
    let server = FakeServer::new();
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    server.insert("http://alive.example/f", body.clone());
    server.fail("http://h/f", Fault::Error(ErrorKind::ConnectionReset), 3);
    advertise_metalink(&server, "http://h/f");
    let client = client(&server, RequestParams::default());

    let mut out = Vec::new();
    let written = client.get_to_writer(&url("http://h/f"), &mut out).unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(out, body);
}

#[test]
fn test_read_to_writer_resumes_after_cut_on_retry() {
    let server = FakeServer::new();
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    server.insert("http://h/f", body.clone());
    server.fail("http://h/f", Fault::CutAfter(4000), 1);
    let client = client(&server, no_metalink());

    let mut out = Vec::new();
    assert_eq!(client.get_to_writer(&url("http://h/f"), &mut out).unwrap(), 10_000);
    assert_eq!(out, body);

    let gets = server.requests_to("http://h/f");
    assert_eq!(gets.len(), 2);
    assert_eq!(gets[0].header("Range"), None);
    assert_eq!(gets[1].header("Range"), Some("bytes=4000-"));
}

#[test]
fn test_read_to_writer_resumes_on_replica() {
    let server = FakeServer::new();
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    server.insert("http://h/f", body.clone());
    server.insert("http://alive.example/f", body.clone());
    server.fail("http://h/f", Fault::CutAfter(4000), 1);
    server.fail("http://h/f", Fault::Error(ErrorKind::ConnectionReset), 2);
    advertise_metalink(&server, "http://h/f");
    let client = client(&server, RequestParams::default());

    let mut out = Vec::new();
    assert_eq!(client.get_to_writer(&url("http://h/f"), &mut out).unwrap(), 10_000);
    assert_eq!(out, body);

    let replica = server.requests_to("http://alive.example/f");
    assert_eq!(replica.len(), 1);
    assert_eq!(replica[0].header("Range"), Some("bytes=4000-"));
}

#[test]
fn test_read_to_writer_fresh_transfer_has_no_range() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"0123456789".to_vec());
    let client = client(&server, no_metalink());

    let mut out = Vec::new();
    assert_eq!(client.get_to_writer(&url("http://h/f"), &mut out).unwrap(), 10);
    assert_eq!(out, b"0123456789");
    assert_eq!(server.requests()[0].header("Range"), None);
}

#[test]
fn test_delete_and_move() {
    let server = FakeServer::new();
    server.insert("http://h/a", b"1".to_vec());
    let client = client(&server, no_metalink());

    client.rename(&url("dav://h/a"), &url("dav://h/b")).unwrap();
    assert!(!server.contains("http://h/a"));
    assert_eq!(server.get("http://h/b").unwrap(), b"1");
    let request = &server.requests_to("http://h/a")[0];
    assert_eq!(request.header("Destination"), Some("http://h/b"));
    assert_eq!(request.header("Overwrite"), Some("T"));

    client.delete(&url("http://h/b")).unwrap();
    assert!(!server.contains("http://h/b"));
    let err = client.delete(&url("http://h/b")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[test]
fn test_partial_delete_is_refused() {
    let server = FakeServer::new();
    server.route(Method::Delete, "http://h/dir/", FakeResponse::new(207));
    let client = client(&server, no_metalink());

    let err = client.delete(&url("http://h/dir/")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_checksum_from_digest_header() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"x".to_vec());
    server.set_header("http://h/f", "Digest", "adler32=03da0195");
    let client = client(&server, no_metalink());

    assert_eq!(client.checksum(&url("http://h/f"), "adler32").unwrap(), "03da0195");
    let want = server.requests()[0].header("Want-Digest").map(str::to_string);
    assert_eq!(want.as_deref(), Some("ADLER32"));

    let err = client.checksum(&url("http://h/f"), "md5").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationNotSupported);
}

#[test]
fn test_remote_file_read_and_seek() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"0123456789".to_vec());
    let client = client(&server, no_metalink());
    let mut file = client.open(&url("http://h/f"));

    let mut buf = [0u8; 4];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"0123");

    assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
    let mut rest = Vec::new();
    file.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"789");

    assert_eq!(file.seek(SeekFrom::Current(-5)).unwrap(), 5);
    assert!(file.seek(SeekFrom::Current(-10)).is_err());
    assert_eq!(file.position(), 5);
}

#[test]
fn test_remote_file_follows_rename() {
    let server = FakeServer::new();
    let client = client(&server, no_metalink());
    let mut file = client.open(&url("dav://h/old"));

    assert_eq!(file.put(b"payload".to_vec()).unwrap(), 7);
    file.move_to(&url("dav://h/new")).unwrap();
    assert_eq!(file.url().as_str(), "dav://h/new");
    assert_eq!(file.read_full().unwrap(), b"payload");

    let mut out = Vec::new();
    assert_eq!(file.read_to_writer(&mut out).unwrap(), 7);
    assert_eq!(out, b"payload");

    file.delete().unwrap();
    assert!(!server.contains("http://h/new"));
}

#[test]
fn test_custom_headers_are_sent() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"x".to_vec());
    let client = client(&server, no_metalink().header("Authorization", "Bearer t"));

    client.get(&url("http://h/f")).unwrap();
    assert_eq!(server.requests()[0].header("Authorization"), Some("Bearer t"));
}

#[test]
fn test_sessions_are_reused() {
    let server = FakeServer::new();
    server.insert("http://h/f", b"abc".to_vec());
    let client = client(&server, no_metalink());

    for _ in 0..5 {
        client.get(&url("http://h/f")).unwrap();
        client.stat(&url("http://h/f")).unwrap();
    }
    assert_eq!(server.sessions_created(), 1);
}
