use std::sync::Arc;

use proptest::prelude::*;
use strata_io::{Client, ErrorKind, IoVec, MetalinkMode, RequestParams, VecOptions};
use strata_transport::Method;
use strata_transport::fake::{FakeResponse, FakeServer, Fault, MultirangeBehavior};
use url::Url;

const FILE: &str = "http://h/data.bin";

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn no_merge() -> RequestParams {
    RequestParams::default()
        .metalink_mode(MetalinkMode::Disable)
        .vec_options(VecOptions {
            merge_window: 0,
            ..VecOptions::default()
        })
}

fn setup(len: usize, params: RequestParams) -> (FakeServer, Client, Vec<u8>) {
    let server = FakeServer::new();
    let data = pattern(len);
    server.insert(FILE, data.clone());
    let client = Client::with_factory(Arc::new(server.clone())).with_params(params);
    (server, client, data)
}

fn gets(server: &FakeServer) -> Vec<String> {
    server
        .requests_to(FILE)
        .iter()
        .filter(|r| r.method == Method::Get)
        .map(|r| r.header("Range").unwrap_or("").to_string())
        .collect()
}

#[test]
fn test_two_ranges_in_one_multipart_request() {
    let (server, client, data) = setup(10_000, no_merge());
    let mut a = vec![0u8; 100];
    let mut b = vec![0u8; 100];
    let mut slots = [IoVec::new(0, &mut a), IoVec::new(500, &mut b)];

    let total = client.pread_vec(&url(FILE), &mut slots).unwrap();

    assert_eq!(total, 200);
    assert_eq!(slots[0].data(), &data[0..100]);
    assert_eq!(slots[1].data(), &data[500..600]);
    assert_eq!(gets(&server), vec!["bytes=0-99,500-599".to_string()]);
}

#[test]
fn test_overlapping_slots_share_one_request() {
    let (server, client, data) = setup(1000, RequestParams::default());
    let mut a = vec![0u8; 100];
    let mut b = vec![0u8; 100];
    let mut slots = [IoVec::new(0, &mut a), IoVec::new(50, &mut b)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 200);
    assert_eq!(slots[0].data(), &data[0..100]);
    assert_eq!(slots[1].data(), &data[50..150]);
    assert_eq!(gets(&server), vec!["bytes=0-149".to_string()]);
}

#[test]
fn test_nearby_slots_are_merged() {
    let (server, client, data) = setup(10_000, RequestParams::default());
    let mut a = vec![0u8; 10];
    let mut b = vec![0u8; 10];
    let mut slots = [IoVec::new(100, &mut a), IoVec::new(1000, &mut b)];

    client.pread_vec(&url(FILE), &mut slots).unwrap();

    assert_eq!(slots[1].data(), &data[1000..1010]);
    assert_eq!(gets(&server), vec!["bytes=100-1009".to_string()]);
}

#[test]
fn test_whole_small_entity_is_sliced() {
    let (server, client, data) = setup(10_000, no_merge());
    server.set_multirange(MultirangeBehavior::Ignored);
    let mut a = vec![0u8; 10];
    let mut b = vec![0u8; 10];
    let mut c = vec![0u8; 10];
    let mut slots = [
        IoVec::new(0, &mut a),
        IoVec::new(4000, &mut b),
        IoVec::new(9990, &mut c),
    ];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 30);
    assert_eq!(slots[1].data(), &data[4000..4010]);
    assert_eq!(slots[2].data(), &data[9990..10_000]);
    assert_eq!(gets(&server).len(), 1);
}

#[test]
fn test_whole_large_entity_falls_back_to_single_ranges() {
    let (server, client, data) = setup(3 * 1024 * 1024, no_merge());
    server.set_multirange(MultirangeBehavior::Ignored);
    let mut a = vec![0u8; 100];
    let mut b = vec![0u8; 100];
    let mut slots = [IoVec::new(10, &mut a), IoVec::new(2_000_000, &mut b)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 200);
    assert_eq!(slots[0].data(), &data[10..110]);
    assert_eq!(slots[1].data(), &data[2_000_000..2_000_100]);

    let mut ranges = gets(&server);
    assert_eq!(ranges.remove(0), "bytes=10-109,2000000-2000099");
    ranges.sort();
    assert_eq!(ranges, vec!["bytes=10-109", "bytes=2000000-2000099"]);
}

#[test]
fn test_truncated_multipart_refetches_missing_ranges() {
    let (server, client, data) = setup(10_000, no_merge());
    server.set_multirange(MultirangeBehavior::Truncated);
    let mut a = vec![0u8; 100];
    let mut b = vec![0u8; 100];
    let mut slots = [IoVec::new(0, &mut a), IoVec::new(5000, &mut b)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 200);
    assert_eq!(slots[0].data(), &data[0..100]);
    assert_eq!(slots[1].data(), &data[5000..5100]);
    assert_eq!(gets(&server), vec!["bytes=0-99,5000-5099", "bytes=5000-5099"]);
}

#[test]
fn test_broken_multipart_stops_multirange_for_later_batches() {
    let params = no_merge().vec_options(VecOptions {
        merge_window: 0,
        header_budget: 25,
        ..VecOptions::default()
    });
    let (server, client, data) = setup(10_000, params);
    server.set_multirange(MultirangeBehavior::Truncated);
    let mut bufs: Vec<Vec<u8>> = (0..4).map(|_| vec![0u8; 10]).collect();
    let mut slots: Vec<IoVec<'_>> = bufs
        .iter_mut()
        .enumerate()
        .map(|(i, b)| IoVec::new(1000 * i as u64 + 1000, b))
        .collect();

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 40);
    for (i, slot) in slots.iter().enumerate() {
        let start = 1000 * (i + 1);
        assert_eq!(slot.data(), &data[start..start + 10]);
    }

    let mut ranges = gets(&server);
    assert_eq!(ranges.remove(0), "bytes=1000-1009,2000-2009");
    ranges.sort();
    assert_eq!(ranges, vec!["bytes=2000-2009", "bytes=3000-3009", "bytes=4000-4009"]);
}

const XYZ: &str = "multipart/byteranges; boundary=xyz";

fn part(data: &[u8], start: usize, end: usize) -> Vec<u8> {
    let mut out = format!("--xyz\r\nContent-Range: bytes {start}-{end}/{}\r\n\r\n", data.len())
        .into_bytes();
    out.extend_from_slice(&data[start..=end]);
    out.extend_from_slice(b"\r\n");
    out
}

/// Two slots, 0..100 and 500..600, answered first with `body`.
fn read_with_multipart_body(body: Vec<u8>) -> (FakeServer, Client, Vec<String>) {
    let (server, client, data) = setup(1000, no_merge());
    server.respond_once(
        Method::Get,
        FILE,
        FakeResponse::new(206).header("Content-Type", XYZ).body(body),
    );
    let mut a = vec![0u8; 100];
    let mut b = vec![0u8; 100];
    let mut slots = [IoVec::new(0, &mut a), IoVec::new(500, &mut b)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 200);
    assert_eq!(slots[0].data(), &data[0..100]);
    assert_eq!(slots[1].data(), &data[500..600]);

    let mut ranges = gets(&server);
    assert_eq!(ranges.remove(0), "bytes=0-99,500-599");
    ranges.sort();
    (server, client, ranges)
}

#[test]
fn test_multipart_two_parts_drains_epilogue() {
    let data = pattern(1000);
    let mut body = b"\r\n".to_vec();
    body.extend(part(&data, 0, 99));
    body.extend(part(&data, 500, 599));
    body.extend_from_slice(b"--xyz--\r\ntrailing bytes after the terminator\r\n");

    let (server, client, refetched) = read_with_multipart_body(body);
    assert!(refetched.is_empty());

    client.get(&url(FILE)).unwrap();
    assert_eq!(server.sessions_created(), 1);
}

#[test]
fn test_multipart_too_many_blank_lines_falls_back() {
    let data = pattern(1000);
    let mut body = b"\r\n".repeat(101);
    body.extend(part(&data, 0, 99));
    body.extend(part(&data, 500, 599));
    body.extend_from_slice(b"--xyz--\r\n");

    let (_, _, refetched) = read_with_multipart_body(body);
    assert_eq!(refetched, vec!["bytes=0-99", "bytes=500-599"]);
}

#[test]
fn test_multipart_malformed_boundary_falls_back() {
    let data = pattern(1000);
    let mut body = part(&data, 0, 99);
    body.extend_from_slice(b"--not-the-boundary\r\n");

    let (_, _, refetched) = read_with_multipart_body(body);
    assert_eq!(refetched, vec!["bytes=500-599"]);
}

#[test]
fn test_multipart_part_without_content_range_falls_back() {
    let mut body = b"--xyz\r\nContent-Type: application/octet-stream\r\n\r\n".to_vec();
    body.extend_from_slice(&pattern(1000)[..100]);

    let (_, _, refetched) = read_with_multipart_body(body);
    assert_eq!(refetched, vec!["bytes=0-99", "bytes=500-599"]);
}

#[test]
fn test_multipart_unrequested_part_falls_back() {
    let data = pattern(1000);
    let mut body = part(&data, 200, 299);
    body.extend_from_slice(b"--xyz--\r\n");

    let (_, _, refetched) = read_with_multipart_body(body);
    assert_eq!(refetched, vec!["bytes=0-99", "bytes=500-599"]);
}

#[test]
fn test_multipart_overlong_line_falls_back() {
    let mut body = b"--xyz\r\nX-Padding: ".to_vec();
    body.extend(std::iter::repeat_n(b'a', 9000));
    body.extend_from_slice(b"\r\n");

    let (_, _, refetched) = read_with_multipart_body(body);
    assert_eq!(refetched, vec!["bytes=0-99", "bytes=500-599"]);
}

#[test]
fn test_slots_past_end_of_file() {
    let (_server, client, data) = setup(1000, no_merge());
    let mut straddle = vec![0u8; 200];
    let mut beyond = vec![0u8; 50];
    let mut slots = [IoVec::new(900, &mut straddle), IoVec::new(5000, &mut beyond)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 100);
    assert_eq!(slots[0].data(), &data[900..1000]);
    assert_eq!(slots[1].filled, 0);
}

#[test]
fn test_pread_past_end_reads_nothing() {
    let (_server, client, data) = setup(1000, RequestParams::default());
    let mut buf = vec![0u8; 64];
    assert_eq!(client.pread(&url(FILE), &mut buf, 5000).unwrap(), 0);
    assert_eq!(client.pread(&url(FILE), &mut buf, 990).unwrap(), 10);
    assert_eq!(&buf[..10], &data[990..1000]);
}

#[test]
fn test_empty_request_sends_nothing() {
    let (server, client, _) = setup(1000, RequestParams::default());
    let mut slots: [IoVec<'_>; 0] = [];
    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 0);

    let mut empty = [0u8; 0];
    let mut slots = [IoVec::new(10, &mut empty)];
    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 0);
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_fragment_disables_multirange() {
    let (server, client, data) = setup(10_000, no_merge());
    let mut a = vec![0u8; 10];
    let mut b = vec![0u8; 10];
    let mut c = vec![0u8; 10];
    let mut slots = [
        IoVec::new(0, &mut a),
        IoVec::new(3000, &mut b),
        IoVec::new(6000, &mut c),
    ];

    let target = url("http://h/data.bin#multirange=false&nconnections=2");
    assert_eq!(client.pread_vec(&target, &mut slots).unwrap(), 30);
    assert_eq!(slots[2].data(), &data[6000..6010]);

    let mut ranges = gets(&server);
    ranges.sort();
    assert_eq!(ranges, vec!["bytes=0-9", "bytes=3000-3009", "bytes=6000-6009"]);
    assert!(server.requests().iter().all(|r| r.url.fragment().is_none()));
}

#[test]
fn test_small_header_budget_splits_batches() {
    let params = no_merge().vec_options(VecOptions {
        merge_window: 0,
        header_budget: 25,
        ..VecOptions::default()
    });
    let (server, client, data) = setup(10_000, params);
    let mut bufs: Vec<Vec<u8>> = (0..4).map(|_| vec![0u8; 10]).collect();
    let mut slots: Vec<IoVec<'_>> = bufs
        .iter_mut()
        .enumerate()
        .map(|(i, b)| IoVec::new(1000 * i as u64 + 1000, b))
        .collect();

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 40);
    assert_eq!(slots[3].data(), &data[4000..4010]);
    assert_eq!(
        gets(&server),
        vec!["bytes=1000-1009,2000-2009", "bytes=3000-3009,4000-4009"]
    );
}

#[test]
fn test_transient_failure_is_retried() {
    let (server, client, data) = setup(1000, no_merge());
    server.fail(FILE, Fault::Error(ErrorKind::ConnectionReset), 1);
    let mut a = vec![0u8; 10];
    let mut b = vec![0u8; 10];
    let mut slots = [IoVec::new(0, &mut a), IoVec::new(500, &mut b)];

    assert_eq!(client.pread_vec(&url(FILE), &mut slots).unwrap(), 20);
    assert_eq!(slots[1].data(), &data[500..510]);
}

#[test]
fn test_missing_file() {
    let (_server, client, _) = setup(10, no_merge());
    let mut a = vec![0u8; 10];
    let mut slots = [IoVec::new(0, &mut a)];
    let err = client
        .pread_vec(&url("http://h/missing"), &mut slots)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_slots_match_file(
        reads in prop::collection::vec((0u64..5000, 0usize..300), 1..12),
        window in 0u64..400,
        multirange in any::<bool>(),
    ) {
        let params = RequestParams::default()
            .metalink_mode(MetalinkMode::Disable)
            .vec_options(VecOptions {
                merge_window: window,
                multirange,
                ..VecOptions::default()
            });
        let (_server, client, data) = setup(4096, params);
        let mut bufs: Vec<Vec<u8>> = reads.iter().map(|&(_, len)| vec![0u8; len]).collect();
        let mut slots: Vec<IoVec<'_>> = bufs
            .iter_mut()
            .zip(&reads)
            .map(|(b, &(offset, _))| IoVec::new(offset, b))
            .collect();

        let total = client.pread_vec(&url(FILE), &mut slots).unwrap();

        let mut expected_total = 0u64;
        for slot in &slots {
            let start = (slot.offset as usize).min(data.len());
            let end = (slot.offset as usize + slot.buffer.len()).min(data.len());
            prop_assert_eq!(slot.data(), &data[start..end]);
            expected_total += (end - start) as u64;
        }
        prop_assert_eq!(total, expected_total);
    }
}
