//! Integration tests for the tydom-core frame codec.
//!
//! These tests go through the public API only: requests are encoded with
//! [`encode_request`], decoded back with [`decode_frame`], and the decoded
//! start line, transaction id and body are compared against the original.
//! Gateway-shaped response samples check the chunked body reassembly.

use serde_json::json;
use tydom_core::{
    decode_frame, encode_request, Body, Method, Request, StartLine, StateEvent,
    TransactionIdGenerator,
};

/// Encodes a request with a fresh id and decodes it again.
fn roundtrip(request: &Request) -> (tydom_core::TransactionId, tydom_core::ParsedFrame) {
    let ids = TransactionIdGenerator::new();
    let id = ids.next();
    let bytes = encode_request(request, id, "TydomClient/0.1");
    let frame = decode_frame(&bytes).expect("decode must succeed");
    (id, frame)
}

#[test]
fn test_roundtrip_get_without_body() {
    let (id, frame) = roundtrip(&Request::devices_data());

    assert_eq!(
        frame.start_line,
        StartLine::Request {
            method: Method::Get,
            path: "/devices/data".to_string()
        }
    );
    assert_eq!(frame.transaction_id, Some(id));
    assert_eq!(frame.body, Body::Empty);
    assert_eq!(frame.header("Content-Length"), Some("0"));
}

#[test]
fn test_roundtrip_put_device_data_recovers_body() {
    let request = Request::put_device_data(1_612_345_678, 1_612_345_678, "position", json!(100));

    let (id, frame) = roundtrip(&request);

    assert_eq!(frame.transaction_id, Some(id));
    assert_eq!(frame.path(), Some("/devices/1612345678/endpoints/1612345678/data"));
    // An array of objects contains `{`, so the body comes back as JSON.
    assert_eq!(frame.body, Body::Json(json!([{ "name": "position", "value": 100 }])));
    assert_eq!(frame.header("User-Agent"), Some("TydomClient/0.1"));
}

#[test]
fn test_roundtrip_password_change() {
    let request = Request::gateway_password("new-secret", "old-secret");

    let (_, frame) = roundtrip(&request);

    assert!(matches!(
        frame.start_line,
        StartLine::Request { method: Method::Put, .. }
    ));
    assert_eq!(frame.body.as_json(), request.body.as_ref());
}

#[test]
fn test_every_command_roundtrips_method_and_path() {
    let requests = [
        Request::ping(),
        Request::info(),
        Request::configs_file(),
        Request::gateway_geoloc(),
        Request::gateway_api_mode(),
        Request::refresh_all(),
        Request::areas_data(),
        Request::areas_cmeta(),
        Request::areas_meta(),
        Request::devices_cmeta(),
        Request::devices_meta(),
        Request::device_data(1, 2),
        Request::scenarios_file(),
        Request::scenario(9),
        Request::moments_file(),
    ];

    for request in &requests {
        let (_, frame) = roundtrip(request);
        assert_eq!(
            frame.start_line,
            StartLine::Request {
                method: request.method,
                path: request.path.clone()
            },
            "start line must survive the round trip for {}",
            request.path
        );
    }
}

#[test]
fn test_chunked_info_response_yields_embedded_json() {
    // A /info response as the gateway sends it: size and payload lines
    // alternate, and only the payload lines form the JSON document.
    let raw = "HTTP/1.1 200 OK\r\n\
               Server: Tydom-001A25ABCDEF\r\n\
               Uri-Origin: /info\r\n\
               Content-Type: application/json\r\n\
               Transfer-Encoding: chunked\r\n\
               Transac-Id: 1700000000123456\r\n\r\n\
               2D\r\n{\"productName\":\"TYDOM2\",\"mac\":\"001A25ABCDEF\",\r\n\
               12\r\n\"mainVersionSW\":\"03.05.04\"}\r\n\
               0\r\n\r\n";

    let frame = decode_frame(raw.as_bytes()).expect("decode must succeed");

    assert_eq!(
        frame.body,
        Body::Json(json!({
            "productName": "TYDOM2",
            "mac": "001A25ABCDEF",
            "mainVersionSW": "03.05.04"
        }))
    );
    assert_eq!(frame.status(), Some(200));
}

#[test]
fn test_push_frame_becomes_state_event() {
    let raw = "PUT /devices/data HTTP/1.1\r\n\
               Server: Tydom-001A25ABCDEF\r\n\
               Content-Type: application/json\r\n\
               Transfer-Encoding: chunked\r\n\r\n\
               40\r\n[{\"id\":1612345678,\"endpoints\":[{\"id\":1612345678,\"data\":[]}]}]\r\n\
               0\r\n\r\n";

    let frame = decode_frame(raw.as_bytes()).expect("decode must succeed");
    let event = StateEvent::from_frame(&frame);

    assert_eq!(frame.transaction_id, None);
    assert_eq!(event.name, "devices_changed");
    assert_eq!(event.changed_ids, vec![1_612_345_678]);
}
