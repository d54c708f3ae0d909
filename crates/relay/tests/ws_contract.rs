use picedit_common::protocol::ws::{decode_request, EditRequest, RequestType};

const RELAY_WS_SOURCE: &str = include_str!("../src/ws/mod.rs");

#[test]
fn websocket_contract_heartbeat_and_frame_limit() {
    let heartbeat_interval_ms = parse_u64_const(RELAY_WS_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(RELAY_WS_SOURCE, "HEARTBEAT_TIMEOUT_MS");
    let max_frame_bytes = parse_u64_const(RELAY_WS_SOURCE, "MAX_FRAME_BYTES");

    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert_eq!(max_frame_bytes, 262_144);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_route_is_picture_edit() {
    assert!(RELAY_WS_SOURCE.contains("pub const EDIT_ROUTE: &str = \"/ws/picture/edit\""));
}

#[test]
fn websocket_contract_inbound_frames_decode() {
    let samples = [
        (r#"{"type":"ENTER_EDIT"}"#, EditRequest::new(RequestType::EnterEdit)),
        (r#"{"type":"EXIT_EDIT"}"#, EditRequest::new(RequestType::ExitEdit)),
        (r#"{"type":"EDIT_ACTION","editAction":"ROTATE_LEFT"}"#, EditRequest::edit_action("ROTATE_LEFT")),
        (r#"{"type":"SOMETHING_NEW","extra":1}"#, EditRequest::new(RequestType::Unrecognized)),
    ];

    for (raw, expected) in samples {
        assert_eq!(decode_request(raw).expect("frame should decode"), expected, "frame {raw}");
    }
    assert!(decode_request("not json").is_err());
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
