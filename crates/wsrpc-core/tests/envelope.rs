//! Envelope grammar: classification, validation and round-trips.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde_json::json;

use wsrpc_core::{Envelope, ErrorCode, ErrorObject, Id, VersionCheck};

fn decode(v: serde_json::Value) -> Result<Envelope, ErrorObject> {
    Envelope::from_value(&v, VersionCheck::Strict)
}

#[test]
fn classify_request() {
    let env = decode(json!({"jsonrpc": "2.0", "method": "sum", "params": [1, 2], "id": 7})).unwrap();
    assert_eq!(
        env,
        Envelope::request(Id::Num(7), "sum", Some(json!([1, 2])))
    );
}

#[test]
fn classify_notification() {
    let env = decode(json!({"jsonrpc": "2.0", "method": "tick"})).unwrap();
    assert_eq!(env, Envelope::notification("tick", None));
}

#[test]
fn classify_response_by_id_and_result() {
    let env = decode(json!({"jsonrpc": "2.0", "result": "ok", "id": 3})).unwrap();
    assert_eq!(env, Envelope::success(Id::Num(3), json!("ok")));
}

#[test]
fn classify_error_response() {
    let env = decode(json!({
        "jsonrpc": "2.0",
        "error": {"code": -32000, "message": "Server error"},
        "id": null,
    }))
    .unwrap();
    let Envelope::Failure { id, error } = env else {
        panic!("expected failure");
    };
    assert_eq!(id, Id::Null);
    assert!(error.is_code(ErrorCode::ServerError));
}

#[test]
fn id_key_present_with_null_is_a_request_id() {
    // `id: null` is still a request, not a notification.
    let env = decode(json!({"jsonrpc": "2.0", "method": "m", "id": null})).unwrap();
    assert_eq!(env, Envelope::request(Id::Null, "m", None));
}

#[test]
fn method_missing_or_empty() {
    for v in [
        json!({"jsonrpc": "2.0", "id": 1}),
        json!({"jsonrpc": "2.0", "method": "", "id": 1}),
    ] {
        let err = decode(v).unwrap_err();
        assert!(err.is_code(ErrorCode::MethodNotFound));
        assert_eq!(err.data, Some(json!("Method not specified")));
    }
}

#[test]
fn method_wrong_type() {
    let err = decode(json!({"jsonrpc": "2.0", "method": 42, "id": 1})).unwrap_err();
    assert!(err.is_code(ErrorCode::InvalidRequest));
    assert_eq!(err.data, Some(json!("Invalid type of method name")));
}

#[test]
fn params_object_and_array_accepted_null_dropped() {
    let obj = decode(json!({"jsonrpc": "2.0", "method": "m", "params": {"a": 1}, "id": 1})).unwrap();
    assert_eq!(obj.id(), Some(&Id::Num(1)));

    let arr = decode(json!({"jsonrpc": "2.0", "method": "m", "params": [1], "id": 1})).unwrap();
    assert!(matches!(arr, Envelope::Request { params: Some(_), .. }));

    let nul = decode(json!({"jsonrpc": "2.0", "method": "m", "params": null, "id": 1})).unwrap();
    assert!(matches!(nul, Envelope::Request { params: None, .. }));
}

#[test]
fn params_scalar_rejected() {
    let err = decode(json!({"jsonrpc": "2.0", "method": "m", "params": "no", "id": 1})).unwrap_err();
    assert!(err.is_code(ErrorCode::InvalidRequest));
}

#[test]
fn version_check_modes() {
    let missing = json!({"method": "m", "id": 1});
    let wrong = json!({"jsonrpc": "1.0", "method": "m", "id": 1});

    let err = Envelope::from_value(&missing, VersionCheck::Strict).unwrap_err();
    assert_eq!(err.data, Some(json!("Invalid JSON-RPC Version")));

    assert!(Envelope::from_value(&missing, VersionCheck::Loose).is_ok());
    assert!(Envelope::from_value(&wrong, VersionCheck::Loose).is_err());

    assert!(Envelope::from_value(&wrong, VersionCheck::Ignore).is_ok());
}

#[test]
fn version_check_applies_to_responses() {
    let resp = json!({"result": 1, "id": 1});
    assert!(Envelope::from_value(&resp, VersionCheck::Strict).is_err());
    assert!(Envelope::from_value(&resp, VersionCheck::Loose).is_ok());
}

#[test]
fn non_object_item_rejected() {
    let err = decode(json!(42)).unwrap_err();
    assert!(err.is_code(ErrorCode::InvalidRequest));
}

#[test]
fn round_trip_every_shape() {
    let envs = [
        Envelope::request(Id::Num(0), "a", None),
        Envelope::request(Id::Str("k".into()), "b", Some(json!({"x": [1, 2]}))),
        Envelope::request(Id::Null, "c", Some(json!([true]))),
        Envelope::notification("d", Some(json!({"y": null}))),
        Envelope::notification("e", None),
        Envelope::success(Id::Num(9), json!({"a": ["the return value"]})),
        Envelope::success(Id::Str("s".into()), json!(null)),
        Envelope::failure(Id::Null, ErrorObject::from_code(ErrorCode::InternalError)),
        Envelope::failure(
            Id::Num(1),
            ErrorObject::server_error("TypeError", "bad input"),
        ),
    ];
    for env in envs {
        let decoded = Envelope::from_value(&env.to_value(), VersionCheck::Strict).unwrap();
        assert_eq!(decoded, env);
    }
}

#[test]
fn wellformed_error_object_detection() {
    assert!(ErrorObject::is_wellformed(
        &json!({"code": -32602, "message": "Invalid params"})
    ));
    assert!(!ErrorObject::is_wellformed(&json!({"code": "x", "message": "m"})));
    assert!(!ErrorObject::is_wellformed(&json!("nope")));
}

#[test]
fn default_messages() {
    assert_eq!(ErrorObject::method_not_found().message, "Method not found");
    assert_eq!(
        ErrorObject::from_code(ErrorCode::InvalidRequest).message,
        "Invalid Request"
    );
    assert_eq!(ErrorObject::parse_error("Invalid JSON").message, "Parse error");
}
