#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use wsrpc_server::config;

#[test]
fn deny_unknown_fields() {
    let bad = r#"
listen: "0.0.0.0:8080"
ping_intervall_ms: 100 # typo should fail
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("listen: \"127.0.0.1:0\"").expect("must parse");
    assert_eq!(cfg.listen, "127.0.0.1:0");
    assert_eq!(cfg.ping_interval_ms, 25_000);
    assert_eq!(cfg.ping_timeout_ms, 5_000);
}

#[test]
fn ping_timeout_must_undercut_interval() {
    let bad = r#"
ping_interval_ms: 50
ping_timeout_ms: 50
"#;
    assert!(config::load_from_str(bad).is_err());

    let ok = r#"
ping_interval_ms: 50
ping_timeout_ms: 25
"#;
    assert!(config::load_from_str(ok).is_ok());
}

#[test]
fn listen_must_be_a_socket_addr() {
    assert!(config::load_from_str("listen: \"not-an-addr\"").is_err());
}

#[test]
fn version_check_parses_lowercase() {
    let cfg = config::load_from_str("version_check: loose").unwrap();
    assert!(matches!(cfg.version_check, wsrpc_core::VersionCheck::Loose));
}
