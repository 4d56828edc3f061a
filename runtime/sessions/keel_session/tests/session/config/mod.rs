use keel_session::SessionConfig;

mod cookie;
mod state;

#[test]
fn the_secret_key_is_required() {
    let err = serde_json::from_str::<SessionConfig>("{}").unwrap_err();
    assert!(err.to_string().contains("secret_key"), "{err}");
}

#[test]
fn all_other_fields_have_a_default_value() {
    let config: SessionConfig = serde_json::from_str(r#"{"secret_key": "s3cr3t"}"#).unwrap();
    assert_eq!(config.cookie.name, "session");
    assert_eq!(config.state.ttl.as_secs(), 14 * 24 * 60 * 60);
}

#[test]
fn the_secret_key_is_redacted_in_debug_output() {
    let config: SessionConfig = serde_json::from_str(r#"{"secret_key": "s3cr3t"}"#).unwrap();
    assert!(!format!("{config:?}").contains("s3cr3t"));
}
