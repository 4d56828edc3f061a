use keel_session::config::SessionStateConfig;
use std::time::Duration;

#[test]
fn ttl_is_parsed_from_a_human_readable_duration() {
    let config: SessionStateConfig = serde_json::from_str(r#"{"ttl": "2h 30m"}"#).unwrap();
    assert_eq!(config.ttl, Duration::from_secs(9000));
}

#[test]
fn ttl_defaults_to_fourteen_days() {
    let config: SessionStateConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.ttl, Duration::from_secs(14 * 24 * 60 * 60));
}
