use super::*;

fn parse(args: &[&str]) -> Config {
    Config::parse_from(std::iter::once("dispcore").chain(args.iter().copied()))
}

#[test]
fn defaults_match_spec_table() {
    let config = parse(&[]);
    assert_eq!(config.log_format, "json");
    assert_eq!(config.log_level, "info");
    assert_eq!(config.heartbeat_timeout_secs, 30);
    assert_eq!(config.vd_reset_cooldown_secs, 30);
    assert_eq!(config.disconnect_grace_secs, 15);
    assert!(!config.restore);
    assert!(config.validate().is_ok());
}

#[test]
fn rejects_unknown_log_format() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_unknown_log_level() {
    let config = parse(&["--log-level", "shout"]);
    assert!(config.validate().is_err());
}

#[test]
fn explicit_state_dir_overrides_platform_default() {
    let config = parse(&["--state-dir", "/tmp/dispcore-test"]);
    assert_eq!(config.resolved_state_dir(), std::path::PathBuf::from("/tmp/dispcore-test"));
}

#[test]
fn heartbeat_and_cooldown_convert_to_durations() {
    let config = parse(&["--heartbeat-timeout-secs", "45", "--vd-reset-cooldown-secs", "10"]);
    assert_eq!(config.heartbeat_timeout(), std::time::Duration::from_secs(45));
    assert_eq!(config.vd_reset_cooldown(), std::time::Duration::from_secs(10));
}
