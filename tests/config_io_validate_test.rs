use heliotrack::config::Config;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.tracker.algorithm = "basic://5:2".to_string();
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.tracker.algorithm, "basic://5:2");
    assert_eq!(loaded.logging.file, cfg.logging.file);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // Non-positive hard limit
    cfg.limits.absolute_current_limit = 0.0;
    assert!(cfg.validate().is_err());

    // Negative duration
    cfg = Config::default();
    cfg.tracker.duration_s = -1.0;
    assert!(cfg.validate().is_err());

    // Non-positive probe compliance
    cfg = Config::default();
    cfg.tracker.voc_compliance = 0.0;
    assert!(cfg.validate().is_err());

    // Negative soak time
    cfg = Config::default();
    cfg.tracker.snaith_post_soak_s = -1.0;
    assert!(cfg.validate().is_err());

    // Malformed algorithm string
    cfg = Config::default();
    cfg.tracker.algorithm = "gd://1:2".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn partial_yaml_fills_in_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        b"tracker:\n  duration_s: 12.5\n  algorithm: \"snaith://\"\n",
    )
    .unwrap();
    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.tracker.duration_s, 12.5);
    assert_eq!(cfg.tracker.algorithm, "snaith://");
    // Untouched sections keep their defaults
    assert_eq!(cfg.limits.absolute_current_limit, 0.1);
    assert_eq!(cfg.tracker.snaith_pre_soak_s, 15.0);
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
