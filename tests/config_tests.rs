use smartmeter_rs::config::decryptor_from_lookup;
use smartmeter_rs::constants::{ENV_AUTHENTICATION_KEY, ENV_DECRYPTION_KEY};
use smartmeter_rs::{Config, MeterError};
use std::fs;
use std::time::Duration;

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "port": "/dev/ttyUSB0",
            "baudrate": 2400,
            "printValue": true,
            "persist": false,
            "cycle_pause_secs": 5
        }"#,
    )
    .unwrap();

    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.port, "/dev/ttyUSB0");
    assert!(cfg.print_value);
    assert!(!cfg.persist);

    let serial = cfg.serial_config();
    assert_eq!(serial.port, "/dev/ttyUSB0");
    assert_eq!(serial.baudrate, 2400);

    let settings = cfg.loop_settings();
    assert_eq!(settings.cycle_pause, Duration::from_secs(5));
    assert!(settings.print_value);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("config.json")).unwrap_err();
    assert!(matches!(err, MeterError::Config(ref msg) if msg.contains("not found")));
    assert!(err.is_fatal());
}

#[test]
fn test_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ port: ").unwrap();
    assert!(matches!(Config::load(&path), Err(MeterError::Config(_))));
}

#[test]
fn test_zero_deadline_rejected() {
    let err = Config::from_json(r#"{"port": "/dev/ttyUSB0", "link_deadline_secs": 0}"#);
    assert!(matches!(err, Err(MeterError::Config(_))));
}

#[test]
fn test_authentication_key_from_lookup() {
    let lookup = |name: &str| match name {
        n if n == ENV_DECRYPTION_KEY => Some("36C66639E48A8CA4D6BC8B282A793BBB".to_string()),
        n if n == ENV_AUTHENTICATION_KEY => Some("00112233445566778899AABBCCDDEEFF".to_string()),
        _ => None,
    };
    assert!(decryptor_from_lookup(lookup, true).is_ok());

    let bad_auth = |name: &str| match name {
        n if n == ENV_DECRYPTION_KEY => Some("36C66639E48A8CA4D6BC8B282A793BBB".to_string()),
        _ => Some("zz".to_string()),
    };
    let err = decryptor_from_lookup(bad_auth, false).unwrap_err();
    assert!(matches!(err, MeterError::Key(ref msg) if msg.contains(ENV_AUTHENTICATION_KEY)));
}

#[test]
fn test_debug_output_hides_key() {
    let decryptor = decryptor_from_lookup(
        |name| (name == ENV_DECRYPTION_KEY).then(|| "36C66639E48A8CA4D6BC8B282A793BBB".into()),
        false,
    )
    .unwrap();
    let debug = format!("{decryptor:?}");
    assert!(!debug.to_uppercase().contains("36C66639"));
    assert!(!debug.contains("54, 198"));
}

#[test]
fn test_only_key_variables_are_read() {
    let asked = std::cell::RefCell::new(Vec::new());
    let decryptor = decryptor_from_lookup(
        |name| {
            asked.borrow_mut().push(name.to_string());
            (name == ENV_DECRYPTION_KEY).then(|| "36C66639E48A8CA4D6BC8B282A793BBB".into())
        },
        false,
    );
    assert!(decryptor.is_ok());
    assert_eq!(
        asked.into_inner(),
        vec![
            ENV_DECRYPTION_KEY.to_string(),
            ENV_AUTHENTICATION_KEY.to_string()
        ]
    );
}

#[test]
fn test_port_is_the_only_required_key() {
    let cfg = Config::from_json(r#"{"port": "/dev/ttyAMA0"}"#).unwrap();
    assert_eq!(cfg.baudrate, 2400);
    assert!(!cfg.print_value);
    assert!(cfg.persist);
}
