#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use sensorlink_config::{Config, Profile, load_config_from, profile_to_device_config, save_config_to};

#[test]
fn missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.default_profile.as_deref(), Some("default"));
    assert_eq!(config.defaults.timeout, 30);
    assert_eq!(config.defaults.keepalive, 10);
    assert!(config.profiles.is_empty());
}

#[test]
fn reads_profiles_from_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_profile = "wrist"

[defaults]
timeout = 5

[profiles.wrist]
address = "192.168.4.1"
max_retries = 3

[profiles.bench]
address = "bench.local:8080"
socket_path = "/ws"
keepalive = 0
"#,
    )
    .unwrap();

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.defaults.timeout, 5);
    // Unset fields of a partial [defaults] table keep their defaults.
    assert_eq!(config.defaults.keepalive, 10);

    let (name, wrist) = config.profile(None).unwrap();
    assert_eq!(name, "wrist");
    let device = profile_to_device_config(wrist, &config.defaults).unwrap();
    assert_eq!(device.address, "192.168.4.1");
    assert_eq!(device.reconnect.max_retries, Some(3));
    assert_eq!(device.rest_timeout, Some(std::time::Duration::from_secs(5)));

    let (_, bench) = config.profile(Some("bench")).unwrap();
    let device = profile_to_device_config(bench, &config.defaults).unwrap();
    assert_eq!(device.socket_url().unwrap().as_str(), "ws://bench.local:8080/ws");
    assert!(device.keepalive.is_zero());
}

#[test]
fn save_then_load_keeps_profiles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.profiles.insert(
        "default".into(),
        Profile {
            subprotocol: Some("json".into()),
            ..Profile::new("10.1.1.9")
        },
    );
    save_config_to(&config, &path).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("timeout = 30"));
    assert!(written.contains("keepalive = 10"));
    assert!(!written.contains("color"));
    assert!(!written.contains("output"));

    let loaded = load_config_from(&path).unwrap();
    let (_, profile) = loaded.profile(None).unwrap();
    assert_eq!(profile.address, "10.1.1.9");
    assert_eq!(profile.subprotocol.as_deref(), Some("json"));
}
