use std::env;
use std::time::Duration;

use booking_pilot::cli::runtime::load_config;
use booking_pilot::config::DOMAIN_ENV;
use serial_test::serial;

#[tokio::test]
async fn reads_yaml_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pilot.yaml");
    std::fs::write(
        &path,
        "allow_listed_domain: rides.example.com\ncontroller:\n  max_retries: 1\n  refresh_max: 1m\n",
    )
    .unwrap();

    let loaded = load_config(Some(&path)).await.unwrap();
    assert_eq!(loaded.path, path);
    assert_eq!(
        loaded.config.allow_listed_domain.as_deref(),
        Some("rides.example.com")
    );
    assert_eq!(loaded.config.controller.max_retries, 1);
    assert_eq!(loaded.config.controller.refresh_max, Duration::from_secs(60));
    assert_eq!(
        loaded.config.controller.navigation_timeout,
        Duration::from_secs(30)
    );
}

#[tokio::test]
async fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let loaded = load_config(Some(&path)).await.unwrap();
    assert_eq!(loaded.config.allow_listed_domain, None);
    assert_eq!(loaded.config.controller.max_retries, 3);
}

#[tokio::test]
async fn malformed_durations_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pilot.yaml");
    std::fs::write(&path, "phase_deadline: soon\n").unwrap();
    assert!(load_config(Some(&path)).await.is_err());
}

#[tokio::test]
#[serial]
async fn environment_domain_wins_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pilot.yaml");
    std::fs::write(&path, "allow_listed_domain: old.example.com\n").unwrap();

    env::set_var(DOMAIN_ENV, "rides.example.com");
    let mut config = load_config(Some(&path)).await.unwrap().config;
    config.apply_env_overrides();
    env::remove_var(DOMAIN_ENV);

    assert_eq!(
        config.allow_listed_domain.as_deref(),
        Some("rides.example.com")
    );
}

#[tokio::test]
#[serial]
async fn blank_environment_domain_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pilot.yaml");
    std::fs::write(&path, "allow_listed_domain: rides.example.com\n").unwrap();

    env::set_var(DOMAIN_ENV, "   ");
    let mut config = load_config(Some(&path)).await.unwrap().config;
    config.apply_env_overrides();
    env::remove_var(DOMAIN_ENV);

    assert_eq!(
        config.allow_listed_domain.as_deref(),
        Some("rides.example.com")
    );
}
