//! Integration coverage for configuration loading: `${VAR}` substitution
//! against the process environment, the separate `ROUTES_PATH` document,
//! and `ConfigValidator` running over a fully assembled `Settings`.

use gateway_core::config::settings::load_settings;
use gateway_core::config::validation::ConfigValidator;
use std::io::Write;
use std::sync::Mutex;

// `load_settings` reads process-wide env vars (CONFIG_PATH, ROUTES_PATH,
// JWT_SECRET, ...); serialize these tests so they don't race each other.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_config_with_env_substitution_and_separate_routes_file() {
    let _guard = ENV_MUTEX.lock().unwrap();
    std::env::set_var("GW_TEST_UPSTREAM", "http://upstream.internal:8080");

    let routes_file = write_temp(
        r#"[
          {
            "path": "/api/*",
            "methods": ["GET"],
            "upstream": "${GW_TEST_UPSTREAM}",
            "strip_prefix": true
          }
        ]"#,
    );
    let config_file = write_temp(
        r#"{
          "version": 1,
          "routers": []
        }"#,
    );

    std::env::set_var("CONFIG_PATH", config_file.path());
    std::env::set_var("ROUTES_PATH", routes_file.path());

    let settings = load_settings().expect("settings should load");
    std::env::remove_var("CONFIG_PATH");
    std::env::remove_var("ROUTES_PATH");
    std::env::remove_var("GW_TEST_UPSTREAM");

    assert_eq!(settings.routers.len(), 1);
    assert_eq!(
        settings.routers[0].upstream.as_deref(),
        Some("http://upstream.internal:8080")
    );
    assert!(settings.routers[0].strip_prefix);
}

#[test]
fn missing_config_path_is_a_load_error() {
    let _guard = ENV_MUTEX.lock().unwrap();
    std::env::set_var("CONFIG_PATH", "/nonexistent/path/to/config.json");
    std::env::remove_var("ROUTES_PATH");
    let result = load_settings();
    std::env::remove_var("CONFIG_PATH");
    assert!(result.is_err());
}

#[test]
fn validator_flags_duplicate_routes_and_auth_without_secret() {
    let _guard = ENV_MUTEX.lock().unwrap();
    std::env::set_var("JWT_SECRET", "");

    let config_file = write_temp(
        r#"{
          "version": 1,
          "auth": { "jwt_secret": "please-change-this-secret" },
          "routers": [
            { "path": "/a", "methods": ["GET"], "upstream": "http://u", "middlewares": { "auth": true } },
            { "path": "/a", "methods": ["GET"], "upstream": "http://u" }
          ]
        }"#,
    );
    std::env::set_var("CONFIG_PATH", config_file.path());
    std::env::remove_var("ROUTES_PATH");

    let settings = load_settings().expect("settings should load even if invalid");
    std::env::remove_var("CONFIG_PATH");
    std::env::remove_var("JWT_SECRET");

    let result = ConfigValidator::validate_comprehensive(&settings);
    assert!(!result.is_valid);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("duplicate route") || e.contains("jwt_secret")));
}
