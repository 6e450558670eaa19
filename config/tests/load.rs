use std::fs;
use std::time::Duration;

use errand_config::{
    ConfigError, DEFAULT_LOG_FILTER, DeliveryMode, ENV_DELIVERY, ENV_ENDPOINT, ENV_TITLE_ID,
    ErrandConfig,
};

fn no_env(_: &str) -> Option<String> {
    None
}

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn full_file_resolves() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "E18D7"
endpoint = "https://e18d7.example.com"

[transport]
delivery = "polled"
connect_timeout_secs = 5
request_timeout_secs = 20

[logging]
filter = "errand=debug"
"#,
    );

    let resolved = ErrandConfig::load_from(&path)
        .unwrap()
        .resolve_with(no_env)
        .unwrap();

    assert_eq!(resolved.service.title_id(), "E18D7");
    assert_eq!(
        resolved.service.endpoint().as_str(),
        "https://e18d7.example.com/"
    );
    assert_eq!(resolved.transport.delivery, DeliveryMode::Polled);
    assert_eq!(resolved.transport.connect_timeout, Duration::from_secs(5));
    assert_eq!(
        resolved.transport.request_timeout,
        Some(Duration::from_secs(20))
    );
    assert!(!resolved.transport.allow_insecure_http);
    assert_eq!(resolved.logging.filter, "errand=debug");
}

#[test]
fn defaults_fill_optional_sections() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "A1"
endpoint = "https://a1.example.com"
"#,
    );

    let resolved = ErrandConfig::load_from(&path)
        .unwrap()
        .resolve_with(no_env)
        .unwrap();

    assert_eq!(resolved.transport.delivery, DeliveryMode::Threaded);
    assert_eq!(resolved.transport.request_timeout, None);
    assert_eq!(resolved.logging.filter, DEFAULT_LOG_FILTER);
}

#[test]
fn environment_overrides_file() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "FILE1"
endpoint = "https://file.example.com"

[transport]
delivery = "threaded"
"#,
    );
    let env = |name: &str| match name {
        n if n == ENV_TITLE_ID => Some("ENV1".to_string()),
        n if n == ENV_ENDPOINT => Some("https://env.example.com".to_string()),
        n if n == ENV_DELIVERY => Some("polled".to_string()),
        _ => None,
    };

    let resolved = ErrandConfig::load_from(&path)
        .unwrap()
        .resolve_with(env)
        .unwrap();

    assert_eq!(resolved.service.title_id(), "ENV1");
    assert_eq!(resolved.service.endpoint().host_str(), Some("env.example.com"));
    assert_eq!(resolved.transport.delivery, DeliveryMode::Polled);
}

#[test]
fn env_references_in_values_are_expanded() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "${MY_TITLE}"
endpoint = "https://${MY_TITLE}.example.com"
"#,
    );
    let env = |name: &str| (name == "MY_TITLE").then(|| "B2".to_string());

    let resolved = ErrandConfig::load_from(&path)
        .unwrap()
        .resolve_with(env)
        .unwrap();
    assert_eq!(resolved.service.title_id(), "B2");
    assert_eq!(resolved.service.endpoint().host_str(), Some("b2.example.com"));
}

#[test]
fn missing_service_settings_are_reported() {
    let config = ErrandConfig::default();
    assert!(matches!(
        config.resolve_with(no_env),
        Err(ConfigError::Missing("service.title_id"))
    ));

    let (_dir, path) = write_config("[service]\ntitle_id = \"A1\"\n");
    assert!(matches!(
        ErrandConfig::load_from(&path).unwrap().resolve_with(no_env),
        Err(ConfigError::Missing("service.endpoint"))
    ));
}

#[test]
fn zero_timeouts_are_rejected() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "A1"
endpoint = "https://a1.example.com"

[transport]
connect_timeout_secs = 0
"#,
    );
    assert!(matches!(
        ErrandConfig::load_from(&path).unwrap().resolve_with(no_env),
        Err(ConfigError::ZeroTimeout(_))
    ));
}

#[test]
fn insecure_endpoint_needs_flag() {
    let (_dir, path) = write_config(
        r#"
[service]
title_id = "A1"
endpoint = "http://127.0.0.1:9000"
"#,
    );
    assert!(matches!(
        ErrandConfig::load_from(&path).unwrap().resolve_with(no_env),
        Err(ConfigError::InvalidEndpoint { .. })
    ));

    let (_dir, path) = write_config(
        r#"
[service]
title_id = "A1"
endpoint = "http://127.0.0.1:9000"
allow_insecure_http = true
"#,
    );
    let resolved = ErrandConfig::load_from(&path)
        .unwrap()
        .resolve_with(no_env)
        .unwrap();
    assert!(resolved.transport.allow_insecure_http);
    assert!(resolved.service.allow_insecure_http());
}

#[test]
fn unreadable_and_malformed_files_carry_their_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = ErrandConfig::load_from(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert_eq!(err.path(), Some(missing.as_path()));

    let (_dir, path) = write_config("[service\ntitle_id = 1");
    let err = ErrandConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(err.path(), Some(path.as_path()));
}
