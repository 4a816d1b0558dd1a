// tests/config_loading.rs

mod common;
use crate::common::init_tracing;

use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;
use std::time::Duration;

use calcnode::config::{
    ConnectionDefaults, HOST_PROPERTY, PORT_PROPERTY, fingerprint, format_duration,
    load_worker_config, parse_duration, substitute_placeholders,
};
use calcnode::errors::CalcNodeError;
use calcnode::supervisor::{ConfigurationSource, FileConfigurationSource, source_for_url};

type TestResult = Result<(), Box<dyn Error>>;

const FULL_DOCUMENT: &str = r#"
[node]
id = "node-a"
capacity = 4
max_job_item_execution = "2m"
watchdog_check_interval = "250ms"
timeout_grace_period = "5s"
statistics_interval = "10s"

[coordinator]
host = "${calcnode.host}"
port = "${calcnode.port}"
max_frame_bytes = 4096
"#;

fn defaults() -> ConnectionDefaults {
    ConnectionDefaults {
        host: "coordinator.internal".to_string(),
        port: Some(8080),
    }
}

fn config_error(result: calcnode::errors::Result<impl std::fmt::Debug>) -> String {
    match result {
        Err(CalcNodeError::ConfigError(message)) => message,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn full_document_loads_with_substitution() -> TestResult {
    init_tracing();

    let config = load_worker_config(FULL_DOCUMENT.as_bytes(), &defaults())?;

    assert_eq!(config.node.id, "node-a");
    assert_eq!(config.node.capacity, 4);
    assert_eq!(config.node.max_job_item_execution, Duration::from_secs(120));
    assert_eq!(config.node.watchdog_check_interval, Duration::from_millis(250));
    assert_eq!(config.node.timeout_grace_period, Duration::from_secs(5));
    assert_eq!(config.node.statistics_interval, Duration::from_secs(10));
    assert_eq!(config.coordinator.host, "coordinator.internal");
    assert_eq!(config.coordinator.port, 8080);
    assert_eq!(config.coordinator.max_frame_bytes, 4096);
    Ok(())
}

#[test]
fn empty_document_takes_every_default() -> TestResult {
    let config = load_worker_config(b"", &defaults())?;

    assert!(config.node.id.starts_with("calcnode-"));
    assert!(config.node.capacity >= 1);
    assert_eq!(config.node.max_job_item_execution, Duration::from_secs(60));
    assert_eq!(config.node.watchdog_check_interval, Duration::from_secs(1));
    assert_eq!(config.node.timeout_grace_period, Duration::ZERO);
    assert_eq!(config.node.statistics_interval, Duration::from_secs(30));
    assert_eq!(config.coordinator.host, "coordinator.internal");
    assert_eq!(config.coordinator.port, 8080);
    Ok(())
}

#[test]
fn numeric_ports_are_accepted_unquoted() -> TestResult {
    let config = load_worker_config(
        b"[coordinator]\nhost = \"h\"\nport = ${calcnode.port}\n",
        &defaults(),
    )?;
    assert_eq!(config.coordinator.host, "h");
    assert_eq!(config.coordinator.port, 8080);
    Ok(())
}

#[test]
fn unknown_placeholders_are_all_reported() {
    let message = config_error(substitute_placeholders(
        "a = \"${calcnode.host}\"\nb = \"${missing.one}\"\nc = \"${missing.two}\"\nd = \"${missing.one}\"",
        &defaults().properties(),
    ));
    assert!(message.contains("${missing.one}"), "{message}");
    assert!(message.contains("${missing.two}"), "{message}");
    assert!(!message.contains("calcnode.host"), "{message}");
}

#[test]
fn text_without_placeholders_is_untouched() -> TestResult {
    let document = "literal = \"$dollar {brace}\"";
    assert_eq!(substitute_placeholders(document, &BTreeMap::new())?, document);
    Ok(())
}

#[test]
fn invalid_values_are_rejected() {
    let cases = [
        ("[node]\ncapacity = 0", "capacity"),
        ("[node]\ncapacity = -2", "capacity"),
        ("[node]\nid = \"  \"", "id"),
        ("[node]\nmax_job_item_execution = \"0s\"", "max_job_item_execution"),
        ("[node]\nwatchdog_check_interval = \"soon\"", "watchdog_check_interval"),
        ("[node]\nstatistics_interval = \"0ms\"", "statistics_interval"),
        ("[coordinator]\nport = 0", "port"),
        ("[coordinator]\nport = 70000", "port"),
        ("[coordinator]\nport = \"http\"", "port"),
        ("[coordinator]\nhost = \"\"", "host"),
        ("[coordinator]\nmax_frame_bytes = 0", "max_frame_bytes"),
    ];
    for (document, field) in cases {
        let message = config_error(load_worker_config(document.as_bytes(), &defaults()));
        assert!(message.contains(field), "{document:?}: {message}");
    }
}

#[test]
fn zero_grace_period_is_allowed() -> TestResult {
    let config = load_worker_config(b"[node]\ntimeout_grace_period = \"0s\"", &defaults())?;
    assert_eq!(config.node.timeout_grace_period, Duration::ZERO);
    Ok(())
}

#[test]
fn unknown_keys_and_bad_toml_are_errors() {
    assert!(matches!(
        load_worker_config(b"[node]\nthreads = 4", &defaults()),
        Err(CalcNodeError::TomlError(_))
    ));
    assert!(matches!(
        load_worker_config(b"[node\n", &defaults()),
        Err(CalcNodeError::TomlError(_))
    ));
    assert!(matches!(
        load_worker_config(&[0xff, 0xfe], &defaults()),
        Err(CalcNodeError::ConfigError(_))
    ));
}

#[test]
fn port_without_any_default_is_an_error() {
    let file_defaults = ConnectionDefaults {
        host: "localhost".to_string(),
        port: None,
    };
    let message = config_error(load_worker_config(b"", &file_defaults));
    assert!(message.contains("port"), "{message}");
}

#[test]
fn connection_defaults_come_from_the_url() -> TestResult {
    let explicit = ConnectionDefaults::from_url("http://coord.example:9090/config/node.toml")?;
    assert_eq!(explicit.host, "coord.example");
    assert_eq!(explicit.port, Some(9090));

    let implicit = ConnectionDefaults::from_url("https://coord.example/config")?;
    assert_eq!(implicit.port, Some(443));

    let file = ConnectionDefaults::from_url("file:///etc/calcnode/node.toml")?;
    assert_eq!(file.host, "localhost");
    assert_eq!(file.port, None);

    let properties = explicit.properties();
    assert_eq!(properties.get(HOST_PROPERTY).map(String::as_str), Some("coord.example"));
    assert_eq!(properties.get(PORT_PROPERTY).map(String::as_str), Some("9090"));
    assert!(!file.properties().contains_key(PORT_PROPERTY));

    assert!(ConnectionDefaults::from_url("not a url").is_err());
    Ok(())
}

#[test]
fn durations_parse_and_format() -> TestResult {
    assert_eq!(parse_duration("150ms")?, Duration::from_millis(150));
    assert_eq!(parse_duration(" 3s ")?, Duration::from_secs(3));
    assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
    assert_eq!(parse_duration("1h")?, Duration::from_secs(3600));
    for bad in ["", "10", "ms", "1.5s", "-1s", "5d"] {
        assert!(parse_duration(bad).is_err(), "{bad:?}");
    }
    assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    Ok(())
}

#[test]
fn fingerprint_is_stable_and_short() {
    let a = fingerprint(FULL_DOCUMENT.as_bytes());
    assert_eq!(a.len(), 16);
    assert_eq!(a, fingerprint(FULL_DOCUMENT.as_bytes()));
    assert_ne!(a, fingerprint(b"[node]\n"));
}

#[tokio::test]
async fn file_source_reads_local_documents() -> TestResult {
    init_tracing();

    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(FULL_DOCUMENT.as_bytes())?;
    let url = format!("file://{}", file.path().display());

    let bytes = FileConfigurationSource.fetch(&url).await?;
    assert_eq!(bytes, FULL_DOCUMENT.as_bytes());

    let missing = FileConfigurationSource
        .fetch("file:///definitely/not/here.toml")
        .await;
    assert!(matches!(missing, Err(CalcNodeError::FetchFailed(_))));
    Ok(())
}

#[test]
fn sources_are_chosen_by_scheme() {
    assert!(source_for_url("http://h/config").is_ok());
    assert!(source_for_url("HTTPS://h/config").is_ok());
    assert!(source_for_url("file:///tmp/x.toml").is_ok());
    assert!(source_for_url("ftp://h/config").is_err());
    assert!(source_for_url("/tmp/x.toml").is_err());
}
