use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use cody_agent_client::config::{FramingKind, ACCESS_TOKEN_ENV};
use cody_agent_client::{AppError, ClientConfig};

fn sample_toml() -> &'static str {
    r#"
binary_path = "/opt/cody/agent"
use_binary = false
runtime = "node"
script_name = "index.js"
use_tcp = true
server_address = "localhost:3113"
debug = true
framing = "lines"

[timeouts]
request_seconds = 30
shutdown_grace_seconds = 2
connect_retry_millis = 50
connect_max_attempts = 0

[extension]
server_endpoint = "https://sourcegraph.example.com"
workspace_root_uri = "file:///work/repo"
"#
}

#[test]
fn parses_full_config() {
    let config = ClientConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.binary_path, Some(PathBuf::from("/opt/cody/agent")));
    assert!(!config.use_binary);
    assert!(config.use_tcp);
    assert_eq!(config.server_address, "localhost:3113");
    assert!(config.debug);
    assert_eq!(config.framing, FramingKind::Lines);
    assert_eq!(config.timeouts.request_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.timeouts.shutdown_grace(), Duration::from_secs(2));
    assert_eq!(config.timeouts.connect_backoff(), Duration::from_millis(50));
    assert_eq!(config.timeouts.connect_attempt_limit(), None);
    assert_eq!(
        config.extension.server_endpoint,
        "https://sourcegraph.example.com"
    );
    assert!(config.extension.access_token.is_empty());
}

#[test]
fn defaults_apply_to_minimal_config() {
    let config = ClientConfig::from_toml_str("binary_path = \"/usr/local/bin/cody\"\n")
        .expect("minimal config");

    assert!(config.use_binary);
    assert!(!config.use_tcp);
    assert!(config.spawn_agent);
    assert_eq!(config.runtime, "node");
    assert_eq!(config.script_name, "index.js");
    assert_eq!(config.server_address, "127.0.0.1:3113");
    assert_eq!(config.framing, FramingKind::ContentLength);
    assert_eq!(config.timeouts.request_timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.timeouts.connect_backoff(), Duration::from_millis(100));
    assert_eq!(config.timeouts.connect_attempt_limit(), Some(300));
    assert_eq!(config.extension.server_endpoint, "https://sourcegraph.com");
}

#[test]
fn zero_request_seconds_disables_the_timeout() {
    let config = ClientConfig::from_toml_str(
        "binary_path = \"/bin/agent\"\n[timeouts]\nrequest_seconds = 0\n",
    )
    .expect("valid config");
    assert_eq!(config.timeouts.request_timeout(), None);
}

#[test]
fn missing_binary_path_is_a_config_error() {
    let err = ClientConfig::from_toml_str("use_tcp = false\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("binary_path")));
}

#[test]
fn attaching_over_tcp_needs_no_binary() {
    let config = ClientConfig::from_toml_str(
        "spawn_agent = false\nuse_tcp = true\nserver_address = \"127.0.0.1:4000\"\n",
    )
    .expect("attach-only config");
    assert!(config.binary_path.is_none());
}

#[test]
fn stdio_without_spawning_is_rejected() {
    let err = ClientConfig::from_toml_str("spawn_agent = false\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("stdio")));
}

#[test]
fn malformed_server_address_is_rejected() {
    let err = ClientConfig::from_toml_str(
        "binary_path = \"/bin/agent\"\nuse_tcp = true\nserver_address = \"localhost\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("host:port")));
}

#[test]
fn zero_connect_backoff_is_rejected() {
    let err = ClientConfig::from_toml_str(
        "binary_path = \"/bin/agent\"\n[timeouts]\nconnect_retry_millis = 0\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("connect_retry_millis")));
}

#[test]
fn empty_runtime_is_rejected_for_scripts() {
    let err = ClientConfig::from_toml_str(
        "binary_path = \"/opt/agent\"\nuse_binary = false\nruntime = \"  \"\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("runtime")));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = ClientConfig::from_toml_str("binary_path = [").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn unknown_framing_is_a_config_error() {
    let err =
        ClientConfig::from_toml_str("binary_path = \"/bin/agent\"\nframing = \"xml\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_and_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write");

    let config = ClientConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.framing, FramingKind::Lines);
}

#[test]
fn read_from_path_defers_validation() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(b"debug = true\n").expect("write");

    let mut config = ClientConfig::read_from_path(file.path()).expect("parse only");
    assert!(config.validate().is_err());

    config.binary_path = Some(PathBuf::from("/bin/agent"));
    config.validate().expect("valid after override");
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = ClientConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read")));
}

#[test]
fn access_token_is_never_read_from_the_file() {
    let config = ClientConfig::from_toml_str(
        "binary_path = \"/bin/agent\"\n[extension]\naccess_token = \"sgp_leaked\"\n",
    )
    .expect("unknown keys are ignored");
    assert!(config.extension.access_token.is_empty());
}

#[test]
fn credentials_come_from_the_environment() {
    std::env::set_var(ACCESS_TOKEN_ENV, "sgp_test_token");
    let mut config = ClientConfig::default();
    config.load_credentials();
    std::env::remove_var(ACCESS_TOKEN_ENV);

    assert_eq!(config.extension.access_token, "sgp_test_token");
}
