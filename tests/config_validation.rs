//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use leafnet::config::{ClientConfig, GateConfig, LoggingConfig, NetworkConfig, UdpConfig};
use std::time::Duration;
use tracing::Level;

fn has_error(errors: &[String], needle: &str) -> bool {
    errors.iter().any(|e| e.contains(needle))
}

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_gate_needs_a_listener() {
    let mut config = NetworkConfig::default();
    config.gate.tcp_addr = String::new();
    config.gate.ws_addr = String::new();

    let errors = config.validate();
    assert!(has_error(&errors, "at least one of tcp_addr or ws_addr"));
}

#[test]
fn test_ws_only_gate_is_valid() {
    let mut config = NetworkConfig::default();
    config.gate.tcp_addr = String::new();
    config.gate.ws_addr = "0.0.0.0:3653".to_string();
    // framing limits only apply to TCP
    config.gate.len_msg_len = 3;

    assert!(config.gate.validate().is_empty());
}

#[test]
fn test_invalid_gate_address() {
    let mut config = NetworkConfig::default();
    config.gate.tcp_addr = "invalid_address".to_string();

    let errors = config.validate();
    assert!(has_error(&errors, "Invalid gate tcp address"));
}

#[test]
fn test_zero_limits() {
    let mut config = NetworkConfig::default();
    config.gate.max_conn_num = 0;
    config.gate.pending_write_num = 0;
    config.gate.max_msg_len = 0;

    let errors = config.validate();
    assert!(has_error(&errors, "Max connections must be greater than 0"));
    assert!(has_error(&errors, "Pending write number must be greater than 0"));
    assert!(has_error(&errors, "Max message length must be greater than 0"));
}

#[test]
fn test_high_max_connections_warning() {
    let mut config = NetworkConfig::default();
    config.gate.max_conn_num = 150_000;

    assert!(has_error(&config.validate(), "Max connections very high"));
}

#[test]
fn test_max_msg_len_must_fit_prefix() {
    let mut config = NetworkConfig::default();
    config.gate.len_msg_len = 1;
    config.gate.max_msg_len = 4096;
    assert!(has_error(&config.validate(), "does not fit a 1-byte length prefix"));

    config.gate.len_msg_len = 2;
    config.gate.max_msg_len = 70_000;
    assert!(has_error(&config.validate(), "does not fit a 2-byte length prefix"));

    config.gate.len_msg_len = 4;
    assert!(config.gate.validate().is_empty());

    config.gate.len_msg_len = 3;
    assert!(has_error(&config.validate(), "Invalid len_msg_len: 3"));
}

#[test]
fn test_http_timeout_bounds() {
    let mut config = NetworkConfig::default();
    config.gate.http_timeout = Duration::from_millis(50);
    assert!(has_error(&config.validate(), "HTTP timeout too short"));

    config.gate.http_timeout = Duration::from_secs(400);
    assert!(has_error(&config.validate(), "HTTP timeout too long"));
}

#[test]
fn test_cert_without_key() {
    let mut config = NetworkConfig::default();
    config.gate.cert_file = "server.pem".to_string();

    assert!(has_error(&config.validate(), "cert_file and key_file must be set together"));
}

#[test]
fn test_client_address() {
    let mut config = NetworkConfig::default();
    config.client.addr = String::new();
    assert!(has_error(&config.validate(), "Client address cannot be empty"));

    config.client.addr = "not:a:valid:address".to_string();
    assert!(has_error(&config.validate(), "Invalid client address"));

    config.client.addr = "ws://game.example.com:3653/ws".to_string();
    assert!(config.client.validate().is_empty());
}

#[test]
fn test_client_limits() {
    let mut config = NetworkConfig::default();
    config.client.conn_num = 0;
    config.client.connect_interval = Duration::from_millis(1);

    let errors = config.validate();
    assert!(has_error(&errors, "Connection number must be greater than 0"));
    assert!(has_error(&errors, "Connect interval too short"));
}

#[test]
fn test_udp_settings() {
    let mut config = NetworkConfig::default();
    config.udp.buffer_size = 0;
    config.udp.max_try = 0;
    config.udp.packet_size = 70_000;

    let errors = config.validate();
    assert!(has_error(&errors, "UDP buffer size must be greater than 0"));
    assert!(has_error(&errors, "UDP max_try must be greater than 0"));
    assert!(has_error(&errors, "Invalid UDP packet size"));
}

#[test]
fn test_udp_client_options() {
    let udp = UdpConfig {
        buffer_size: 16,
        max_try: 5,
        packet_size: 512,
        ..UdpConfig::default()
    };
    let options = udp.client_options();
    assert_eq!(options.buffer_size, 16);
    assert_eq!(options.max_try, 5);
    assert_eq!(options.packet_size, 512);
}

#[test]
fn test_validate_strict() {
    assert!(NetworkConfig::default().validate_strict().is_ok());

    let config = NetworkConfig::default_with_overrides(|c| {
        c.gate.tcp_addr = String::new();
        c.client.conn_num = 0;
    });
    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Configuration validation failed"));
    assert!(err.contains("Connection number must be greater than 0"));
}

#[test]
fn test_from_toml_partial() {
    let config = NetworkConfig::from_toml(
        r#"
        [gate]
        tcp_addr = "0.0.0.0:3563"
        ws_addr = "0.0.0.0:3653"
        max_conn_num = 2000
        http_timeout = 5000
        little_endian = true

        [logging]
        log_level = "debug"
        json = true
        "#,
    )
    .unwrap();

    assert_eq!(config.gate.ws_addr, "0.0.0.0:3653");
    assert_eq!(config.gate.max_conn_num, 2000);
    assert_eq!(config.gate.http_timeout, Duration::from_secs(5));
    assert!(config.gate.little_endian);
    // untouched fields keep their defaults
    assert_eq!(config.gate.pending_write_num, 100);
    assert_eq!(config.client.conn_num, 1);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json);
    assert!(config.validate().is_empty());
}

#[test]
fn test_from_toml_rejects_bad_level() {
    let result = NetworkConfig::from_toml("[logging]\nlog_level = \"loud\"\n");
    assert!(matches!(
        result,
        Err(leafnet::ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_save_and_reload() {
    let config = NetworkConfig {
        gate: GateConfig {
            tcp_addr: "0.0.0.0:4000".to_string(),
            max_msg_len: 8192,
            ..GateConfig::default()
        },
        client: ClientConfig {
            addr: "ws://127.0.0.1:4001".to_string(),
            auto_reconnect: true,
            ..ClientConfig::default()
        },
        udp: UdpConfig::default(),
        logging: LoggingConfig {
            log_level: Level::WARN,
            ..LoggingConfig::default()
        },
    };

    let path = std::env::temp_dir().join(format!("leafnet-config-{}.toml", std::process::id()));
    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.gate.tcp_addr, "0.0.0.0:4000");
    assert_eq!(loaded.gate.max_msg_len, 8192);
    assert_eq!(loaded.client.addr, "ws://127.0.0.1:4001");
    assert!(loaded.client.auto_reconnect);
    assert_eq!(loaded.logging.log_level, Level::WARN);
}

#[test]
fn test_example_config_parses() {
    let example = NetworkConfig::example_config();
    assert!(example.contains("[gate]"));
    let parsed = NetworkConfig::from_toml(&example).unwrap();
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_missing_file() {
    let result = NetworkConfig::from_file("/definitely/not/here.toml");
    assert!(matches!(
        result,
        Err(leafnet::ProtocolError::ConfigError(_))
    ));
}

const ENV_KEYS: &[&str] = &[
    "LEAFNET_TCP_ADDR",
    "LEAFNET_WS_ADDR",
    "LEAFNET_MAX_CONN_NUM",
    "LEAFNET_HTTP_TIMEOUT_MS",
    "LEAFNET_AUTO_RECONNECT",
    "LEAFNET_UDP_MAX_TRY",
    "LEAFNET_LOG_LEVEL",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial_test::serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("LEAFNET_TCP_ADDR", "0.0.0.0:7000");
    std::env::set_var("LEAFNET_WS_ADDR", "0.0.0.0:7001");
    std::env::set_var("LEAFNET_MAX_CONN_NUM", "250");
    std::env::set_var("LEAFNET_HTTP_TIMEOUT_MS", "2500");
    std::env::set_var("LEAFNET_AUTO_RECONNECT", "true");
    std::env::set_var("LEAFNET_UDP_MAX_TRY", "7");
    std::env::set_var("LEAFNET_LOG_LEVEL", "trace");

    let config = NetworkConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.gate.tcp_addr, "0.0.0.0:7000");
    assert_eq!(config.gate.ws_addr, "0.0.0.0:7001");
    assert_eq!(config.gate.max_conn_num, 250);
    assert_eq!(config.gate.http_timeout, Duration::from_millis(2500));
    assert_eq!(config.client.http_timeout, Duration::from_millis(2500));
    assert!(config.client.auto_reconnect);
    assert_eq!(config.udp.max_try, 7);
    assert_eq!(config.logging.log_level, Level::TRACE);
}

#[test]
#[serial_test::serial]
fn test_from_env_ignores_garbage_numbers() {
    clear_env();
    std::env::set_var("LEAFNET_MAX_CONN_NUM", "lots");

    let config = NetworkConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.gate.max_conn_num, GateConfig::default().max_conn_num);
}

#[test]
#[serial_test::serial]
fn test_from_env_rejects_bad_level() {
    clear_env();
    std::env::set_var("LEAFNET_LOG_LEVEL", "shouty");

    let result = NetworkConfig::from_env();
    clear_env();

    assert!(matches!(
        result,
        Err(leafnet::ProtocolError::ConfigError(_))
    ));
}
