//! Declarative configuration loading from YAML, TOML, and environment variables.
//!
//! The mirror structs here deserialize with serde and convert into the
//! programmatic [`ClientConfig`](crate::config::ClientConfig) through the
//! builder API, so the same validation applies to every source.
//!
//! # Supported Formats
//!
//! - **YAML** (requires `config-file` feature): `ClientConfig::from_yaml("grid.yaml")`
//! - **TOML** (requires `config-file` feature): `ClientConfig::from_toml("grid.toml")`
//! - **Environment Variables** (always available): `ClientConfig::from_env()`
//!
//! # Example YAML
//!
//! ```yaml
//! cluster-name: production
//! client-name: orders-service
//! labels:
//!   - region:eu
//! network:
//!   addresses:
//!     - "10.0.0.1:5701"
//!     - "10.0.0.2"
//!   connection-timeout-ms: 10000
//!   heartbeat-interval-ms: 5000
//!   heartbeat-timeout-ms: 60000
//!   smart-routing: true
//!   reconnect-mode: async
//!   max-frame-size: 1048576
//!   socket:
//!     tcp-nodelay: true
//!     keep-alive: true
//! retry:
//!   initial-backoff-ms: 100
//!   max-backoff-ms: 30000
//!   multiplier: 2.0
//!   jitter: 0.2
//!   cluster-connect-timeout-ms: 120000
//! invocation:
//!   timeout-ms: 120000
//!   retry-pause-ms: 100
//!   max-concurrent: 512
//!   redo-operation: false
//! events:
//!   worker-count: 5
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, ClientConfigBuilder, ConfigError, ReconnectMode, DEFAULT_PORT};

/// Top-level file-based configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Cluster name to connect to.
    pub cluster_name: Option<String>,
    /// Client name reported to the cluster.
    pub client_name: Option<String>,
    /// Client labels.
    pub labels: Option<Vec<String>>,
    /// Network configuration.
    pub network: Option<FileNetworkConfig>,
    /// Reconnect backoff configuration.
    pub retry: Option<FileRetryConfig>,
    /// Invocation configuration.
    pub invocation: Option<FileInvocationConfig>,
    /// Event dispatch configuration.
    pub events: Option<FileEventConfig>,
    /// Credentials.
    pub security: Option<FileSecurityConfig>,
}

/// File-based network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileNetworkConfig {
    /// Cluster member addresses; the default port applies when omitted.
    pub addresses: Option<Vec<String>>,
    /// Connection timeout in milliseconds.
    pub connection_timeout_ms: Option<u64>,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: Option<u64>,
    /// Heartbeat timeout in milliseconds.
    pub heartbeat_timeout_ms: Option<u64>,
    /// Whether to use smart routing.
    pub smart_routing: Option<bool>,
    /// Reconnection mode: "off", "on", or "async".
    pub reconnect_mode: Option<String>,
    /// Outbound fragmentation threshold in bytes.
    pub max_frame_size: Option<usize>,
    /// Socket-level configuration.
    pub socket: Option<FileSocketConfig>,
}

/// File-based socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSocketConfig {
    /// Enable TCP_NODELAY.
    pub tcp_nodelay: Option<bool>,
    /// Enable TCP keep-alive.
    pub keep_alive: Option<bool>,
    /// Send buffer size in bytes.
    pub send_buffer_size: Option<u32>,
    /// Receive buffer size in bytes.
    pub recv_buffer_size: Option<u32>,
    /// Linger timeout in milliseconds.
    pub linger_ms: Option<u64>,
}

/// File-based reconnect backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileRetryConfig {
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Backoff multiplier.
    pub multiplier: Option<f64>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: Option<f64>,
    /// Cluster connect timeout in milliseconds.
    pub cluster_connect_timeout_ms: Option<u64>,
}

/// File-based invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileInvocationConfig {
    /// Invocation timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Pause before the first retry in milliseconds.
    pub retry_pause_ms: Option<u64>,
    /// Cap on the retry pause in milliseconds.
    pub max_retry_pause_ms: Option<u64>,
    /// Maximum concurrent invocations (0 = unbounded).
    pub max_concurrent: Option<usize>,
    /// Whether to resend non-retryable requests after connection loss.
    pub redo_operation: Option<bool>,
}

/// File-based event dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileEventConfig {
    /// Number of event stripes.
    pub worker_count: Option<usize>,
    /// Per-stripe queue capacity.
    pub queue_capacity: Option<usize>,
}

/// File-based security configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileSecurityConfig {
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Token, sent as its UTF-8 bytes.
    pub token: Option<String>,
}

fn parse_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    value
        .parse::<SocketAddr>()
        .or_else(|_| format!("{value}:{DEFAULT_PORT}").parse::<SocketAddr>())
        .map_err(|_| ConfigError::new(format!("invalid member address: {value}")))
}

fn parse_reconnect_mode(value: &str) -> Result<ReconnectMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "off" => Ok(ReconnectMode::Off),
        "on" => Ok(ReconnectMode::On),
        "async" => Ok(ReconnectMode::Async),
        other => Err(ConfigError::new(format!("unknown reconnect mode: {other}"))),
    }
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(name) = file.cluster_name {
            builder = builder.cluster_name(name);
        }

        if let Some(name) = file.client_name {
            builder = builder.client_name(name);
        }

        if let Some(labels) = file.labels {
            builder = builder.with_labels(labels);
        }

        if let Some(net) = file.network {
            let addresses = net
                .addresses
                .unwrap_or_default()
                .iter()
                .map(|a| parse_address(a))
                .collect::<Result<Vec<_>, _>>()?;
            let reconnect_mode = net.reconnect_mode.as_deref().map(parse_reconnect_mode).transpose()?;

            builder = builder.network(|mut n| {
                for address in addresses {
                    n = n.add_address(address);
                }
                if let Some(ms) = net.connection_timeout_ms {
                    n = n.connection_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = net.heartbeat_interval_ms {
                    n = n.heartbeat_interval(Duration::from_millis(ms));
                }
                if let Some(ms) = net.heartbeat_timeout_ms {
                    n = n.heartbeat_timeout(Duration::from_millis(ms));
                }
                if let Some(smart) = net.smart_routing {
                    n = n.smart_routing(smart);
                }
                if let Some(mode) = reconnect_mode {
                    n = n.reconnect_mode(mode);
                }
                if let Some(size) = net.max_frame_size {
                    n = n.max_frame_size(size);
                }
                if let Some(sock) = net.socket {
                    n = n.socket(|mut s| {
                        if let Some(v) = sock.tcp_nodelay {
                            s = s.tcp_nodelay(v);
                        }
                        if let Some(v) = sock.keep_alive {
                            s = s.keep_alive(v);
                        }
                        if let Some(v) = sock.send_buffer_size {
                            s = s.send_buffer_size(v);
                        }
                        if let Some(v) = sock.recv_buffer_size {
                            s = s.recv_buffer_size(v);
                        }
                        if let Some(ms) = sock.linger_ms {
                            s = s.linger(Duration::from_millis(ms));
                        }
                        s
                    });
                }
                n
            });
        }

        if let Some(retry) = file.retry {
            builder = builder.retry(|mut r| {
                if let Some(ms) = retry.initial_backoff_ms {
                    r = r.initial_backoff(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.max_backoff_ms {
                    r = r.max_backoff(Duration::from_millis(ms));
                }
                if let Some(m) = retry.multiplier {
                    r = r.multiplier(m);
                }
                if let Some(j) = retry.jitter {
                    r = r.jitter(j);
                }
                if let Some(ms) = retry.cluster_connect_timeout_ms {
                    r = r.cluster_connect_timeout(Duration::from_millis(ms));
                }
                r
            });
        }

        if let Some(inv) = file.invocation {
            builder = builder.invocation(|mut i| {
                if let Some(ms) = inv.timeout_ms {
                    i = i.timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = inv.retry_pause_ms {
                    i = i.retry_pause(Duration::from_millis(ms));
                }
                if let Some(ms) = inv.max_retry_pause_ms {
                    i = i.max_retry_pause(Duration::from_millis(ms));
                }
                if let Some(max) = inv.max_concurrent {
                    i = i.max_concurrent(max);
                }
                if let Some(redo) = inv.redo_operation {
                    i = i.redo_operation(redo);
                }
                i
            });
        }

        if let Some(events) = file.events {
            builder = builder.events(|mut e| {
                if let Some(count) = events.worker_count {
                    e = e.worker_count(count);
                }
                if let Some(capacity) = events.queue_capacity {
                    e = e.queue_capacity(capacity);
                }
                e
            });
        }

        if let Some(sec) = file.security {
            builder = builder.security(|mut s| {
                if let Some(username) = sec.username {
                    s = s.username(username);
                }
                if let Some(password) = sec.password {
                    s = s.password(password);
                }
                if let Some(token) = sec.token {
                    s = s.token(token.into_bytes());
                }
                s
            });
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read YAML config file: {e}")))?;
        Self::from_yaml_str(&content)
    }

    /// Parses configuration from YAML text.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse YAML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read TOML config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileConfig = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse TOML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `GRID_CLUSTER_NAME` | cluster name |
    /// | `GRID_CLIENT_NAME` | client name |
    /// | `GRID_ADDRESSES` | comma-separated member addresses |
    /// | `GRID_CONNECTION_TIMEOUT_MS` | connection timeout |
    /// | `GRID_SMART_ROUTING` | `"true"` or `"false"` |
    /// | `GRID_RECONNECT_MODE` | `off`, `on` or `async` |
    /// | `GRID_INVOCATION_TIMEOUT_MS` | invocation timeout |
    /// | `GRID_MAX_CONCURRENT_INVOCATIONS` | in-flight invocation limit |
    /// | `GRID_REDO_OPERATION` | `"true"` or `"false"` |
    /// | `GRID_USERNAME` / `GRID_PASSWORD` | credentials |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut file_config = FileConfig::default();

        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::new(format!("invalid value for {name}: {value}")))
        }

        if let Some(val) = var("GRID_CLUSTER_NAME") {
            file_config.cluster_name = Some(val);
        }

        if let Some(val) = var("GRID_CLIENT_NAME") {
            file_config.client_name = Some(val);
        }

        if let Some(val) = var("GRID_ADDRESSES") {
            file_config.network.get_or_insert_with(Default::default).addresses =
                Some(val.split(',').map(|s| s.trim().to_string()).collect());
        }

        if let Some(val) = var("GRID_CONNECTION_TIMEOUT_MS") {
            file_config.network.get_or_insert_with(Default::default).connection_timeout_ms =
                Some(parse("GRID_CONNECTION_TIMEOUT_MS", val)?);
        }

        if let Some(val) = var("GRID_SMART_ROUTING") {
            file_config.network.get_or_insert_with(Default::default).smart_routing =
                Some(val.eq_ignore_ascii_case("true"));
        }

        if let Some(val) = var("GRID_RECONNECT_MODE") {
            file_config.network.get_or_insert_with(Default::default).reconnect_mode = Some(val);
        }

        if let Some(val) = var("GRID_INVOCATION_TIMEOUT_MS") {
            file_config.invocation.get_or_insert_with(Default::default).timeout_ms =
                Some(parse("GRID_INVOCATION_TIMEOUT_MS", val)?);
        }

        if let Some(val) = var("GRID_MAX_CONCURRENT_INVOCATIONS") {
            file_config.invocation.get_or_insert_with(Default::default).max_concurrent =
                Some(parse("GRID_MAX_CONCURRENT_INVOCATIONS", val)?);
        }

        if let Some(val) = var("GRID_REDO_OPERATION") {
            file_config.invocation.get_or_insert_with(Default::default).redo_operation =
                Some(val.eq_ignore_ascii_case("true"));
        }

        if let Some(val) = var("GRID_USERNAME") {
            file_config.security.get_or_insert_with(Default::default).username = Some(val);
        }

        if let Some(val) = var("GRID_PASSWORD") {
            file_config.security.get_or_insert_with(Default::default).password = Some(val);
        }

        file_config.try_into()
    }
}

/// Loads a configuration file, picking the format from its extension.
///
/// Supports `.yaml`, `.yml`, and `.toml`. Requires the `config-file` feature.
#[cfg(feature = "config-file")]
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => ClientConfig::from_yaml(path),
        Some("toml") => ClientConfig::from_toml(path),
        Some(ext) => Err(ConfigError::new(format!(
            "unsupported config file extension: .{ext} (expected .yaml, .yml, or .toml)"
        ))),
        None => Err(ConfigError::new(
            "config file has no extension; expected .yaml, .yml, or .toml",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::collections::HashMap;

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.cluster_name(), "dev");
    }

    #[test]
    fn test_file_config_network_and_default_port() {
        let file_config = FileConfig {
            network: Some(FileNetworkConfig {
                addresses: Some(vec!["10.0.0.1:5702".into(), "10.0.0.2".into()]),
                connection_timeout_ms: Some(10_000),
                smart_routing: Some(false),
                reconnect_mode: Some("ASYNC".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        let addresses: Vec<String> = config.network().addresses().iter().map(|a| a.to_string()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:5702", "10.0.0.2:5701"]);
        assert_eq!(config.network().connection_timeout(), Duration::from_secs(10));
        assert!(!config.network().smart_routing());
        assert_eq!(config.network().reconnect_mode(), ReconnectMode::Async);
    }

    #[test]
    fn test_file_config_rejects_bad_values() {
        let bad_address = FileConfig {
            network: Some(FileNetworkConfig {
                addresses: Some(vec!["not an address".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(bad_address).is_err());

        let bad_mode = FileConfig {
            network: Some(FileNetworkConfig {
                reconnect_mode: Some("sometimes".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(bad_mode).is_err());
    }

    #[test]
    fn test_file_config_invocation_and_security() {
        let file_config = FileConfig {
            invocation: Some(FileInvocationConfig {
                timeout_ms: Some(30_000),
                max_concurrent: Some(256),
                redo_operation: Some(true),
                ..Default::default()
            }),
            security: Some(FileSecurityConfig {
                username: Some("admin".into()),
                password: Some("pw".into()),
                token: None,
            }),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.invocation().timeout(), Duration::from_secs(30));
        assert_eq!(config.invocation().max_concurrent(), 256);
        assert!(config.invocation().redo_operation());
        assert!(matches!(
            config.security().credentials(),
            Some(Credentials::UsernamePassword { username, .. }) if username == "admin"
        ));
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("GRID_CLUSTER_NAME", "env-cluster"),
            ("GRID_ADDRESSES", "127.0.0.1:5701, 127.0.0.1:5702"),
            ("GRID_RECONNECT_MODE", "off"),
            ("GRID_MAX_CONCURRENT_INVOCATIONS", "32"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cluster_name(), "env-cluster");
        assert_eq!(config.network().addresses().len(), 2);
        assert_eq!(config.network().reconnect_mode(), ReconnectMode::Off);
        assert_eq!(config.invocation().max_concurrent(), 32);
    }

    #[test]
    fn test_from_vars_rejects_unparsable_numbers() {
        let result = ClientConfig::from_vars(|name| {
            (name == "GRID_INVOCATION_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_yaml_str() {
        let yaml = r#"
cluster-name: yaml-test
network:
  addresses: ["127.0.0.1:5701"]
  max-frame-size: 4096
events:
  worker-count: 3
"#;
        let config = ClientConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cluster_name(), "yaml-test");
        assert_eq!(config.network().max_frame_size(), Some(4096));
        assert_eq!(config.events().worker_count(), 3);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_from_toml_str() {
        let text = r#"
cluster-name = "toml-test"

[invocation]
max-concurrent = 128
"#;
        let config = ClientConfig::from_toml_str(text).unwrap();
        assert_eq!(config.cluster_name(), "toml-test");
        assert_eq!(config.invocation().max_concurrent(), 128);
    }
}
