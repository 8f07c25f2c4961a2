//! Client configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

/// Default cluster name.
const DEFAULT_CLUSTER_NAME: &str = "dev";
/// Default member port used when an address has none.
pub(crate) const DEFAULT_PORT: u16 = 5701;
/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default heartbeat interval.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default heartbeat timeout.
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default initial reconnect backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum reconnect backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default reconnect backoff multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default time allowed for (re)connecting to the cluster.
const DEFAULT_CLUSTER_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default invocation timeout.
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default pause before the first invocation retry.
const DEFAULT_INVOCATION_RETRY_PAUSE: Duration = Duration::from_millis(100);
/// Default cap on the invocation retry pause.
const DEFAULT_MAX_INVOCATION_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Default number of event stripes.
const DEFAULT_EVENT_WORKER_COUNT: usize = 5;
/// Default per-stripe event queue capacity.
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100_000;

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ConfigError> for gridwire_core::GridError {
    fn from(err: ConfigError) -> Self {
        gridwire_core::GridError::Configuration(err.message)
    }
}

/// What the client does after losing every connection to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectMode {
    /// Stay disconnected; invocations fail until the client is recreated.
    Off,
    /// Reconnect in the background; invocations wait for a connection.
    #[default]
    On,
    /// Reconnect in the background; invocations fail fast while offline.
    Async,
}

impl ReconnectMode {
    /// Returns true unless reconnection is switched off.
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns true if invocations fail fast while reconnecting.
    pub fn is_async(self) -> bool {
        matches!(self, Self::Async)
    }
}

/// Socket options applied to every member connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    tcp_nodelay: bool,
    keep_alive: bool,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
    linger: Option<Duration>,
}

impl SocketConfig {
    /// Returns whether Nagle's algorithm is disabled.
    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    /// Returns whether TCP keep-alive is enabled.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the socket send buffer size, if overridden.
    pub fn send_buffer_size(&self) -> Option<u32> {
        self.send_buffer_size
    }

    /// Returns the socket receive buffer size, if overridden.
    pub fn recv_buffer_size(&self) -> Option<u32> {
        self.recv_buffer_size
    }

    /// Returns the linger timeout, if set.
    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keep_alive: true,
            send_buffer_size: None,
            recv_buffer_size: None,
            linger: None,
        }
    }
}

/// Builder for `SocketConfig`.
#[derive(Debug, Clone, Default)]
pub struct SocketConfigBuilder {
    tcp_nodelay: Option<bool>,
    keep_alive: Option<bool>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
    linger: Option<Duration>,
}

impl SocketConfigBuilder {
    /// Creates a new socket configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = Some(enabled);
        self
    }

    /// Enables or disables TCP keep-alive.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = Some(enabled);
        self
    }

    /// Sets the socket send buffer size in bytes.
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Sets the socket receive buffer size in bytes.
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Sets the linger timeout.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    /// Builds the socket configuration.
    pub fn build(self) -> Result<SocketConfig, ConfigError> {
        if self.send_buffer_size == Some(0) || self.recv_buffer_size == Some(0) {
            return Err(ConfigError::new("socket buffer sizes must be positive"));
        }

        let defaults = SocketConfig::default();
        Ok(SocketConfig {
            tcp_nodelay: self.tcp_nodelay.unwrap_or(defaults.tcp_nodelay),
            keep_alive: self.keep_alive.unwrap_or(defaults.keep_alive),
            send_buffer_size: self.send_buffer_size,
            recv_buffer_size: self.recv_buffer_size,
            linger: self.linger,
        })
    }
}

/// Network configuration for cluster connections.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connection_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    smart_routing: bool,
    reconnect_mode: ReconnectMode,
    socket: SocketConfig,
    max_frame_size: Option<usize>,
}

impl NetworkConfig {
    /// Returns the configured cluster member addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the connection timeout duration.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the heartbeat interval duration.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns how long a connection may stay silent before it is closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Returns whether the client connects to every member and routes by
    /// partition owner.
    pub fn smart_routing(&self) -> bool {
        self.smart_routing
    }

    /// Returns the reconnect mode.
    pub fn reconnect_mode(&self) -> ReconnectMode {
        self.reconnect_mode
    }

    /// Returns the socket options.
    pub fn socket(&self) -> &SocketConfig {
        &self.socket
    }

    /// Returns the outbound fragmentation threshold, if enabled.
    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![default_address()],
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            smart_routing: true,
            reconnect_mode: ReconnectMode::default(),
            socket: SocketConfig::default(),
            max_frame_size: None,
        }
    }
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    addresses: Vec<SocketAddr>,
    connection_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    heartbeat_timeout: Option<Duration>,
    smart_routing: Option<bool>,
    reconnect_mode: Option<ReconnectMode>,
    socket: SocketConfigBuilder,
    max_frame_size: Option<usize>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the cluster member addresses, replacing any previously configured.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// Sets the connection timeout duration.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the heartbeat interval duration.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets the heartbeat timeout duration.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Enables or disables smart routing.
    pub fn smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = Some(enabled);
        self
    }

    /// Sets the reconnect mode.
    pub fn reconnect_mode(mut self, mode: ReconnectMode) -> Self {
        self.reconnect_mode = Some(mode);
        self
    }

    /// Configures socket options using a builder function.
    pub fn socket<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SocketConfigBuilder) -> SocketConfigBuilder,
    {
        self.socket = f(self.socket);
        self
    }

    /// Splits outbound messages larger than `size` bytes into fragments.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Builds the network configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the heartbeat interval is zero
    /// - the heartbeat timeout is not longer than the heartbeat interval
    /// - the max frame size is zero
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let addresses = if self.addresses.is_empty() {
            vec![default_address()]
        } else {
            self.addresses
        };

        let heartbeat_interval = self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let heartbeat_timeout = self.heartbeat_timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT);

        if heartbeat_interval.is_zero() {
            return Err(ConfigError::new("heartbeat_interval must be positive"));
        }

        if heartbeat_timeout <= heartbeat_interval {
            return Err(ConfigError::new(
                "heartbeat_timeout must exceed heartbeat_interval",
            ));
        }

        if self.max_frame_size == Some(0) {
            return Err(ConfigError::new("max_frame_size must be positive"));
        }

        Ok(NetworkConfig {
            addresses,
            connection_timeout: self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            heartbeat_interval,
            heartbeat_timeout,
            smart_routing: self.smart_routing.unwrap_or(true),
            reconnect_mode: self.reconnect_mode.unwrap_or_default(),
            socket: self.socket.build()?,
            max_frame_size: self.max_frame_size,
        })
    }
}

/// Backoff configuration for connecting and reconnecting to the cluster.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    cluster_connect_timeout: Duration,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor in `[0.0, 1.0]`.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns how long the client keeps trying to reach the cluster.
    pub fn cluster_connect_timeout(&self) -> Duration {
        self.cluster_connect_timeout
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: 0.0,
            cluster_connect_timeout: DEFAULT_CLUSTER_CONNECT_TIMEOUT,
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    cluster_connect_timeout: Option<Duration>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor applied to each backoff.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Sets how long the client keeps trying to reach the cluster.
    pub fn cluster_connect_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_connect_timeout = Some(timeout);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is less than 1.0
    /// - `jitter` is outside `[0.0, 1.0]`
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(0.0);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            cluster_connect_timeout: self
                .cluster_connect_timeout
                .unwrap_or(DEFAULT_CLUSTER_CONNECT_TIMEOUT),
        })
    }
}

/// Invocation timeout, retry and backpressure settings.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    timeout: Duration,
    retry_pause: Duration,
    max_retry_pause: Duration,
    max_concurrent: usize,
    redo_operation: bool,
}

impl InvocationConfig {
    /// Returns the default invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the pause before the first retry.
    pub fn retry_pause(&self) -> Duration {
        self.retry_pause
    }

    /// Returns the cap on the retry pause.
    pub fn max_retry_pause(&self) -> Duration {
        self.max_retry_pause
    }

    /// Returns the maximum number of in-flight invocations (0 = unbounded).
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns whether non-retryable requests are resent after connection loss.
    pub fn redo_operation(&self) -> bool {
        self.redo_operation
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_INVOCATION_TIMEOUT,
            retry_pause: DEFAULT_INVOCATION_RETRY_PAUSE,
            max_retry_pause: DEFAULT_MAX_INVOCATION_RETRY_PAUSE,
            max_concurrent: 0,
            redo_operation: false,
        }
    }
}

/// Builder for `InvocationConfig`.
#[derive(Debug, Clone, Default)]
pub struct InvocationConfigBuilder {
    timeout: Option<Duration>,
    retry_pause: Option<Duration>,
    max_retry_pause: Option<Duration>,
    max_concurrent: Option<usize>,
    redo_operation: Option<bool>,
}

impl InvocationConfigBuilder {
    /// Creates a new invocation configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default invocation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the pause before the first retry.
    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = Some(pause);
        self
    }

    /// Sets the cap on the retry pause.
    pub fn max_retry_pause(mut self, pause: Duration) -> Self {
        self.max_retry_pause = Some(pause);
        self
    }

    /// Limits the number of in-flight invocations. Zero disables the limit.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Resends non-retryable requests after connection loss.
    pub fn redo_operation(mut self, redo: bool) -> Self {
        self.redo_operation = Some(redo);
        self
    }

    /// Builds the invocation configuration.
    pub fn build(self) -> Result<InvocationConfig, ConfigError> {
        let defaults = InvocationConfig::default();
        let timeout = self.timeout.unwrap_or(defaults.timeout);
        let retry_pause = self.retry_pause.unwrap_or(defaults.retry_pause);
        let max_retry_pause = self
            .max_retry_pause
            .unwrap_or_else(|| defaults.max_retry_pause.max(retry_pause));

        if timeout.is_zero() {
            return Err(ConfigError::new("invocation timeout must be positive"));
        }

        if retry_pause > max_retry_pause {
            return Err(ConfigError::new(
                "retry_pause must not exceed max_retry_pause",
            ));
        }

        Ok(InvocationConfig {
            timeout,
            retry_pause,
            max_retry_pause,
            max_concurrent: self.max_concurrent.unwrap_or(defaults.max_concurrent),
            redo_operation: self.redo_operation.unwrap_or(defaults.redo_operation),
        })
    }
}

/// Event dispatch configuration.
#[derive(Debug, Clone)]
pub struct EventConfig {
    worker_count: usize,
    queue_capacity: usize,
}

impl EventConfig {
    /// Returns the number of event stripes.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the per-stripe queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_EVENT_WORKER_COUNT,
            queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Builder for `EventConfig`.
#[derive(Debug, Clone, Default)]
pub struct EventConfigBuilder {
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
}

impl EventConfigBuilder {
    /// Creates a new event configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of event stripes.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the per-stripe queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Builds the event configuration.
    pub fn build(self) -> Result<EventConfig, ConfigError> {
        let worker_count = self.worker_count.unwrap_or(DEFAULT_EVENT_WORKER_COUNT);
        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_EVENT_QUEUE_CAPACITY);

        if worker_count == 0 {
            return Err(ConfigError::new("event worker_count must be positive"));
        }
        if queue_capacity == 0 {
            return Err(ConfigError::new("event queue_capacity must be positive"));
        }

        Ok(EventConfig {
            worker_count,
            queue_capacity,
        })
    }
}

/// Credentials presented during authentication.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password.
    UsernamePassword {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Opaque token.
    Token(Vec<u8>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"***").finish(),
        }
    }
}

/// Security configuration for authentication.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    credentials: Option<Credentials>,
}

impl SecurityConfig {
    /// Returns the configured credentials.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// Builder for `SecurityConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    username: Option<String>,
    password: Option<String>,
    token: Option<Vec<u8>>,
}

impl SecurityConfigBuilder {
    /// Creates a new security configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets both username and password for authentication.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username(username).password(password)
    }

    /// Sets an opaque authentication token.
    pub fn token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builds the security configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Only one of `username` or `password` is set
    /// - Both credentials and token are set
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if self.token.is_some() && (self.username.is_some() || self.password.is_some()) {
            return Err(ConfigError::new(
                "token and username/password authentication are mutually exclusive",
            ));
        }

        let credentials = match (self.username, self.password, self.token) {
            (Some(username), Some(password), None) => {
                Some(Credentials::UsernamePassword { username, password })
            }
            (None, None, Some(token)) => Some(Credentials::Token(token)),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::new(
                    "both username and password must be provided together",
                ))
            }
        };

        Ok(SecurityConfig { credentials })
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    cluster_name: String,
    client_name: Option<String>,
    labels: Vec<String>,
    network: NetworkConfig,
    retry: RetryConfig,
    invocation: InvocationConfig,
    events: EventConfig,
    security: SecurityConfig,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the client name, if set.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Returns the client labels sent during authentication.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the connection retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the invocation configuration.
    pub fn invocation(&self) -> &InvocationConfig {
        &self.invocation
    }

    /// Returns the event dispatch configuration.
    pub fn events(&self) -> &EventConfig {
        &self.events
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    cluster_name: Option<String>,
    client_name: Option<String>,
    labels: Vec<String>,
    network: NetworkConfigBuilder,
    retry: RetryConfigBuilder,
    invocation: InvocationConfigBuilder,
    events: EventConfigBuilder,
    security: SecurityConfigBuilder,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Sets the client name reported to the cluster.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Adds a client label.
    pub fn add_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Replaces the client labels.
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels = labels.into_iter().collect();
        self
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures connection retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Configures invocation settings using a builder function.
    pub fn invocation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(InvocationConfigBuilder) -> InvocationConfigBuilder,
    {
        self.invocation = f(self.invocation);
        self
    }

    /// Configures event dispatch using a builder function.
    pub fn events<F>(mut self, f: F) -> Self
    where
        F: FnOnce(EventConfigBuilder) -> EventConfigBuilder,
    {
        self.events = f(self.events);
        self
    }

    /// Configures security settings using a builder function.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the cluster member addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.addresses(addresses);
        self
    }

    /// Sets username/password credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security = self.security.credentials(username, password);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let cluster_name = self
            .cluster_name
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        if cluster_name.is_empty() {
            return Err(ConfigError::new("cluster_name must not be empty"));
        }

        Ok(ClientConfig {
            cluster_name,
            client_name: self.client_name,
            labels: self.labels,
            network: self.network.build()?,
            retry: self.retry.build()?,
            invocation: self.invocation.build()?,
            events: self.events.build()?,
            security: self.security.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(config.cluster_name(), "dev");
        assert_eq!(config.network().addresses(), &[default_address()]);
        assert!(config.network().smart_routing());
        assert_eq!(config.network().reconnect_mode(), ReconnectMode::On);
        assert_eq!(config.network().max_frame_size(), None);
        assert_eq!(config.invocation().max_concurrent(), 0);
        assert!(config.security().credentials().is_none());
    }

    #[test]
    fn test_builder_empty_cluster_name_fails() {
        let result = ClientConfig::builder().cluster_name("").build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cluster_name must not be empty"));
    }

    #[test]
    fn test_builder_nested_sections() {
        let config = ClientConfig::builder()
            .cluster_name("production")
            .client_name("orders-service")
            .add_label("region:eu")
            .network(|n| {
                n.smart_routing(false)
                    .reconnect_mode(ReconnectMode::Async)
                    .heartbeat_interval(Duration::from_secs(2))
                    .heartbeat_timeout(Duration::from_secs(10))
                    .max_frame_size(8192)
                    .socket(|s| s.tcp_nodelay(false).send_buffer_size(65536))
            })
            .invocation(|i| i.timeout(Duration::from_secs(3)).max_concurrent(64))
            .events(|e| e.worker_count(2))
            .build()
            .unwrap();

        assert_eq!(config.client_name(), Some("orders-service"));
        assert_eq!(config.labels(), &["region:eu".to_string()]);
        assert!(!config.network().smart_routing());
        assert!(config.network().reconnect_mode().is_async());
        assert_eq!(config.network().max_frame_size(), Some(8192));
        assert!(!config.network().socket().tcp_nodelay());
        assert_eq!(config.network().socket().send_buffer_size(), Some(65536));
        assert_eq!(config.invocation().timeout(), Duration::from_secs(3));
        assert_eq!(config.invocation().max_concurrent(), 64);
        assert_eq!(config.events().worker_count(), 2);
    }

    #[test]
    fn test_retry_validation() {
        assert!(RetryConfigBuilder::new()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(RetryConfigBuilder::new().multiplier(0.5).build().is_err());
        assert!(RetryConfigBuilder::new().jitter(1.5).build().is_err());
        assert_eq!(RetryConfigBuilder::new().jitter(0.2).build().unwrap().jitter(), 0.2);
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let result = NetworkConfigBuilder::new()
            .heartbeat_interval(Duration::from_secs(10))
            .heartbeat_timeout(Duration::from_secs(5))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invocation_retry_pause_defaults_cover_custom_pause() {
        let config = InvocationConfigBuilder::new()
            .retry_pause(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.max_retry_pause(), Duration::from_secs(2));

        assert!(InvocationConfigBuilder::new()
            .retry_pause(Duration::from_secs(2))
            .max_retry_pause(Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[test]
    fn test_event_config_rejects_zero_workers() {
        assert!(EventConfigBuilder::new().worker_count(0).build().is_err());
    }

    #[test]
    fn test_security_credentials() {
        let config = SecurityConfigBuilder::new()
            .credentials("admin", "secret")
            .build()
            .unwrap();
        assert_eq!(
            config.credentials(),
            Some(&Credentials::UsernamePassword {
                username: "admin".into(),
                password: "secret".into()
            })
        );
        assert!(!format!("{:?}", config).contains("secret"));

        assert!(SecurityConfigBuilder::new().username("admin").build().is_err());
        assert!(SecurityConfigBuilder::new()
            .username("a")
            .password("b")
            .token(b"t".to_vec())
            .build()
            .is_err());
        assert_eq!(
            SecurityConfigBuilder::new().token(b"t".to_vec()).build().unwrap().credentials(),
            Some(&Credentials::Token(b"t".to_vec()))
        );
    }

    #[test]
    fn test_config_error_into_grid_error() {
        let err: gridwire_core::GridError = ConfigError::new("bad").into();
        assert!(matches!(err, gridwire_core::GridError::Configuration(ref m) if m == "bad"));
    }
}
