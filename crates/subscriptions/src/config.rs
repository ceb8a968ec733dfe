use std::time::Duration;

/// Settings of the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Warn when this many events are waiting in the queue. `None` disables the alert.
    pub alert_threshold: Option<usize>,
    /// Minimal time between two backlog warnings.
    pub alert_cooldown: Duration,
    /// Upper bound of deliveries in flight at the same time.
    pub max_concurrent_deliveries: usize,
    /// Record queue and delivery metrics.
    pub metrics: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            alert_threshold: None,
            alert_cooldown: Duration::from_secs(5 * 60),
            max_concurrent_deliveries: 500,
            metrics: true,
        }
    }
}

/// Settings applied to every client proxy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often the protocol gets a chance to send a keep-alive. `None` disables it.
    pub keep_alive_interval: Option<Duration>,
    /// How long a client may stay connected without initializing. `None` disables it.
    pub initialization_timeout: Option<Duration>,
    /// Maximum number of subscriptions a single client may hold.
    pub max_subscriptions: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Some(Duration::from_secs(2 * 60)),
            initialization_timeout: Some(Duration::from_secs(30)),
            max_subscriptions: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub client: ClientConfig,
    /// Sub-protocols offered to clients, in order of preference.
    pub supported_protocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            client: ClientConfig::default(),
            supported_protocols: vec![
                crate::protocol::graphql_transport_ws::PROTOCOL_NAME.to_string(),
            ],
        }
    }
}

impl Config {
    /// Short timers and a small delivery pool, for tests and local runs.
    pub fn local_testing() -> Self {
        Self {
            dispatch: DispatchConfig {
                alert_threshold: Some(100),
                alert_cooldown: Duration::from_secs(1),
                max_concurrent_deliveries: 16,
                metrics: false,
            },
            client: ClientConfig {
                keep_alive_interval: Some(Duration::from_secs(1)),
                initialization_timeout: Some(Duration::from_secs(3)),
                max_subscriptions: Some(32),
            },
            ..Default::default()
        }
    }
}
