//! Environment-driven configuration
//!
//! Every knob has a default so the pipeline runs with zero configuration
//! against a local broker/cache.

use std::time::Duration;

/// Host/port/credentials of one Redis endpoint
///
/// Broker and cache are configured independently even when they point at the
/// same server.
#[derive(Debug, Clone)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl RedisEndpoint {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Pipeline configuration shared by all service binaries
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Symbols every connector subscribes to
    pub symbols: Vec<String>,
    /// Exchange names the aggregation fans out over
    pub exchanges: Vec<String>,
    /// Wait between connector reconnect attempts
    pub reconnect_delay: Duration,
    /// Fallback keepalive interval; KuCoin overrides it from the handshake
    pub ping_interval: Duration,
    /// Queue broker endpoint
    pub broker: RedisEndpoint,
    /// Cache / pub-sub endpoint
    pub cache: RedisEndpoint,
    /// Bind address of the fan-out gateway
    pub gateway_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            exchanges: vec!["Binance".to_string(), "KuCoin".to_string()],
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_millis(18_000),
            broker: RedisEndpoint {
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
            },
            cache: RedisEndpoint {
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
            },
            gateway_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            symbols: env_list("SYMBOLS").unwrap_or(defaults.symbols),
            exchanges: env_list("EXCHANGES").unwrap_or(defaults.exchanges),
            reconnect_delay: env_parse("RECONNECT_DELAY_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            ping_interval: env_parse("PING_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ping_interval),
            broker: endpoint_from_env("BROKER", defaults.broker),
            cache: endpoint_from_env("REDIS", defaults.cache),
            gateway_addr: std::env::var("GATEWAY_ADDR").unwrap_or(defaults.gateway_addr),
        }
    }
}

fn endpoint_from_env(prefix: &str, defaults: RedisEndpoint) -> RedisEndpoint {
    RedisEndpoint {
        host: std::env::var(format!("{prefix}_HOST")).unwrap_or(defaults.host),
        port: env_parse(&format!("{prefix}_PORT")).unwrap_or(defaults.port),
        password: std::env::var(format!("{prefix}_PASSWORD"))
            .ok()
            .filter(|p| !p.is_empty())
            .or(defaults.password),
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let values: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() { None } else { Some(values) }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
