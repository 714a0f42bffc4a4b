//! Server settings, read from `ROOMBOOK_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Appends since the last compaction before the WAL is compacted.
    pub compact_threshold: u64,
    pub tick: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Zero(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Zero(var) => write!(f, "{var} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source; unset and empty keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let max_connections: usize = parse(&get, "ROOMBOOK_MAX_CONNECTIONS")?.unwrap_or(256);
        if max_connections == 0 {
            return Err(ConfigError::Zero("ROOMBOOK_MAX_CONNECTIONS"));
        }
        let tick_secs: u64 = parse(&get, "ROOMBOOK_TICK_SECS")?.unwrap_or(60);
        if tick_secs == 0 {
            return Err(ConfigError::Zero("ROOMBOOK_TICK_SECS"));
        }

        Ok(Self {
            port: parse(&get, "ROOMBOOK_PORT")?.unwrap_or(5433),
            bind: get("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: get("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into()),
            max_connections,
            compact_threshold: parse(&get, "ROOMBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            tick: Duration::from_secs(tick_secs),
            metrics_port: parse(&get, "ROOMBOOK_METRICS_PORT")?,
            tls_cert: get("ROOMBOOK_TLS_CERT"),
            tls_key: get("ROOMBOOK_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.password, "roombook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.tick, Duration::from_secs(60));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.wal_path(), PathBuf::from("./data/roombook.wal"));
        assert!(c.tls_cert.is_none());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("ROOMBOOK_PORT", "6000"),
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_TICK_SECS", "5"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(c.listen_addr(), "127.0.0.1:6000");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/roombook/roombook.wal"));
        assert_eq!(c.tick, Duration::from_secs(5));
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn empty_values_take_defaults() {
        let c = config(&[("ROOMBOOK_PORT", ""), ("ROOMBOOK_PASSWORD", "")]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.password, "roombook");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            config(&[("ROOMBOOK_PORT", "http")]),
            Err(ConfigError::Invalid {
                var: "ROOMBOOK_PORT",
                value: "http".into()
            })
        );
        assert_eq!(
            config(&[("ROOMBOOK_TICK_SECS", "0")]),
            Err(ConfigError::Zero("ROOMBOOK_TICK_SECS"))
        );
        assert!(config(&[("ROOMBOOK_MAX_CONNECTIONS", "-1")]).is_err());
    }
}
