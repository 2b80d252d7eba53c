use std::path::PathBuf;

/// Server settings, read from `VIEWINGS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub sync_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub catalog: Option<PathBuf>,
    pub notify_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            data_dir: PathBuf::from("./data"),
            password: "viewings".into(),
            sync_password: "viewings-sync".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            catalog: None,
            notify_queue: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("VIEWINGS_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "VIEWINGS_PORT").unwrap_or(defaults.port),
            data_dir: lookup("VIEWINGS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("VIEWINGS_PASSWORD").unwrap_or(defaults.password),
            sync_password: lookup("VIEWINGS_SYNC_PASSWORD").unwrap_or(defaults.sync_password),
            max_connections: parsed(&lookup, "VIEWINGS_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "VIEWINGS_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "VIEWINGS_METRICS_PORT"),
            catalog: lookup("VIEWINGS_CATALOG").map(PathBuf::from),
            notify_queue: parsed(&lookup, "VIEWINGS_NOTIFY_QUEUE").unwrap_or(defaults.notify_queue),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("viewings.wal")
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}
