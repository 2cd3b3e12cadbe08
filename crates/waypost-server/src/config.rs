use std::time::Duration;

use waypost_core::prefix;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3_600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(18_000);
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(7_200);

/// Registry tuning. Intervals are fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Prefixes whose registration channel the registry listens on.
    /// `None` is the unprefixed namespace.
    pub prefixes: Vec<Option<String>>,
    pub ping_interval: Duration,
    pub sweep_interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefixes: vec![None],
            ping_interval: DEFAULT_PING_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

impl RegistryConfig {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefixes: vec![prefix::normalize(Some(prefix.into()))],
            ..Self::default()
        }
    }

    /// Reads `WAYPOST_PREFIXES`, `WAYPOST_PING_INTERVAL_SECS`,
    /// `WAYPOST_SWEEP_INTERVAL_SECS` and `WAYPOST_IDLE_THRESHOLD_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            prefixes: lookup("WAYPOST_PREFIXES")
                .map(|raw| parse_prefixes(&raw))
                .unwrap_or(defaults.prefixes),
            ping_interval: secs("WAYPOST_PING_INTERVAL_SECS", defaults.ping_interval),
            sweep_interval: secs("WAYPOST_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            idle_threshold: secs("WAYPOST_IDLE_THRESHOLD_SECS", defaults.idle_threshold),
        }
    }

    pub fn idle_threshold_millis(&self) -> u64 {
        self.idle_threshold.as_millis() as u64
    }
}

/// `"dev,prod,"` -> `[Some("dev"), Some("prod"), None]`. Duplicates are dropped.
fn parse_prefixes(raw: &str) -> Vec<Option<String>> {
    let mut prefixes = Vec::new();
    for entry in raw.split(',') {
        let entry = prefix::normalize(Some(entry.trim().to_string()));
        if !prefixes.contains(&entry) {
            prefixes.push(entry);
        }
    }
    prefixes
}
