use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TRUSTED_ORIGIN: &str = "http://127.0.0.1:5000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);
pub const DEFAULT_INBOUND_QUEUE_CAP: usize = 256;
pub const DEFAULT_COMMAND_QUEUE_CAP: usize = 64;

const ADMIN_PATH: &str = "/vote_admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub trusted_origin: String,
    pub admin_url: String,
    pub poll_interval: Duration,
    pub inbound_queue_cap: usize,
    pub command_queue_cap: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::with_origin(DEFAULT_TRUSTED_ORIGIN)
    }
}

impl StationConfig {
    pub fn with_origin(origin: impl Into<String>) -> Self {
        let trusted_origin = origin.into();
        let admin_url = admin_url_for(&trusted_origin);

        Self {
            trusted_origin,
            admin_url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inbound_queue_cap: DEFAULT_INBOUND_QUEUE_CAP,
            command_queue_cap: DEFAULT_COMMAND_QUEUE_CAP,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin = lookup("GOVERNANCE_TRUSTED_ORIGIN")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_TRUSTED_ORIGIN.to_string());
        let mut config = Self::with_origin(origin);

        if let Some(admin_url) = lookup("GOVERNANCE_ADMIN_URL")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
        {
            config.admin_url = admin_url;
        }

        if let Some(ms) = parse_positive(&lookup, "GOVERNANCE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(cap) = parse_positive(&lookup, "GOVERNANCE_INBOUND_QUEUE_CAP") {
            config.inbound_queue_cap = usize::try_from(cap).unwrap_or(DEFAULT_INBOUND_QUEUE_CAP);
        }

        if let Some(cap) = parse_positive(&lookup, "GOVERNANCE_COMMAND_QUEUE_CAP") {
            config.command_queue_cap = usize::try_from(cap).unwrap_or(DEFAULT_COMMAND_QUEUE_CAP);
        }

        config
    }
}

pub fn admin_url_for(origin: &str) -> String {
    format!("{}{ADMIN_PATH}", origin.trim_end_matches('/'))
}

pub fn parse_positive<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;

    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid setting; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_local_deployment() {
        let config = StationConfig::from_lookup(lookup(&[]));
        assert_eq!(config.trusted_origin, "http://127.0.0.1:5000");
        assert_eq!(config.admin_url, "http://127.0.0.1:5000/vote_admin");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config, StationConfig::default());
    }

    #[test]
    fn admin_url_follows_overridden_origin() {
        let config = StationConfig::from_lookup(lookup(&[(
            "GOVERNANCE_TRUSTED_ORIGIN",
            "https://vote.example.org/",
        )]));
        assert_eq!(config.trusted_origin, "https://vote.example.org/");
        assert_eq!(config.admin_url, "https://vote.example.org/vote_admin");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = StationConfig::from_lookup(lookup(&[
            ("GOVERNANCE_ADMIN_URL", "https://admin.example.org/setup"),
            ("GOVERNANCE_POLL_INTERVAL_MS", "500"),
            ("GOVERNANCE_INBOUND_QUEUE_CAP", "8"),
            ("GOVERNANCE_COMMAND_QUEUE_CAP", "4"),
        ]));
        assert_eq!(config.admin_url, "https://admin.example.org/setup");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.inbound_queue_cap, 8);
        assert_eq!(config.command_queue_cap, 4);
    }

    #[test]
    fn zero_and_garbage_fall_back() {
        let config = StationConfig::from_lookup(lookup(&[
            ("GOVERNANCE_POLL_INTERVAL_MS", "0"),
            ("GOVERNANCE_INBOUND_QUEUE_CAP", "lots"),
        ]));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.inbound_queue_cap, DEFAULT_INBOUND_QUEUE_CAP);
    }
}
