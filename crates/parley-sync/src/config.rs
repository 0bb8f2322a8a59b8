use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Session tunables, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base URL
    pub api_url: String,
    /// Push connection URL
    pub gateway_url: String,
    /// Inactivity after the last keystroke before "stop typing" is sent
    pub typing_idle: Duration,
    /// Safety expiry of the remote typing indicator
    pub typing_expiry: Duration,
    /// How long a seen update for an unknown message is kept around
    pub seen_buffer_window: Duration,
    pub seen_buffer_capacity: usize,
    /// Ping interval; two missed pongs drop the connection
    pub heartbeat: Duration,
}

const DEFAULT_API_URL: &str = "http://localhost:5000";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            gateway_url: gateway_from_api(DEFAULT_API_URL),
            typing_idle: Duration::from_millis(3000),
            typing_expiry: Duration::from_millis(5000),
            seen_buffer_window: Duration::from_millis(10_000),
            seen_buffer_capacity: 256,
            heartbeat: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let api_url = std::env::var("PARLEY_API_URL")
            .unwrap_or_else(|_| defaults.api_url.clone())
            .trim_end_matches('/')
            .to_string();
        let gateway_url =
            std::env::var("PARLEY_GATEWAY_URL").unwrap_or_else(|_| gateway_from_api(&api_url));

        Ok(Self {
            api_url,
            gateway_url,
            typing_idle: env_millis("PARLEY_TYPING_IDLE_MS", defaults.typing_idle)?,
            typing_expiry: env_millis("PARLEY_TYPING_EXPIRY_MS", defaults.typing_expiry)?,
            seen_buffer_window: env_millis("PARLEY_SEEN_BUFFER_MS", defaults.seen_buffer_window)?,
            seen_buffer_capacity: match std::env::var("PARLEY_SEEN_BUFFER_CAP") {
                Ok(raw) => raw
                    .parse()
                    .with_context(|| format!("PARLEY_SEEN_BUFFER_CAP: invalid value {raw:?}"))?,
                Err(_) => defaults.seen_buffer_capacity,
            },
            heartbeat: match std::env::var("PARLEY_HEARTBEAT_SECS") {
                Ok(raw) => parse_heartbeat(&raw).context("PARLEY_HEARTBEAT_SECS")?,
                Err(_) => defaults.heartbeat,
            },
        })
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("{name}: invalid value {raw:?}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(default),
    }
}

/// Ping interval in whole seconds. Zero is rejected: the socket task cannot tick at it.
fn parse_heartbeat(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid value {raw:?}"))?;
    if secs == 0 {
        bail!("heartbeat interval must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

/// `http://host:5000` -> `ws://host:5000/gateway`
fn gateway_from_api(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/gateway")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_follows_api_scheme() {
        assert_eq!(gateway_from_api("http://localhost:5000"), "ws://localhost:5000/gateway");
        assert_eq!(gateway_from_api("https://chat.example/"), "wss://chat.example/gateway");
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        assert_eq!(parse_heartbeat("30").unwrap(), Duration::from_secs(30));
        assert!(parse_heartbeat("0").is_err());
        assert!(parse_heartbeat("soon").is_err());
    }

    #[test]
    fn defaults_match_typing_contract() {
        let config = SyncConfig::default();
        assert_eq!(config.typing_idle, Duration::from_millis(3000));
        assert!(config.typing_expiry > config.typing_idle);
    }
}
