use std::time::Duration;

use url::Url;

use crate::error::{ClientError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_HEARTBEAT_SECS: u64 = 25;
const DEFAULT_RECONNECT_SECS: u64 = 5;

/// Where the hosted backend lives and how to talk to it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    pub url: Url,
    /// Public API key sent with every request.
    pub anon_key: String,
    /// User session token. Without one every call runs anonymously.
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub heartbeat: Duration,
    /// Pause between realtime reconnect attempts.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            anon_key: anon_key.into(),
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_SECS),
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Read `FOODSHARE_*` variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ClientError::Config(format!("{} is not set", key)))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|_| ClientError::Config(format!("{} must be a number of seconds, got {:?}", key, raw))),
                None => Ok(Duration::from_secs(default)),
            }
        };
        // Tokio intervals and request timeouts reject a zero period.
        let nonzero = |key: &str, default: u64| -> Result<Duration> {
            let value = seconds(key, default)?;
            if value.is_zero() {
                return Err(ClientError::Config(format!("{} must be at least one second", key)));
            }
            Ok(value)
        };

        let mut config = Self::new(&required("FOODSHARE_URL")?, required("FOODSHARE_ANON_KEY")?)?;
        config.access_token = lookup("FOODSHARE_ACCESS_TOKEN").filter(|t| !t.trim().is_empty());
        config.timeout = nonzero("FOODSHARE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        config.heartbeat = nonzero("FOODSHARE_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)?;
        config.reconnect_delay = seconds("FOODSHARE_RECONNECT_SECS", DEFAULT_RECONNECT_SECS)?;
        Ok(config)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.url.join(path)?)
    }

    pub fn rest_url(&self, table: &str) -> Result<Url> {
        self.endpoint(&format!("rest/v1/{}", table))
    }

    pub fn rpc_url(&self, function: &str) -> Result<Url> {
        self.endpoint(&format!("rest/v1/rpc/{}", function))
    }

    pub fn auth_user_url(&self) -> Result<Url> {
        self.endpoint("auth/v1/user")
    }

    /// Realtime websocket endpoint: same host, `ws`/`wss` scheme.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.endpoint("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot derive websocket URL from {}", self.url)))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_required_and_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("FOODSHARE_URL", "https://demo.supabase.co"),
            ("FOODSHARE_ANON_KEY", "anon"),
        ]))
        .unwrap();

        assert_eq!(config.anon_key, "anon");
        assert_eq!(config.access_token, None);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.heartbeat, Duration::from_secs(25));
    }

    #[test]
    fn missing_url_is_reported() {
        let err = ClientConfig::from_lookup(lookup(&[("FOODSHARE_ANON_KEY", "anon")])).unwrap_err();
        assert!(err.to_string().contains("FOODSHARE_URL"));
    }

    #[test]
    fn bad_timeout_is_reported() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("FOODSHARE_URL", "https://demo.supabase.co"),
            ("FOODSHARE_ANON_KEY", "anon"),
            ("FOODSHARE_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn zero_heartbeat_or_timeout_is_refused() {
        for key in ["FOODSHARE_HEARTBEAT_SECS", "FOODSHARE_TIMEOUT_SECS"] {
            let err = ClientConfig::from_lookup(lookup(&[
                ("FOODSHARE_URL", "https://demo.supabase.co"),
                ("FOODSHARE_ANON_KEY", "anon"),
                (key, "0"),
            ]))
            .unwrap_err();
            assert!(matches!(&err, ClientError::Config(m) if m.contains(key)), "{key}: {err}");
        }

        let config = ClientConfig::from_lookup(lookup(&[
            ("FOODSHARE_URL", "https://demo.supabase.co"),
            ("FOODSHARE_ANON_KEY", "anon"),
            ("FOODSHARE_RECONNECT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.reconnect_delay, Duration::ZERO);
    }

    #[test]
    fn endpoints() {
        let config = ClientConfig::new("https://demo.supabase.co", "anon").unwrap();

        assert_eq!(
            config.rest_url("messages").unwrap().as_str(),
            "https://demo.supabase.co/rest/v1/messages"
        );
        assert_eq!(
            config.rpc_url("get_or_create_conversation").unwrap().as_str(),
            "https://demo.supabase.co/rest/v1/rpc/get_or_create_conversation"
        );
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = ClientConfig::new("http://127.0.0.1:54321", "anon").unwrap();
        assert!(local.realtime_url().unwrap().as_str().starts_with("ws://127.0.0.1:54321/"));
    }
}
