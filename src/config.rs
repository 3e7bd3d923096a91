use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0/";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub teams: TeamsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TeamsConfig {
    /// Static bearer token presented on every Graph request.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TeamsConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    #[serde(default)]
    pub servers: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub channel_topic: Option<String>,
    #[serde(default)]
    pub chat_topic: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

/// Treats an empty value the same as a missing one.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl TeamsConfig {
    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    /// Per-request timeout for Graph calls. `0` disables it.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl KafkaConfig {
    pub fn channel_topic(&self) -> Option<&str> {
        non_empty(&self.channel_topic)
    }

    pub fn chat_topic(&self) -> Option<&str> {
        non_empty(&self.chat_topic)
    }

    /// Configured topics in subscription order (channel first).
    pub fn topics(&self) -> Vec<&str> {
        [self.channel_topic(), self.chat_topic()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// librdkafka consumer properties. A username switches the connection
    /// to SASL_SSL with the PLAIN mechanism.
    #[cfg_attr(not(feature = "kafka"), allow(dead_code))]
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        let mut props = Vec::new();
        if let Some(servers) = non_empty(&self.servers) {
            props.push(("bootstrap.servers", servers.to_string()));
        }
        if let Some(group_id) = non_empty(&self.group_id) {
            props.push(("group.id", group_id.to_string()));
        }
        if let Some(username) = non_empty(&self.username) {
            props.push(("security.protocol", "SASL_SSL".to_string()));
            props.push(("sasl.mechanism", "PLAIN".to_string()));
            props.push(("sasl.username", username.to_string()));
            props.push((
                "sasl.password",
                self.password.clone().unwrap_or_default(),
            ));
        }
        props.push(("auto.offset.reset", "smallest".to_string()));
        props
    }
}

impl Config {
    /// Load configuration: optional TOML file first, then environment
    /// variables (including those from `.env`) on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from an environment lookup. Empty variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("TEAMS_ACCESS_TOKEN") {
            self.teams.access_token = Some(v);
        }
        if let Some(v) = get("TEAMS_BASE_URL") {
            self.teams.base_url = v;
        }
        if let Some(v) = get("TEAMS_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.teams.timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid TEAMS_TIMEOUT_SECS: {}", v),
            }
        }
        if let Some(v) = get("BIND_ADDRESS") {
            self.server.bind_address = v;
        }

        let kafka = &mut self.kafka;
        for (key, slot) in [
            ("KAFKA_SERVERS", &mut kafka.servers),
            ("KAFKA_GROUP_ID", &mut kafka.group_id),
            ("KAFKA_USERNAME", &mut kafka.username),
            ("KAFKA_PASSWORD", &mut kafka.password),
            ("KAFKA_CHANNEL_TOPIC", &mut kafka.channel_topic),
            ("KAFKA_CHAT_TOPIC", &mut kafka.chat_topic),
        ] {
            if let Some(v) = get(key) {
                *slot = Some(v);
            }
        }
    }
}
