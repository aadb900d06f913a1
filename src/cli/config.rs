use crate::connection::RetryPolicy;
use crate::server::{Announcement, ServerId, StaticServer, VersionMap};
use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Broker configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Name of the grid, for display
    pub name: String,

    /// Preconfigured servers, `{server_id: {ann: Announcement}}`
    #[serde(default)]
    pub servers: StaticServers,

    #[serde(default)]
    pub settings: BrokerSettings,
}

/// Static server entries, kept in the order the file lists them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticServers(Vec<(ServerId, StaticServer)>);

impl StaticServers {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, server_id: &str) -> Option<&StaticServer> {
        self.0
            .iter()
            .find(|(id, _)| id == server_id)
            .map(|(_, server)| server)
    }

    /// Add a server; a repeated id replaces the earlier entry in place
    pub fn insert(&mut self, server_id: ServerId, server: StaticServer) {
        match self.0.iter_mut().find(|(id, _)| *id == server_id) {
            Some(entry) => entry.1 = server,
            None => self.0.push((server_id, server)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServerId, &StaticServer)> {
        self.0.iter().map(|(id, server)| (id, server))
    }
}

impl Serialize for StaticServers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for StaticServers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StaticServersVisitor;

        impl<'de> Visitor<'de> for StaticServersVisitor {
            type Value = StaticServers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of server id to static server")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<StaticServers, A::Error> {
                let mut servers = StaticServers::default();
                while let Some((server_id, server)) = map.next_entry()? {
                    servers.insert(server_id, server);
                }
                Ok(servers)
            }
        }

        deserializer.deserialize_map(StaticServersVisitor)
    }
}

/// Broker behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Servers that must be connected before the grid counts as ready
    #[serde(default = "default_shares_happy")]
    pub shares_happy: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connection attempts before a server is marked failed; 0 retries forever
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_reconnect")]
    pub reconnect_on_loss: bool,

    /// Port of the status API
    #[serde(default = "default_status_port")]
    pub status_port: u16,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            shares_happy: default_shares_happy(),
            connect_timeout_secs: default_connect_timeout(),
            max_connect_attempts: default_max_connect_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            reconnect_on_loss: default_reconnect(),
            status_port: default_status_port(),
        }
    }
}

fn default_shares_happy() -> usize {
    7
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_connect_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_reconnect() -> bool {
    true
}

fn default_status_port() -> u16 {
    8080
}

impl BrokerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_connect_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            reconnect_on_loss: self.reconnect_on_loss,
            ..Default::default()
        }
    }
}

impl BrokerConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: BrokerConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .context(format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Static servers in the form the broker loads them
    pub fn static_servers(&self) -> Vec<(ServerId, StaticServer)> {
        self.servers
            .iter()
            .map(|(id, server)| (id.clone(), server.clone()))
            .collect()
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        let mut servers = StaticServers::default();
        for (i, nickname) in ["alpha", "beta", "gamma"].iter().enumerate() {
            let mut version = VersionMap::new();
            version.insert(
                crate::server::version::STORAGE_PROTOCOL_V1.to_string(),
                serde_json::json!({ "maximum-immutable-share-size": 4294967295u64 }),
            );

            let ann = Announcement::storage(&format!(
                "pb://{}@tcp:127.0.0.1:{}/storage",
                "w2hqnbaa25yw4qgcvghl5psa3srpfgw3",
                3457 + i
            ))
            .with_permutation_seed("aaaaaaaaaaaaaaaaaaaaaaaa")
            .with_nickname(nickname)
            .with_version(version);

            servers.insert(format!("v0-{}-{}", nickname, i), StaticServer { ann });
        }

        Self {
            name: "Sample Grid".to_string(),
            servers,
            settings: BrokerSettings {
                shares_happy: 3,
                ..Default::default()
            },
        }
    }
}
