//! 示例程序共用的配置和内存中的测试服务端

use gecko_mqtt_client::{config::ClientConfig, network::QoS};
use tokio::{fs, io::AsyncReadExt};

pub mod broker;

/// 环境变量前缀，例如 GECKO_MQTT_COMMAND_TIMEOUT_MS=500
const ENV_PREFIX: &str = "GECKO_MQTT_";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Read config file error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Parse config error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Read env error: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid qos {qos} for topic {filter}")]
    InvalidQoS { filter: String, qos: u8 },
}

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Debug, serde::Deserialize)]
pub struct Topic {
    pub filter: String,
    #[serde(default)]
    pub qos: u8,
}

impl Topic {
    pub fn qos(&self) -> Result<QoS, Error> {
        QoS::try_from(self.qos).map_err(|_| Error::InvalidQoS {
            filter: self.filter.clone(),
            qos: self.qos,
        })
    }
}

/// 可以通过环境变量覆盖的配置项
#[derive(Debug, Default, serde::Deserialize)]
pub struct EnvOverrides {
    pub command_timeout_ms: Option<u64>,
    pub max_subscriptions: Option<usize>,
    pub strict_packet_id: Option<bool>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, Error> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?)
    }
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let mut file = fs::File::open(path).await?;
        let mut s = String::new();
        file.read_to_string(&mut s).await?;

        Ok(toml::from_str::<Config>(&s)?)
    }

    pub fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(ms) = overrides.command_timeout_ms {
            self.client.command_timeout_ms = ms;
        }
        if let Some(n) = overrides.max_subscriptions {
            self.client.max_subscriptions = n;
        }
        if let Some(strict) = overrides.strict_packet_id {
            self.client.strict_packet_id = strict;
        }
    }
}
