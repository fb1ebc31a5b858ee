use std::time::Duration;

use tokio::{fs, io::AsyncReadExt};

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_BUF_SIZE: usize = 512;
const DEFAULT_MAX_SUBSCRIPTIONS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Read config file error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Parse config error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 每次请求等待回复的超时时间
    pub command_timeout_ms: u64,
    /// 写缓冲区大小，决定了单个 subscribe 报文的最大长度
    pub write_buf_size: usize,
    /// 读缓冲区大小，决定了单个接收报文的最大长度
    pub read_buf_size: usize,
    /// 订阅表容量
    pub max_subscriptions: usize,
    /// 是否校验 suback 的包 id 与 subscribe 一致
    pub strict_packet_id: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            write_buf_size: DEFAULT_BUF_SIZE,
            read_buf_size: DEFAULT_BUF_SIZE,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            strict_packet_id: false,
        }
    }
}

impl ClientConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let mut file = fs::File::open(path).await?;
        let mut s = String::new();
        file.read_to_string(&mut s).await?;

        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str::<Config>(s)?)
    }
}
