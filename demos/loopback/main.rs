use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use demos::{broker::Broker, Config, EnvOverrides};
use flexi_logger::Logger;
use gecko_mqtt_client::{network::StreamConnection, Client, MessageHandler};
use log::{info, warn};
use tokio::io;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Subscribe through an in-process broker, then resubscribe")]
struct Args {
    /// 配置文件路径
    #[clap(long, default_value = "./loopback.toml")]
    config: String,
    /// 服务端授予的最大服务质量
    #[clap(long, default_value_t = 2)]
    max_qos: u8,
    /// 拒绝以此为前缀的主题
    #[clap(long)]
    refuse: Option<String>,
}

struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, topic: &str, payload: Bytes) {
        info!("message on {}: {} bytes", topic, payload.len());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("info")?.start()?;
    let args = Args::parse();

    // 获取配置
    let mut cfg = Config::from_path(&args.config).await?;
    cfg.apply(EnvOverrides::from_env()?);
    let max_qos = args.max_qos.try_into()?;

    // 启动服务端
    let buf_size = cfg.client.read_buf_size;
    let (client_side, broker_side) = io::duplex(buf_size);
    let mut broker = Broker::new(StreamConnection::new(broker_side, buf_size), max_qos);
    if let Some(prefix) = &args.refuse {
        broker = broker.refuse(prefix);
    }
    let broker = tokio::spawn(broker.serve());

    let mut client = Client::new(
        cfg.client.clone(),
        StreamConnection::new(client_side, buf_size),
    );
    let handler = Arc::new(LogHandler);

    for topic in &cfg.topics {
        let qos = topic.qos()?;
        match client.subscribe(&topic.filter, qos, handler.clone()).await {
            Ok(granted) => info!("{} granted {:?}", topic.filter, granted),
            Err(e) => warn!("subscribe {} failed ({:?}): {}", topic.filter, e.kind(), e),
        }
    }

    // 模拟重连之后恢复订阅
    client.resubscribe().await?;
    for (index, subscription) in client.subscriptions().iter() {
        info!(
            "slot {}: {} requested {:?}, granted {:?}",
            index, subscription.filter, subscription.qos, subscription.granted
        );
    }

    drop(client);
    broker.await??;
    Ok(())
}
