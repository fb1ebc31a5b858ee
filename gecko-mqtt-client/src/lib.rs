//! mqtt 3.1.1 客户端的订阅核心
//! subscribe / suback 报文编解码，订阅表，以及带超时的订阅请求和断线重连后的恢复订阅

use async_trait::async_trait;
use bytes::Bytes;

pub use client::Client;
pub use error::{Error, ErrorKind};
pub use protocol::{ClientState, Subscription, SubscriptionTable};

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

/// 订阅主题收到消息时的回调，由用户实现
/// 回调需要的上下文由实现者自己持有
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, payload: Bytes);
}

pub struct HandlerNoop;

#[async_trait]
impl MessageHandler for HandlerNoop {
    async fn handle(&self, _topic: &str, _payload: Bytes) {}
}
