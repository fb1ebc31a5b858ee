use crate::{
    network::{conn, packet},
    protocol::{state, ClientState},
};

/// 错误的大类，调用方据此决定重试，重新配置或者放弃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 参数不合法
    InvalidArgument,
    /// 发送缓冲区不足
    BufferTooShort,
    /// 接收缓冲区不足
    RxBufferTooShort,
    /// 订阅表已满
    MaxSubscriptionsReached,
    /// 客户端正在执行其它操作
    NotIdle,
    NetworkDisconnected,
    /// 报文类型，格式或者返回码不符合预期
    ProtocolMismatch,
    Timeout,
    Transport,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Network disconnected")]
    NetworkDisconnected,
    #[error("Client not idle, current state {0:?}")]
    NotIdle(ClientState),
    #[error("Max subscriptions reached")]
    MaxSubscriptionsReached,
    #[error("Subscription refused by broker: {0}")]
    SubscriptionRefused(String),
    #[error("Suback packet id {received} does not match subscribe packet id {sent}")]
    PacketIdMismatch { sent: u16, received: u16 },
    #[error("Packet error: {0}")]
    Packet(#[from] packet::Error),
    #[error("Connection error: {0}")]
    Connection(#[from] conn::Error),
    #[error("State error: {0}")]
    State(#[from] state::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NetworkDisconnected => ErrorKind::NetworkDisconnected,
            Error::NotIdle(_) | Error::State(_) => ErrorKind::NotIdle,
            Error::MaxSubscriptionsReached => ErrorKind::MaxSubscriptionsReached,
            Error::SubscriptionRefused(_) | Error::PacketIdMismatch { .. } => {
                ErrorKind::ProtocolMismatch
            }
            Error::Packet(e) => e.kind(),
            Error::Connection(e) => e.kind(),
        }
    }
}
