use async_trait::async_trait;
use bytes::Bytes;
use tokio::{io, time};

pub use stream::StreamConnection;

use crate::error::ErrorKind;

use super::{deadline::Deadline, packet, v4::PacketType};

#[cfg(test)]
pub(crate) mod mock;
mod stream;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] packet::Error),
    #[error("I/O: {0}")]
    IO(#[from] io::Error),
    #[error("Deadline elapsed")]
    Timeout,
    #[error("Packet of {0} bytes exceeds read buffer")]
    PacketTooLarge(usize),
    #[error("Connection closed by peer")]
    ConnectionAborted,
    #[error("Connection reset by peer")]
    ConnectionReset,
}

impl From<time::error::Elapsed> for Error {
    fn from(_: time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Packet(e) => e.kind(),
            Error::Timeout => ErrorKind::Timeout,
            Error::PacketTooLarge(_) => ErrorKind::RxBufferTooShort,
            Error::ConnectionAborted | Error::ConnectionReset => ErrorKind::NetworkDisconnected,
            Error::IO(_) => ErrorKind::Transport,
        }
    }
}

/// 客户端与服务端之间的报文通道，由连接层实现
/// 订阅逻辑只通过这个接口收发报文
#[async_trait]
pub trait Transport: Send {
    /// 在截止时间之前把一个完整的报文写出去
    async fn send(&mut self, packet: &[u8], deadline: Deadline) -> Result<(), Error>;

    /// 等待指定类型的报文，返回完整的报文字节（包含固定头）
    /// 等待期间收到的其它报文由实现自行处理，不影响返回结果
    async fn wait_for(&mut self, packet_type: PacketType, deadline: Deadline)
        -> Result<Bytes, Error>;

    fn is_connected(&self) -> bool;
}
