use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time,
};

use crate::network::{
    deadline::Deadline,
    packet,
    v4::{FixedHeader, PacketType},
};

use super::{Error, Transport};

/// 默认最多积压的未处理报文数
const DEFAULT_UNHANDLED_LIMIT: usize = 64;

/// 客户端与服务端之间的连接
/// 单纯的字节流读写管理，以 packet 为单位读写
/// 字节流可以是 tcp，tls 或者内存管道
pub struct StreamConnection<S> {
    stream: S,
    /// 读缓冲区
    /// 使用缓冲区而非按照字节 从 socket 读取数据
    read: BytesMut,
    /// 单个报文的最大长度，即读缓冲区大小
    max_packet_size: usize,
    /// 对端关闭或者字节流无法再分帧后置为 false
    connected: bool,
    /// 超长报文还需要丢弃的字节数
    discard: usize,
    /// 等待回复期间收到的其它报文，交给上层分发
    /// 超过上限时丢弃最早的报文
    unhandled: VecDeque<Bytes>,
    unhandled_limit: usize,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, max_packet_size: usize) -> Self {
        Self {
            stream,
            read: BytesMut::with_capacity(max_packet_size),
            max_packet_size,
            connected: true,
            discard: 0,
            unhandled: VecDeque::new(),
            unhandled_limit: DEFAULT_UNHANDLED_LIMIT,
        }
    }

    /// 最多积压的未处理报文数，为 0 时直接丢弃
    pub fn with_unhandled_limit(mut self, limit: usize) -> Self {
        self.unhandled_limit = limit;
        self
    }

    /// 取出等待期间积压的报文
    /// 上层分发消息时需要定期取出，否则超过上限后最早的报文会被丢弃
    pub fn take_unhandled(&mut self) -> Vec<Bytes> {
        self.unhandled.drain(..).collect()
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// 读取一个完整的 packet
    /// 超长或者类型非法的报文会被整个跳过后返回错误，下一次读取从之后的报文开始
    async fn read_packet(&mut self) -> Result<(PacketType, Bytes), Error> {
        // 上一次丢弃超长报文时被超时打断
        self.skip_discarded().await?;

        loop {
            let required = match FixedHeader::read_from(self.read.iter()) {
                Ok(header) => {
                    let packet_len = header.packet_len();
                    if packet_len > self.max_packet_size {
                        warn!(
                            "skip packet of {} bytes, read buffer {}",
                            packet_len, self.max_packet_size
                        );
                        self.discard = packet_len;
                        self.skip_discarded().await?;
                        return Err(Error::PacketTooLarge(packet_len));
                    }
                    if self.read.len() >= packet_len {
                        // split_to 方法会更新读缓冲区
                        let packet = self.read.split_to(packet_len).freeze();
                        let packet_type = header.packet_type()?;
                        return Ok((packet_type, packet));
                    }
                    packet_len - self.read.len()
                }
                Err(packet::Error::InsufficientBytes(n)) => n,
                Err(e) => {
                    // 剩余长度无法解析，后续字节无法再分帧
                    self.connected = false;
                    return Err(Error::Packet(e));
                }
            };

            // 数据不足，读取更多数据
            trace!("read more, {} bytes required", required);
            self.read_bytes(required).await?;
        }
    }

    /// 丢弃超长报文剩余的字节，边读边丢
    async fn skip_discarded(&mut self) -> Result<(), Error> {
        while self.discard > 0 {
            if self.read.is_empty() {
                self.read_bytes(1).await?;
            }
            let n = self.discard.min(self.read.len());
            self.read.advance(n);
            self.discard -= n;
        }
        Ok(())
    }

    fn queue_unhandled(&mut self, packet: Bytes) {
        if self.unhandled_limit == 0 {
            warn!("unhandled packet of {} bytes dropped", packet.len());
            return;
        }
        if self.unhandled.len() >= self.unhandled_limit {
            if let Some(oldest) = self.unhandled.pop_front() {
                warn!(
                    "unhandled queue full ({}), oldest packet of {} bytes dropped",
                    self.unhandled_limit,
                    oldest.len()
                );
            }
        }
        self.unhandled.push_back(packet);
    }

    /// 一直读取直到拿到指定类型的报文
    async fn read_until(&mut self, expected: PacketType) -> Result<Bytes, Error> {
        loop {
            let (packet_type, packet) = self.read_packet().await?;
            if packet_type == expected {
                return Ok(packet);
            }

            match packet_type {
                PacketType::PingResp => debug!("pingresp serviced while waiting {:?}", expected),
                _ => {
                    debug!(
                        "{:?} queued as unhandled while waiting {:?}",
                        packet_type, expected
                    );
                    self.queue_unhandled(packet);
                }
            }
        }
    }

    /// 等待从 socket 读出至少所需长度的数据，放入缓冲区
    /// 如果读不到指定长度的数据，返回错误
    async fn read_bytes(&mut self, required: usize) -> Result<(), Error> {
        let mut total_read = 0;
        loop {
            let read = self.stream.read_buf(&mut self.read).await?;
            if 0 == read {
                self.connected = false;
                return if self.read.is_empty() {
                    Err(Error::ConnectionAborted)
                } else {
                    Err(Error::ConnectionReset)
                };
            }

            total_read += read;
            if total_read >= required {
                return Ok(());
            }
        }
    }

    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        self.stream.write_all(packet).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> Transport for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, packet: &[u8], deadline: Deadline) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::ConnectionAborted);
        }

        let res = time::timeout_at(deadline.instant(), self.write_packet(packet)).await?;
        if let Err(Error::IO(_)) = &res {
            self.connected = false;
        }
        res
    }

    async fn wait_for(
        &mut self,
        packet_type: PacketType,
        deadline: Deadline,
    ) -> Result<Bytes, Error> {
        if !self.connected {
            return Err(Error::ConnectionAborted);
        }

        time::timeout_at(deadline.instant(), self.read_until(packet_type)).await?
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
