//! 3.1.1 协议版本报文
//! 客户端订阅只涉及 subscribe / suback 两种报文，其余报文只识别类型

use std::slice::Iter;

pub use suback::*;
pub use subscribe::*;

use super::Error;

pub mod suback;
pub mod subscribe;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(num: u8) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            n => Err(Error::InvalidPacketType(n)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedHeader {
    /// 固定头的第一个字节，包含报文类型和flags
    pub(crate) byte1: u8,
    /// 固定头的大小
    pub(crate) fixed_header_len: usize,
    /// 剩余长度大小
    pub(crate) remaining_len: usize,
}

impl FixedHeader {
    #[inline]
    pub(crate) fn packet_type(&self) -> Result<PacketType, Error> {
        PacketType::try_from(self.byte1 >> 4)
    }

    #[inline]
    pub(crate) fn flags(&self) -> u8 {
        self.byte1 & 0x0F
    }

    /// 整个完整报文的字节长度
    #[inline]
    pub(crate) fn packet_len(&self) -> usize {
        self.fixed_header_len + self.remaining_len
    }

    /// 从字节流中解析固定头，不消费字节流
    /// 字节不足时返回 InsufficientBytes
    pub(crate) fn read_from(mut stream: Iter<u8>) -> Result<Self, Error> {
        let stream_len = stream.len();
        if stream_len < 2 {
            return Err(Error::InsufficientBytes(2 - stream_len));
        }
        // 第一个字节
        let byte1 = match stream.next() {
            Some(byte) => *byte,
            None => return Err(Error::InsufficientBytes(2)),
        };

        // 剩余字节长度
        let mut remaining_len: usize = 0;
        // 固定头长度，包含第一个字节
        let mut header_len = 1;
        let mut done = false;
        let mut shift = 0;

        for byte in stream {
            header_len += 1;
            let byte = *byte as usize;
            // 字节的后七位 * 128 + 上一个字节
            remaining_len += (byte & 0x7F) << shift;

            // 是否还有后续 remining_len 字节
            done = (byte & 0x80) == 0;
            if done {
                break;
            }

            shift += 7;

            // 剩余长度字节最多四个字节（0，7，14，21）
            if shift > 21 {
                return Err(Error::MalformedPacket);
            }
        }

        if !done {
            return Err(Error::InsufficientBytes(1));
        }

        Ok(Self {
            byte1,
            fixed_header_len: header_len,
            remaining_len,
        })
    }
}
