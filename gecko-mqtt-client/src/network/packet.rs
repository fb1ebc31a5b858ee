use bytes::{Buf, BufMut, Bytes};

use crate::error::ErrorKind;

pub mod v4;

/// 剩余长度字段可表示的最大值（四个字节）
const PAYLOAD_MAX_LENGTH: usize = 268_435_455;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),
    #[error("Unexpected packet type: {0}")]
    UnexpectedPacketType(u8),
    #[error("Malformed packet")]
    MalformedPacket,
    #[error("At least {0} more bytes required")]
    InsufficientBytes(usize),
    #[error("Malformed UTF-8 string")]
    MalformedString,
    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),
    #[error("Payload required")]
    PayloadRequired,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Miss packet id")]
    MissPacketId,
    #[error("Invalid subscribe filter")]
    InvalidSubscribeFilter,
    #[error("No subscribe filter given")]
    NoSubscribeFilter,
    #[error("Subscribe filter too long: {0} bytes")]
    FilterTooLong(usize),
    #[error("Invalid subscribe return code: {0:#04x}")]
    InvalidReturnCode(u8),
    #[error("More than {0} return codes in suback")]
    TooManyReturnCodes(usize),
    #[error("Tx buffer too short: {required} bytes required, capacity {capacity}")]
    BufferTooShort { required: usize, capacity: usize },
    #[error("Rx buffer too short: {required} bytes required, {available} available")]
    RxBufferTooShort { required: usize, available: usize },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BufferTooShort { .. } => ErrorKind::BufferTooShort,
            Error::RxBufferTooShort { .. } | Error::InsufficientBytes(_) => {
                ErrorKind::RxBufferTooShort
            }
            Error::NoSubscribeFilter | Error::FilterTooLong(_) | Error::InvalidSubscribeFilter => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::ProtocolMismatch,
        }
    }
}

/// 服务质量
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            qos => Err(Error::InvalidQoS(qos)),
        }
    }
}

/// 读取多个字节，前两个字节为长度
fn read_bytes(stream: &mut Bytes) -> Result<Bytes, Error> {
    let len = read_u16(stream)? as usize;

    if len > stream.len() {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.split_to(len))
}

fn read_string(stream: &mut Bytes) -> Result<String, Error> {
    let s = read_bytes(stream)?;
    match String::from_utf8(s.to_vec()) {
        Ok(v) => Ok(v),
        Err(_) => Err(Error::MalformedString),
    }
}

fn read_u16(stream: &mut Bytes) -> Result<u16, Error> {
    if stream.len() < 2 {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.get_u16())
}

fn read_u8(stream: &mut Bytes) -> Result<u8, Error> {
    if stream.is_empty() {
        return Err(Error::MalformedPacket);
    }
    Ok(stream.get_u8())
}

/// 剩余长度编码后占用的字节数
fn len_len(len: usize) -> Result<usize, Error> {
    let n = if len > PAYLOAD_MAX_LENGTH {
        return Err(Error::PayloadTooLarge);
    } else if len >= 2_097_152 {
        4
    } else if len >= 16_384 {
        3
    } else if len >= 128 {
        2
    } else {
        1
    };

    Ok(n)
}

/// 整个报文的长度：固定头第一个字节 + 剩余长度字段 + 剩余长度
fn packet_len(remaining_len: usize) -> Result<usize, Error> {
    Ok(1 + len_len(remaining_len)? + remaining_len)
}

/// 写入剩余长度，每个字节低七位为数据，最高位表示是否还有后续字节
fn write_remaining_length<B: BufMut>(stream: &mut B, len: usize) -> Result<usize, Error> {
    if len > PAYLOAD_MAX_LENGTH {
        return Err(Error::PayloadTooLarge);
    }

    let mut done = false;
    let mut x = len;
    let mut count = 0;

    while !done {
        let mut byte = (x % 128) as u8;
        x /= 128;
        if x > 0 {
            byte |= 128;
        }

        stream.put_u8(byte);
        count += 1;
        done = x == 0;
    }

    Ok(count)
}

fn write_bytes<B: BufMut>(stream: &mut B, bytes: &[u8]) {
    stream.put_u16(bytes.len() as u16);
    stream.put_slice(bytes);
}

fn write_string<B: BufMut>(stream: &mut B, string: &str) {
    write_bytes(stream, string.as_bytes())
}
