use bytes::{Buf, BufMut, BytesMut};

use crate::network::packet::{self, Error, QoS};

use super::{FixedHeader, PacketType};

/// 固定头 1 字节 + 剩余长度至少 1 字节 + 包 id 2 字节 + 至少一个返回码
const SUBACK_MIN_LEN: usize = 5;
/// 订阅失败的返回码
const RETURN_CODE_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// 包 id
    pub packet_id: u16,
    /// 对应于每个订阅时传递的主题，且顺序一致
    pub return_codes: Vec<SubscribeReturnCode>,
}

impl SubAck {
    /// 从调用方提供的缓冲区解析 suback
    /// 返回码个数超过 max_return_codes 视为协议错误
    pub fn read(stream: &[u8], max_return_codes: usize) -> Result<Self, Error> {
        if stream.len() < SUBACK_MIN_LEN {
            return Err(Error::RxBufferTooShort {
                required: SUBACK_MIN_LEN,
                available: stream.len(),
            });
        }

        let packet_type = stream[0] >> 4;
        if packet_type != PacketType::SubAck as u8 {
            return Err(Error::UnexpectedPacketType(packet_type));
        }

        let fixed_header = match FixedHeader::read_from(stream.iter()) {
            Ok(header) => header,
            Err(Error::InsufficientBytes(n)) => {
                return Err(Error::RxBufferTooShort {
                    required: stream.len() + n,
                    available: stream.len(),
                })
            }
            Err(e) => return Err(e),
        };

        let packet_len = fixed_header.packet_len();
        if stream.len() < packet_len {
            return Err(Error::RxBufferTooShort {
                required: packet_len,
                available: stream.len(),
            });
        }
        if fixed_header.remaining_len < 2 {
            return Err(Error::MissPacketId);
        }

        // 只看剩余长度范围内的字节，缓冲区后面可能还有其它数据
        let mut body = &stream[fixed_header.fixed_header_len..packet_len];
        let packet_id = body.get_u16();

        let mut return_codes = Vec::with_capacity(body.len());
        while body.has_remaining() {
            if return_codes.len() >= max_return_codes {
                return Err(Error::TooManyReturnCodes(max_return_codes));
            }
            return_codes.push(SubscribeReturnCode::try_from(body.get_u8())?);
        }

        if return_codes.is_empty() {
            return Err(Error::PayloadRequired);
        }

        Ok(Self {
            packet_id,
            return_codes,
        })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<usize, Error> {
        let remaining_len = self.len();
        let packet_len = packet::packet_len(remaining_len)?;
        stream.reserve(packet_len);

        stream.put_u8((PacketType::SubAck as u8) << 4);
        packet::write_remaining_length(stream, remaining_len)?;
        stream.put_u16(self.packet_id);
        for code in self.return_codes.iter() {
            stream.put_u8(u8::from(*code));
        }

        Ok(packet_len)
    }

    pub fn len(&self) -> usize {
        2 + self.return_codes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    /// 成功，服务端授予的最大服务质量
    Success(QoS),
    /// 服务端拒绝订阅
    Failure,
}

impl TryFrom<u8> for SubscribeReturnCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            RETURN_CODE_FAILURE => Ok(SubscribeReturnCode::Failure),
            0..=2 => Ok(SubscribeReturnCode::Success(QoS::try_from(value)?)),
            code => Err(Error::InvalidReturnCode(code)),
        }
    }
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> Self {
        match code {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => RETURN_CODE_FAILURE,
        }
    }
}
