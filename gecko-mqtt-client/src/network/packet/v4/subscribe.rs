use bytes::{Buf, BufMut, Bytes};

use crate::network::{
    packet::{self, read_u8, Error, QoS},
    topic,
};

use super::{FixedHeader, PacketType};

/// subscribe 固定头：类型 8，flags 固定为 0010
const SUBSCRIBE_HEADER: u8 = 0x82;
/// dup 标志位所在的位置
const DUP_FLAG: u8 = 0b0000_1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// 重复投递标志
    pub dup: bool,
    /// 包 id
    pub packet_id: u16,
    /// 订阅的主题，顺序与 suback 中的返回码一致
    pub filters: Vec<SubscribeFilter>,
}

impl Subscribe {
    /// 单个主题的订阅请求
    pub fn single(packet_id: u16, path: &str, qos: QoS) -> Self {
        Self {
            dup: false,
            packet_id,
            filters: vec![SubscribeFilter {
                path: path.into(),
                qos,
            }],
        }
    }

    /// 剩余长度：包 id + 每个主题（长度前缀 + 主题 + qos）
    pub fn len(&self) -> usize {
        2 + self
            .filters
            .iter()
            .map(|filter| 2 + filter.path.len() + 1)
            .sum::<usize>()
    }

    /// 编码后整个报文的字节数
    pub fn packet_len(&self) -> Result<usize, Error> {
        packet::packet_len(self.len())
    }

    /// 序列化到调用方提供的缓冲区，返回写入的字节数
    /// 缓冲区容量不足时不写入任何字节
    pub fn write(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.filters.is_empty() {
            return Err(Error::NoSubscribeFilter);
        }
        if let Some(filter) = self
            .filters
            .iter()
            .find(|filter| filter.path.len() > u16::MAX as usize)
        {
            return Err(Error::FilterTooLong(filter.path.len()));
        }

        let remaining_len = self.len();
        let required = packet::packet_len(remaining_len)?;
        if required > buf.len() {
            return Err(Error::BufferTooShort {
                required,
                capacity: buf.len(),
            });
        }

        let mut stream = &mut buf[..required];
        let header = match self.dup {
            true => SUBSCRIBE_HEADER | DUP_FLAG,
            false => SUBSCRIBE_HEADER,
        };
        stream.put_u8(header);
        packet::write_remaining_length(&mut stream, remaining_len)?;
        stream.put_u16(self.packet_id);

        for filter in self.filters.iter() {
            packet::write_string(&mut stream, &filter.path);
            stream.put_u8(filter.qos as u8);
        }

        Ok(required)
    }

    /// 解析一个完整的 subscribe 报文（包含固定头）
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let fixed_header = FixedHeader::read_from(stream.iter())?;
        if fixed_header.packet_type()? != PacketType::Subscribe {
            return Err(Error::UnexpectedPacketType(fixed_header.byte1 >> 4));
        }
        // 保留位必须为 0010，dup 位除外
        if fixed_header.flags() & !DUP_FLAG != 0b0010 {
            return Err(Error::MalformedPacket);
        }
        if stream.len() < fixed_header.packet_len() {
            return Err(Error::InsufficientBytes(
                fixed_header.packet_len() - stream.len(),
            ));
        }

        let dup = fixed_header.flags() & DUP_FLAG != 0;
        stream.truncate(fixed_header.packet_len());
        stream.advance(fixed_header.fixed_header_len);

        let packet_id = packet::read_u16(&mut stream)?;

        let mut filters = Vec::new();
        while stream.has_remaining() {
            let path = packet::read_string(&mut stream)?;
            if !topic::valid_subscribe_filter(&path) {
                return Err(Error::InvalidSubscribeFilter);
            }
            let options = read_u8(&mut stream)?;
            let qos = options & 0b0000_0011;

            filters.push(SubscribeFilter {
                path,
                qos: qos.try_into()?,
            })
        }

        if filters.is_empty() {
            return Err(Error::PayloadRequired);
        }

        Ok(Self {
            dup,
            packet_id,
            filters,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub path: String,
    pub qos: QoS,
}
