use log::debug;

use crate::{
    error::Error,
    network::{
        packet,
        v4::{PacketType, SubAck, Subscribe},
        Deadline, Transport,
    },
};

/// 需要等待服务端回复的请求报文
pub trait Request {
    type Response;
    /// 回复的报文类型
    const RESPONSE_TYPE: PacketType;

    fn write(&self, buf: &mut [u8]) -> Result<usize, packet::Error>;

    fn read_response(&self, stream: &[u8]) -> Result<Self::Response, packet::Error>;
}

impl Request for Subscribe {
    type Response = SubAck;
    const RESPONSE_TYPE: PacketType = PacketType::SubAck;

    fn write(&self, buf: &mut [u8]) -> Result<usize, packet::Error> {
        Subscribe::write(self, buf)
    }

    /// 每个订阅主题对应一个返回码
    fn read_response(&self, stream: &[u8]) -> Result<SubAck, packet::Error> {
        SubAck::read(stream, self.filters.len())
    }
}

/// 包 id 生成器，跳过 0
#[derive(Debug)]
pub struct PacketIds {
    next: u16,
}

impl PacketIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

impl Default for PacketIds {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次请求/回复：序列化，发送，等待回复，反序列化
/// 同一时刻只有一个请求在进行，写缓冲区在多次请求之间复用
pub struct Exchanger<T> {
    transport: T,
    write_buf: Box<[u8]>,
    packet_ids: PacketIds,
}

impl<T: Transport> Exchanger<T> {
    pub fn new(transport: T, write_buf_size: usize) -> Self {
        Self {
            transport,
            write_buf: vec![0; write_buf_size].into_boxed_slice(),
            packet_ids: PacketIds::new(),
        }
    }

    pub fn next_packet_id(&mut self) -> u16 {
        self.packet_ids.next()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// 发送和等待共用同一个截止时间，错误原样返回，不重试
    pub async fn exchange<R: Request>(
        &mut self,
        request: &R,
        deadline: Deadline,
    ) -> Result<R::Response, Error> {
        let len = request.write(&mut self.write_buf)?;

        self.transport.send(&self.write_buf[..len], deadline).await?;
        debug!("sent {} bytes, waiting {:?}", len, R::RESPONSE_TYPE);

        let packet = self.transport.wait_for(R::RESPONSE_TYPE, deadline).await?;
        debug!("received {:?} of {} bytes", R::RESPONSE_TYPE, packet.len());

        Ok(request.read_response(&packet)?)
    }
}
