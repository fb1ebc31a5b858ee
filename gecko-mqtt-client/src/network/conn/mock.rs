//! 测试用的内存连接，记录发出的报文，按队列回复

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::network::{
    deadline::Deadline,
    v4::{PacketType, SubAck, Subscribe, SubscribeReturnCode},
};

use super::{Error, Transport};

pub(crate) enum Reply {
    /// 根据最后一个发出的 subscribe 生成 suback，授予请求的 qos
    Auto,
    Packet(Bytes),
    Fail(Error),
}

pub(crate) struct MockTransport {
    pub(crate) connected: bool,
    /// 成功发出的报文
    pub(crate) sent: Vec<Bytes>,
    /// 每次 wait_for 等待的报文类型
    pub(crate) waits: Vec<PacketType>,
    send_results: VecDeque<Result<(), Error>>,
    replies: VecDeque<Reply>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            connected: true,
            sent: Vec::new(),
            waits: Vec::new(),
            send_results: VecDeque::new(),
            replies: VecDeque::new(),
        }
    }

    pub(crate) fn push_reply(&mut self, reply: Reply) {
        self.replies.push_back(reply);
    }

    pub(crate) fn fail_send(&mut self, e: Error) {
        self.send_results.push_back(Err(e));
    }

    pub(crate) fn pass_send(&mut self) {
        self.send_results.push_back(Ok(()));
    }

    /// 发出的 subscribe 报文
    pub(crate) fn sent_subscribes(&self) -> Vec<Subscribe> {
        self.sent
            .iter()
            .map(|packet| Subscribe::read(packet.clone()).unwrap())
            .collect()
    }

    fn auto_suback(&self) -> Result<Bytes, Error> {
        let last = match self.sent.last() {
            Some(packet) => packet.clone(),
            None => return Err(Error::Timeout),
        };
        let subscribe = Subscribe::read(last)?;
        let suback = SubAck {
            packet_id: subscribe.packet_id,
            return_codes: subscribe
                .filters
                .iter()
                .map(|filter| SubscribeReturnCode::Success(filter.qos))
                .collect(),
        };
        let mut stream = BytesMut::new();
        suback.write(&mut stream)?;
        Ok(stream.freeze())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, packet: &[u8], _deadline: Deadline) -> Result<(), Error> {
        if let Some(Err(e)) = self.send_results.pop_front() {
            return Err(e);
        }
        self.sent.push(Bytes::copy_from_slice(packet));
        Ok(())
    }

    async fn wait_for(
        &mut self,
        packet_type: PacketType,
        _deadline: Deadline,
    ) -> Result<Bytes, Error> {
        self.waits.push(packet_type);
        match self.replies.pop_front() {
            Some(Reply::Packet(packet)) => Ok(packet),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Auto) | None => self.auto_suback(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
