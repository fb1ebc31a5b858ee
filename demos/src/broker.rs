//! 只处理 subscribe 的服务端，运行在同一个进程里
//! 对每个订阅主题授予不超过上限的服务质量，被拒绝的主题返回 0x80

use std::time::Duration;

use bytes::BytesMut;
use gecko_mqtt_client::network::{
    conn,
    v4::{PacketType, SubAck, Subscribe, SubscribeReturnCode},
    Deadline, QoS, Transport,
};
use log::{debug, info};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Broker<T> {
    conn: T,
    max_qos: QoS,
    /// 以这些前缀开头的主题会被拒绝
    refused: Vec<String>,
}

impl<T: Transport> Broker<T> {
    pub fn new(conn: T, max_qos: QoS) -> Self {
        Self {
            conn,
            max_qos,
            refused: Vec::new(),
        }
    }

    pub fn refuse(mut self, prefix: &str) -> Self {
        self.refused.push(prefix.into());
        self
    }

    /// 客户端断开时正常返回
    pub async fn serve(mut self) -> Result<(), conn::Error> {
        loop {
            let deadline = Deadline::after(IDLE_TIMEOUT);
            let packet = match self.conn.wait_for(PacketType::Subscribe, deadline).await {
                Ok(packet) => packet,
                Err(conn::Error::ConnectionAborted) => {
                    info!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let subscribe = Subscribe::read(packet)?;
            let suback = self.suback(&subscribe);
            debug!(
                "subscribe packet id {}, return codes {:?}",
                subscribe.packet_id, suback.return_codes
            );

            let mut stream = BytesMut::new();
            suback.write(&mut stream)?;
            self.conn.send(&stream, deadline).await?;
        }
    }

    fn suback(&self, subscribe: &Subscribe) -> SubAck {
        let return_codes = subscribe
            .filters
            .iter()
            .map(|filter| {
                if self.refused.iter().any(|p| filter.path.starts_with(p)) {
                    SubscribeReturnCode::Failure
                } else {
                    SubscribeReturnCode::Success(filter.qos.min(self.max_qos))
                }
            })
            .collect();

        SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        }
    }
}
