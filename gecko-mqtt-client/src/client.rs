//! 对外暴露的订阅接口
//! 每个操作都会等待服务端回复或者超时后才返回，同一个客户端同一时刻只能有一个操作

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::Error,
    network::{
        packet,
        topic,
        v4::{SubAck, Subscribe, SubscribeReturnCode},
        Deadline, QoS, Transport,
    },
    protocol::{ClientState, Exchanger, StateCell, StateGuard, Subscription, SubscriptionTable},
    MessageHandler,
};

pub struct Client<T> {
    cfg: ClientConfig,
    /// 客户端顶层状态，分发消息的一方也持有一份
    state: Arc<StateCell>,
    /// 已订阅的主题，重连后据此恢复订阅
    subscriptions: SubscriptionTable,
    exchanger: Exchanger<T>,
}

impl<T: Transport> Client<T> {
    /// transport 需要已经完成连接
    pub fn new(cfg: ClientConfig, transport: T) -> Self {
        Self {
            state: Arc::new(StateCell::new(ClientState::Idle)),
            subscriptions: SubscriptionTable::new(cfg.max_subscriptions),
            exchanger: Exchanger::new(transport, cfg.write_buf_size),
            cfg,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// 共享的状态，供消息分发一方进出回调状态
    pub fn state_cell(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    pub fn transition_state(
        &self,
        expected: ClientState,
        next: ClientState,
    ) -> Result<ClientState, Error> {
        Ok(self.state.transition(expected, next)?)
    }

    pub fn is_connected(&self) -> bool {
        self.exchanger.is_connected()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn transport(&self) -> &T {
        self.exchanger.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.exchanger.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.exchanger.into_transport()
    }

    /// 订阅一个主题，返回服务端授予的服务质量
    ///
    /// 订阅表中保存的是请求的服务质量，恢复订阅时按请求的服务质量重新订阅。
    /// 服务端拒绝订阅时返回 SubscriptionRefused，不占用订阅表。
    /// 只有在空闲或者消息回调中才可以订阅，结束后恢复为调用前的状态。
    pub async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<QoS, Error> {
        if filter.is_empty() {
            return Err(Error::InvalidArgument("empty topic filter"));
        }
        if filter.len() > u16::MAX as usize {
            return Err(Error::InvalidArgument("topic filter longer than 65535 bytes"));
        }
        if !topic::valid_subscribe_filter(filter) {
            return Err(Error::InvalidArgument("malformed topic filter"));
        }
        if !self.is_connected() {
            return Err(Error::NetworkDisconnected);
        }

        let current = self.state.get();
        if current != ClientState::Idle && current != ClientState::WaitForCallbackReturn {
            return Err(Error::NotIdle(current));
        }

        let guard = StateGuard::acquire(
            self.state.clone(),
            current,
            ClientState::SubscribeInProgress,
        )?;
        let res = self.subscribe_inner(filter, qos, handler).await;
        let restored = guard.release();

        match (res, restored) {
            (Ok(_), Err(e)) => Err(e.into()),
            (res, _) => res,
        }
    }

    async fn subscribe_inner(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<QoS, Error> {
        // 先占位，表满时不发送任何报文
        let index = self
            .subscriptions
            .find_free_slot()
            .ok_or(Error::MaxSubscriptionsReached)?;

        let deadline = Deadline::after(self.cfg.command_timeout());
        let packet_id = self.exchanger.next_packet_id();
        let subscribe = Subscribe::single(packet_id, filter, qos);
        debug!("subscribe {} {:?}, packet id {}", filter, qos, packet_id);

        let suback = self.exchanger.exchange(&subscribe, deadline).await?;
        let granted = self.granted_qos(filter, packet_id, suback)?;

        if !self
            .subscriptions
            .register(index, Subscription::new(filter, qos, granted, handler))
        {
            return Err(Error::MaxSubscriptionsReached);
        }
        info!("subscribed {}, requested {:?}, granted {:?}", filter, qos, granted);

        Ok(granted)
    }

    /// 重连之后按顺序重新订阅表中的每个主题
    ///
    /// 遇到第一个错误就停止，已经重新订阅的不会回滚，剩下的不再发送。
    /// 对同一个主题重复订阅是幂等的，失败后可以整体重试。
    pub async fn resubscribe(&mut self) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NetworkDisconnected);
        }

        let current = self.state.get();
        if current != ClientState::Idle {
            return Err(Error::NotIdle(current));
        }

        let guard = StateGuard::acquire(
            self.state.clone(),
            ClientState::Idle,
            ClientState::ResubscribeInProgress,
        )?;
        let res = self.resubscribe_inner().await;
        let restored = guard.release();

        match (res, restored) {
            (Ok(_), Err(e)) => Err(e.into()),
            (res, _) => res,
        }
    }

    async fn resubscribe_inner(&mut self) -> Result<(), Error> {
        let entries = self
            .subscriptions
            .iter()
            .map(|(index, s)| (index, s.filter.clone(), s.qos))
            .collect::<Vec<_>>();

        for (index, filter, qos) in entries {
            // 每个主题单独的截止时间和包 id
            let deadline = Deadline::after(self.cfg.command_timeout());
            let packet_id = self.exchanger.next_packet_id();
            let subscribe = Subscribe::single(packet_id, &filter, qos);
            debug!("resubscribe {} {:?}, packet id {}", filter, qos, packet_id);

            let suback = self.exchanger.exchange(&subscribe, deadline).await?;
            let granted = self.granted_qos(&filter, packet_id, suback)?;

            if let Some(subscription) = self.subscriptions.get_mut(index) {
                subscription.granted = granted;
            }
        }

        info!("resubscribed {} topics", self.subscriptions.len());
        Ok(())
    }

    /// 单个主题订阅的返回结果
    fn granted_qos(&self, filter: &str, sent: u16, suback: SubAck) -> Result<QoS, Error> {
        if suback.packet_id != sent {
            if self.cfg.strict_packet_id {
                return Err(Error::PacketIdMismatch {
                    sent,
                    received: suback.packet_id,
                });
            }
            warn!(
                "suback packet id {} does not match subscribe packet id {}",
                suback.packet_id, sent
            );
        }

        match suback.return_codes.first() {
            Some(SubscribeReturnCode::Success(granted)) => Ok(*granted),
            Some(SubscribeReturnCode::Failure) => Err(Error::SubscriptionRefused(filter.into())),
            None => Err(packet::Error::PayloadRequired.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::{
        io,
        time::{self, Duration},
    };

    use crate::{
        error::ErrorKind,
        network::{
            conn::{
                self,
                mock::{MockTransport, Reply},
            },
            v4::{PacketType, SubscribeFilter},
            StreamConnection,
        },
        HandlerNoop,
    };

    use super::*;

    fn config(max_subscriptions: usize) -> ClientConfig {
        ClientConfig {
            command_timeout_ms: 1_000,
            max_subscriptions,
            ..Default::default()
        }
    }

    fn client(max_subscriptions: usize) -> Client<MockTransport> {
        Client::new(config(max_subscriptions), MockTransport::new())
    }

    fn suback(packet_id: u16, code: SubscribeReturnCode) -> Reply {
        let mut stream = BytesMut::new();
        SubAck {
            packet_id,
            return_codes: vec![code],
        }
        .write(&mut stream)
        .unwrap();
        Reply::Packet(stream.freeze())
    }

    async fn subscribe_all(client: &mut Client<MockTransport>, filters: &[&str]) {
        for filter in filters {
            client
                .subscribe(filter, QoS::AtLeastOnce, Arc::new(HandlerNoop))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn subscribe_sends_packet_and_registers() {
        let mut client = client(5);

        let granted = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap();

        assert_eq!(granted, QoS::AtLeastOnce);
        assert_eq!(
            &client.transport().sent[0][..],
            &[0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x01]
        );
        assert_eq!(client.transport().waits, vec![PacketType::SubAck]);
        let subscription = client.subscriptions().get(0).unwrap();
        assert_eq!(subscription.filter, "a/b");
        assert_eq!(subscription.qos, QoS::AtLeastOnce);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_beyond_capacity() {
        let mut client = client(3);
        subscribe_all(&mut client, &["a", "b", "c"]).await;

        let err = client
            .subscribe("d", QoS::AtMostOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MaxSubscriptionsReached);
        assert_eq!(client.transport().sent.len(), 3);
        assert_eq!(client.subscriptions().len(), 3);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_while_in_progress() {
        let mut client = client(5);
        client
            .transition_state(ClientState::Idle, ClientState::SubscribeInProgress)
            .unwrap();

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotIdle(ClientState::SubscribeInProgress)));
        assert_eq!(err.kind(), ErrorKind::NotIdle);
        assert!(client.transport().sent.is_empty());
        assert!(client.transport().waits.is_empty());
        assert_eq!(client.state(), ClientState::SubscribeInProgress);
    }

    #[tokio::test]
    async fn subscribe_from_message_callback() {
        let mut client = client(5);
        client
            .transition_state(ClientState::Idle, ClientState::WaitForCallbackReturn)
            .unwrap();

        client
            .subscribe("a/b", QoS::AtMostOnce, Arc::new(HandlerNoop))
            .await
            .unwrap();

        assert_eq!(client.state(), ClientState::WaitForCallbackReturn);
    }

    #[tokio::test]
    async fn subscribe_disconnected() {
        let mut client = client(5);
        client.transport_mut().connected = false;

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkDisconnected);
        assert!(client.transport().sent.is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_invalid_filter() {
        let mut client = client(5);

        for filter in ["", "a/#/b", "a+"] {
            let err = client
                .subscribe(filter, QoS::AtLeastOnce, Arc::new(HandlerNoop))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        assert!(client.transport().sent.is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_timeout_restores_state() {
        let mut client = client(5);
        client
            .transport_mut()
            .push_reply(Reply::Fail(conn::Error::Timeout));

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(client.subscriptions().is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_send_failure_restores_callback_state() {
        let mut client = client(5);
        client
            .transition_state(ClientState::Idle, ClientState::WaitForCallbackReturn)
            .unwrap();
        client
            .transport_mut()
            .fail_send(conn::Error::ConnectionReset);

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkDisconnected);
        assert!(client.transport().waits.is_empty());
        assert_eq!(client.state(), ClientState::WaitForCallbackReturn);
    }

    #[tokio::test]
    async fn subscribe_refused_by_broker() {
        let mut client = client(5);
        client
            .transport_mut()
            .push_reply(suback(1, SubscribeReturnCode::Failure));

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SubscriptionRefused(ref f) if f == "a/b"));
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert!(client.subscriptions().is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn subscribe_keeps_requested_qos() {
        let mut client = client(5);
        client
            .transport_mut()
            .push_reply(suback(1, SubscribeReturnCode::Success(QoS::AtMostOnce)));

        let granted = client
            .subscribe("a/b", QoS::ExactlyOnce, Arc::new(HandlerNoop))
            .await
            .unwrap();

        assert_eq!(granted, QoS::AtMostOnce);
        let subscription = client.subscriptions().get(0).unwrap();
        assert_eq!(subscription.qos, QoS::ExactlyOnce);
        assert_eq!(subscription.granted, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn packet_id_mismatch_is_tolerated_by_default() {
        let mut client = client(5);
        client
            .transport_mut()
            .push_reply(suback(99, SubscribeReturnCode::Success(QoS::AtLeastOnce)));

        client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap();

        assert_eq!(client.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn packet_id_mismatch_in_strict_mode() {
        let cfg = ClientConfig {
            strict_packet_id: true,
            ..config(5)
        };
        let mut client = Client::new(cfg, MockTransport::new());
        client
            .transport_mut()
            .push_reply(suback(99, SubscribeReturnCode::Success(QoS::AtLeastOnce)));

        let err = client
            .subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::PacketIdMismatch {
                sent: 1,
                received: 99
            }
        ));
        assert!(client.subscriptions().is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_replays_every_entry() {
        let mut client = client(5);
        subscribe_all(&mut client, &["a", "b/+", "c/#"]).await;

        client.resubscribe().await.unwrap();

        let replayed = client.transport().sent_subscribes().split_off(3);
        let filters = replayed
            .iter()
            .map(|s| s.filters.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            filters,
            ["a", "b/+", "c/#"]
                .iter()
                .map(|path| vec![SubscribeFilter {
                    path: path.to_string(),
                    qos: QoS::AtLeastOnce
                }])
                .collect::<Vec<_>>()
        );
        let packet_ids = replayed.iter().map(|s| s.packet_id).collect::<Vec<_>>();
        assert_eq!(packet_ids, vec![4, 5, 6]);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_stops_at_first_failure() {
        let mut client = client(5);
        subscribe_all(&mut client, &["a", "b", "c"]).await;
        client.transport_mut().push_reply(Reply::Auto);
        client
            .transport_mut()
            .push_reply(Reply::Fail(conn::Error::Timeout));

        let err = client.resubscribe().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let replayed = client.transport().sent_subscribes().split_off(3);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].filters[0].path, "a");
        assert_eq!(replayed[1].filters[0].path, "b");
        // 已经恢复的不回滚
        assert_eq!(client.subscriptions().len(), 3);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_send_failure_on_second_entry() {
        let mut client = client(5);
        subscribe_all(&mut client, &["a", "b", "c"]).await;
        client.transport_mut().pass_send();
        client
            .transport_mut()
            .fail_send(conn::Error::ConnectionAborted);

        let err = client.resubscribe().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkDisconnected);
        assert_eq!(client.transport().sent.len(), 4);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_updates_granted_qos() {
        let mut client = client(5);
        subscribe_all(&mut client, &["a"]).await;
        client
            .transport_mut()
            .push_reply(suback(2, SubscribeReturnCode::Success(QoS::AtMostOnce)));

        client.resubscribe().await.unwrap();

        let subscription = client.subscriptions().get(0).unwrap();
        assert_eq!(subscription.qos, QoS::AtLeastOnce);
        assert_eq!(subscription.granted, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn resubscribe_refusal_keeps_entry() {
        let mut client = client(5);
        subscribe_all(&mut client, &["a"]).await;
        client
            .transport_mut()
            .push_reply(suback(2, SubscribeReturnCode::Failure));

        let err = client.resubscribe().await.unwrap_err();

        assert!(matches!(err, Error::SubscriptionRefused(_)));
        assert_eq!(client.subscriptions().len(), 1);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_requires_idle() {
        let mut client = client(5);
        client
            .transition_state(ClientState::Idle, ClientState::WaitForCallbackReturn)
            .unwrap();

        let err = client.resubscribe().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotIdle);
        assert_eq!(client.state(), ClientState::WaitForCallbackReturn);
    }

    #[tokio::test]
    async fn resubscribe_disconnected() {
        let mut client = client(5);
        client.transport_mut().connected = false;

        let err = client.resubscribe().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkDisconnected);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn resubscribe_empty_table() {
        let mut client = client(5);

        client.resubscribe().await.unwrap();

        assert!(client.transport().sent.is_empty());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn dropped_subscribe_restores_state() {
        let (stream, _broker) = io::duplex(256);
        let mut client = Client::new(config(5), StreamConnection::new(stream, 256));

        // 服务端不回复，外层先超时，subscribe 的 future 被丢弃
        let res = time::timeout(
            Duration::from_millis(20),
            client.subscribe("a/b", QoS::AtLeastOnce, Arc::new(HandlerNoop)),
        )
        .await;

        assert!(res.is_err());
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn subscribe_over_stream_connection() {
        let (stream, broker) = io::duplex(256);
        let mut client = Client::new(config(5), StreamConnection::new(stream, 256));

        let broker = tokio::spawn(async move {
            let mut conn = StreamConnection::new(broker, 256);
            let deadline = Deadline::after(Duration::from_secs(5));
            let packet = conn.wait_for(PacketType::Subscribe, deadline).await.unwrap();
            let subscribe = Subscribe::read(packet).unwrap();

            // 先来一个无关的 pingresp
            conn.send(&[0xD0, 0x00], deadline).await.unwrap();
            let mut stream = BytesMut::new();
            SubAck {
                packet_id: subscribe.packet_id,
                return_codes: vec![SubscribeReturnCode::Success(QoS::AtMostOnce)],
            }
            .write(&mut stream)
            .unwrap();
            conn.send(&stream, deadline).await.unwrap();
            subscribe
        });

        let granted = client
            .subscribe("sensors/+/temperature", QoS::AtLeastOnce, Arc::new(HandlerNoop))
            .await
            .unwrap();

        let subscribe = broker.await.unwrap();
        assert_eq!(subscribe.filters[0].path, "sensors/+/temperature");
        assert_eq!(granted, QoS::AtMostOnce);
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.transport_mut().take_unhandled().is_empty());
    }
}
