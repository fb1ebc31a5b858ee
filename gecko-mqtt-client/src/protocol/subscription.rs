use std::{fmt, sync::Arc};

use crate::{network::QoS, MessageHandler};

/// 一条订阅记录
#[derive(Clone)]
pub struct Subscription {
    /// 订阅的主题，表中保存一份拷贝
    pub filter: String,
    /// 客户端请求的服务质量，恢复订阅时使用
    pub qos: QoS,
    /// 服务端最近一次授予的服务质量
    pub granted: QoS,
    /// 消息回调，回调自身携带所需的上下文
    pub handler: Arc<dyn MessageHandler>,
}

impl Subscription {
    pub fn new(filter: &str, qos: QoS, granted: QoS, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            filter: filter.into(),
            qos,
            granted,
            handler,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .field("granted", &self.granted)
            .finish_non_exhaustive()
    }
}

/// 固定容量的订阅表
/// 新订阅总是放在下标最小的空位上，容量用完后不会扩容
#[derive(Debug)]
pub struct SubscriptionTable {
    slots: Vec<Option<Subscription>>,
}

impl SubscriptionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// 第一个空位的下标，表满时返回 None
    pub fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// 覆盖指定位置的记录，下标超出容量时返回 false，表不变
    /// 下标需要事先通过 find_free_slot 获取，中间不能有其它修改
    pub fn register(&mut self, index: usize, subscription: Subscription) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(subscription);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Subscription> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Subscription> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// 按下标顺序遍历已占用的记录，跳过空位
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Subscription)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|s| (index, s)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.find_free_slot().is_none()
    }
}
