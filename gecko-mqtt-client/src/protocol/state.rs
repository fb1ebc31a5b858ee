use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use log::{error, trace};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Client state mismatch, expected {expected:?}, actual {actual:?}")]
    Mismatch {
        expected: ClientState,
        actual: ClientState,
    },
}

/// 客户端顶层状态
/// 同一时刻只能有一个顶层操作在进行
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// 已连接，空闲
    Idle = 1,
    /// 正在订阅
    SubscribeInProgress,
    /// 重连后正在恢复订阅
    ResubscribeInProgress,
    /// 正在执行消息回调，回调中允许再次订阅
    WaitForCallbackReturn,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientState::Idle,
            2 => ClientState::SubscribeInProgress,
            3 => ClientState::ResubscribeInProgress,
            4 => ClientState::WaitForCallbackReturn,
            v => unreachable!("state cell holds unknown state {}", v),
        }
    }
}

/// 保存客户端状态，唯一的修改方式是比较并转换
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ClientState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// 当前状态等于 expected 时转换为 next，返回转换前的状态
    pub fn transition(
        &self,
        expected: ClientState,
        next: ClientState,
    ) -> Result<ClientState, Error> {
        self.0
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(ClientState::from_u8)
            .map_err(|actual| Error::Mismatch {
                expected,
                actual: ClientState::from_u8(actual),
            })
    }
}

/// 持有 "进行中" 状态，离开作用域时恢复之前的状态
/// 无论操作成功，失败，还是 future 被中途丢弃
#[derive(Debug)]
pub struct StateGuard {
    cell: Arc<StateCell>,
    previous: ClientState,
    held: ClientState,
    released: bool,
}

impl StateGuard {
    pub fn acquire(
        cell: Arc<StateCell>,
        current: ClientState,
        next: ClientState,
    ) -> Result<Self, Error> {
        cell.transition(current, next)?;
        trace!("client state {:?} -> {:?}", current, next);

        Ok(Self {
            cell,
            previous: current,
            held: next,
            released: false,
        })
    }

    pub fn previous(&self) -> ClientState {
        self.previous
    }

    /// 恢复之前的状态，返回恢复的结果
    pub fn release(mut self) -> Result<(), Error> {
        self.released = true;
        self.restore()
    }

    fn restore(&self) -> Result<(), Error> {
        self.cell.transition(self.held, self.previous)?;
        trace!("client state {:?} -> {:?}", self.held, self.previous);
        Ok(())
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.restore() {
            error!("restore client state on drop failed: {}", e);
        }
    }
}
