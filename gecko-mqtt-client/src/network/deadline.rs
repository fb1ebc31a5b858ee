use tokio::time::{Duration, Instant};

/// 一次请求的截止时间
/// 每次请求单独创建，发送和等待回复共用同一个截止时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    #[inline]
    pub fn instant(&self) -> Instant {
        self.0
    }

    /// 剩余时间，已过期时为 0
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}
