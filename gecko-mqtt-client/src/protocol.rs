//! 协议层
//! 订阅相关的状态和流程，依赖于底层的网络层进行报文收发

pub use exchange::{Exchanger, PacketIds, Request};
pub use state::{ClientState, StateCell, StateGuard};
pub use subscription::{Subscription, SubscriptionTable};

pub mod exchange;
pub mod state;
pub mod subscription;
