//! 网络层
//! 报文编解码和字节流读写，不包含订阅相关的状态

pub use conn::{StreamConnection, Transport};
pub use deadline::Deadline;
pub use packet::{v4, QoS};

pub mod conn;
pub mod deadline;
pub mod packet;
pub mod topic;
