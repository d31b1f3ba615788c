//! 驱动层模块
//!
//! 把协议层的指令编码和传输层的字节交换串起来：
//! 每条指令先发操作码，再发负载，最后读响应，全部同步完成。
//!
//! 驱动层不做任何重试，也不理解芯片状态；
//! 健康检查、重试和状态机都在 `l6470-client` 中。

mod error;
mod l6470;

pub use error::DriverError;
pub use l6470::L6470;

pub use l6470_protocol::{Command, Direction, Register, StatusWord, SwitchAction};
pub use l6470_spi::{SpiError, Transport};
