//! 驱动层错误类型定义

use l6470_protocol::ProtocolError;
use l6470_spi::SpiError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// SPI 传输错误（不重试，直接上抛）
    #[error("SPI transport error: {0}")]
    Spi(#[from] SpiError),

    /// 参数/寄存器错误，发生在任何字节发出之前
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 读指令没有拿到响应
    #[error("Command {command} returned no response")]
    MissingResponse { command: &'static str },
}

impl DriverError {
    /// 是否为传输层故障（调用方无法确定芯片当前状态）
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Spi(_))
    }
}
