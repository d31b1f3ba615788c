//! 客户端层错误类型

use l6470_driver::DriverError;
use l6470_protocol::{ProtocolError, StatusWord};
use thiserror::Error;

/// 轴监督器错误
///
/// 芯片报告的故障通常被吸收进 `Error` 状态，不会以错误形式返回；
/// 这里只有调用方需要处理的情况。
#[derive(Error, Debug)]
pub enum AxisError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 状态字全 0 或全 1，芯片没有上电或没有连接
    #[error("Cannot reach {axis} driver (status {status}), is motor power on?")]
    DeviceUnreachable { axis: String, status: StatusWord },

    #[error("Init fault on {axis}: status {status}")]
    InitFault { axis: String, status: StatusWord },

    #[error("Failed to write {register} on {axis} after retry: status {status}")]
    ParamWriteFailed {
        axis: String,
        register: &'static str,
        status: StatusWord,
    },

    #[error("Unrecognized command: {request:?}")]
    UnrecognizedCommand { request: String },

    #[error("Invalid argument for {field}: {value:?}")]
    InvalidArgument { field: &'static str, value: String },
}

impl From<ProtocolError> for AxisError {
    fn from(err: ProtocolError) -> Self {
        AxisError::Driver(DriverError::Protocol(err))
    }
}

impl AxisError {
    /// 传输层故障（芯片状态未知）
    pub fn is_transport(&self) -> bool {
        matches!(self, AxisError::Driver(e) if e.is_transport())
    }
}
