//! 轴事件
//!
//! 故障进入/恢复、参数写入重试等结果除了写日志，还会发送到可选的
//! `crossbeam_channel::Sender<AxisEvent>`。发送永不阻塞，接收端关闭时事件被丢弃。

use crate::{AxisState, MotionRequest};
use l6470_protocol::StatusWord;

#[derive(Debug, Clone, PartialEq)]
pub enum AxisEvent {
    /// Init → Idle
    Initialized { axis: String, status: StatusWord },
    /// 健康检查失败，电机已 HardHiZ
    FaultEntered { axis: String, status: StatusWord },
    /// Error → Idle
    FaultCleared { axis: String },
    /// 参数写入第一次失败，正在重试
    ParamRetry {
        axis: String,
        register: &'static str,
        status: StatusWord,
    },
    /// 参数写入重试后仍失败，电机已 HardHiZ
    ParamWriteFailed {
        axis: String,
        register: &'static str,
        status: StatusWord,
    },
    /// 非 Idle 状态下收到运动请求
    RequestDropped {
        axis: String,
        request: MotionRequest,
        state: AxisState,
    },
    /// 安全停止（HardHiZ）
    SafeStop { axis: String },
}

impl AxisEvent {
    pub fn axis(&self) -> &str {
        match self {
            AxisEvent::Initialized { axis, .. }
            | AxisEvent::FaultEntered { axis, .. }
            | AxisEvent::FaultCleared { axis }
            | AxisEvent::ParamRetry { axis, .. }
            | AxisEvent::ParamWriteFailed { axis, .. }
            | AxisEvent::RequestDropped { axis, .. }
            | AxisEvent::SafeStop { axis } => axis,
        }
    }

    /// 是否为故障类事件
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            AxisEvent::FaultEntered { .. } | AxisEvent::ParamWriteFailed { .. }
        )
    }
}
