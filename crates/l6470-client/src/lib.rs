//! # L6470 Client
//!
//! 单轴运动监督器：把文本请求（`slew 90`、`track`、`home set` ...）翻译成芯片指令序列，
//! 轮询状态字推进生命周期，并把芯片报告的故障吸收进 `Error` 状态。
//!
//! ## 使用
//!
//! ```rust,ignore
//! use l6470_client::{Axis, AxisState};
//! use l6470_driver::L6470;
//!
//! let mut axis = Axis::new("alt", L6470::new(transport));
//! while axis.tick()? != AxisState::Idle {}
//! axis.configure()?;
//! axis.request("slew 90")?;
//! ```
//!
//! 调用方负责以固定周期（约 100 µs）调用 `tick`，本 crate 不创建线程。

mod axis;
mod config;
mod error;
mod events;
mod guard;
mod request;

pub use axis::{Axis, AxisState, DEFAULT_SETTLE_DELAY, DEFAULT_TRACK_SPEED};
pub use config::{AxisConfig, ConfigError, GearTrain, MountConfig};
pub use error::AxisError;
pub use events::AxisEvent;
pub use guard::SafeStopGuard;
pub use request::MotionRequest;
