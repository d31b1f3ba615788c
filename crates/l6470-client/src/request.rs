//! 运动请求解析
//!
//! 请求文本来自外部的行协议（`<axis>:<request>` 中冒号之后的部分）。
//! 解析在任何 I/O 之前完成，解析失败不会改变轴的状态。

use crate::AxisError;
use std::fmt;
use std::str::FromStr;

/// 轴的运动请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionRequest {
    /// 复位芯片并重新初始化
    Init,
    /// 转到绝对角度（度）
    Slew(f64),
    /// 相对当前位置转动（度）
    Turn(f64),
    /// 恒速跟踪
    Track,
    /// 当前位置写入 MARK
    MarkSet,
    /// 回到 MARK
    MarkGoto,
    /// 当前位置清零
    HomeSet,
    /// 回到 HOME
    HomeGoto,
    /// 减速停止，保持力矩
    Stop,
    /// 桥臂 Hi-Z（滑行）
    Off,
}

impl MotionRequest {
    /// 在任何生命周期状态都会立即执行的请求
    pub fn is_always_executable(&self) -> bool {
        matches!(self, MotionRequest::Stop | MotionRequest::Off)
    }

    /// 执行后轴进入 Busy
    pub fn starts_motion(&self) -> bool {
        matches!(
            self,
            MotionRequest::Slew(_)
                | MotionRequest::Turn(_)
                | MotionRequest::Track
                | MotionRequest::MarkGoto
                | MotionRequest::HomeGoto
        )
    }
}

fn parse_angle(text: &str) -> Result<f64, AxisError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(angle) if angle.is_finite() => Ok(angle),
        _ => Err(AxisError::InvalidArgument {
            field: "angle",
            value: trimmed.to_string(),
        }),
    }
}

/// `mark` / `mark set`，后缀只允许为空或 `set`
fn parse_set_suffix(
    rest: &str,
    set: MotionRequest,
    goto: MotionRequest,
    input: &str,
) -> Result<MotionRequest, AxisError> {
    match rest.trim() {
        "" => Ok(goto),
        "set" => Ok(set),
        _ => Err(AxisError::UnrecognizedCommand {
            request: input.to_string(),
        }),
    }
}

impl FromStr for MotionRequest {
    type Err = AxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(rest) = text.strip_prefix("slew") {
            return parse_angle(rest).map(MotionRequest::Slew);
        }
        if let Some(rest) = text.strip_prefix("turn") {
            return parse_angle(rest).map(MotionRequest::Turn);
        }
        if let Some(rest) = text.strip_prefix("mark") {
            return parse_set_suffix(rest, MotionRequest::MarkSet, MotionRequest::MarkGoto, s);
        }
        if let Some(rest) = text.strip_prefix("home") {
            return parse_set_suffix(rest, MotionRequest::HomeSet, MotionRequest::HomeGoto, s);
        }
        match text {
            "init" => Ok(MotionRequest::Init),
            "track" => Ok(MotionRequest::Track),
            "stop" => Ok(MotionRequest::Stop),
            "off" => Ok(MotionRequest::Off),
            _ => Err(AxisError::UnrecognizedCommand {
                request: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MotionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionRequest::Init => f.write_str("init"),
            MotionRequest::Slew(angle) => write!(f, "slew {angle}"),
            MotionRequest::Turn(angle) => write!(f, "turn {angle}"),
            MotionRequest::Track => f.write_str("track"),
            MotionRequest::MarkSet => f.write_str("mark set"),
            MotionRequest::MarkGoto => f.write_str("mark"),
            MotionRequest::HomeSet => f.write_str("home set"),
            MotionRequest::HomeGoto => f.write_str("home"),
            MotionRequest::Stop => f.write_str("stop"),
            MotionRequest::Off => f.write_str("off"),
        }
    }
}
