//! 指令编码
//!
//! 每条指令由 1 字节操作码和 0-3 字节负载组成。方向/动作这类二值参数
//! 按数据手册折叠进操作码低位：方向在 bit 0，开关动作在 bit 3。
//!
//! 参数校验全部在编码阶段完成，非法参数不会产生任何字节。

use crate::registers::{Register, RegisterAccess};
use crate::{POSITION_MASK, ProtocolError, SPEED_MASK, be_bytes_to_u32, u32_to_be_bytes};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::fmt;

/// 操作码常量（数据手册 Table 19）
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const SET_PARAM: u8 = 0x00;
    pub const GET_PARAM: u8 = 0x20;
    pub const MOVE: u8 = 0x40;
    pub const RUN: u8 = 0x50;
    pub const STEP_CLOCK: u8 = 0x58;
    pub const GO_TO: u8 = 0x60;
    pub const GO_TO_DIR: u8 = 0x68;
    pub const GO_HOME: u8 = 0x70;
    pub const GO_MARK: u8 = 0x78;
    pub const GO_UNTIL: u8 = 0x82;
    pub const RELEASE_SW: u8 = 0x92;
    pub const SOFT_HIZ: u8 = 0xA0;
    pub const HARD_HIZ: u8 = 0xA8;
    pub const SOFT_STOP: u8 = 0xB0;
    pub const HARD_STOP: u8 = 0xB8;
    pub const RESET_DEVICE: u8 = 0xC0;
    pub const GET_STATUS: u8 = 0xD0;
    pub const RESET_POS: u8 = 0xD8;

    /// 开关动作位（GoUntil / ReleaseSW）
    pub const ACTION_SHIFT: u8 = 3;
    /// 地址位（SetParam / GetParam）
    pub const ADDRESS_MASK: u8 = 0x1F;
}

/// 旋转方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Direction {
    Reverse = 0,
    #[default]
    Forward = 1,
}

impl Direction {
    /// 从原始整数解析，只接受 0/1
    pub fn from_raw(value: i64) -> Result<Self, ProtocolError> {
        u8::try_from(value)
            .ok()
            .and_then(|v| Direction::try_from(v).ok())
            .ok_or(ProtocolError::InvalidArgument {
                field: "direction",
                value,
            })
    }
}

/// 开关触发后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SwitchAction {
    /// ABS_POS 清零
    ResetAbsPos = 0,
    /// ABS_POS 复制到 MARK
    CopyToMark = 1,
}

impl SwitchAction {
    /// 从原始整数解析，只接受 0/1
    pub fn from_raw(value: i64) -> Result<Self, ProtocolError> {
        u8::try_from(value)
            .ok()
            .and_then(|v| SwitchAction::try_from(v).ok())
            .ok_or(ProtocolError::InvalidArgument {
                field: "action",
                value,
            })
    }
}

/// 负载缓冲区，最长 3 字节，栈上分配
pub type Payload = SmallVec<[u8; 4]>;

/// L6470 指令集
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Nop,
    SetParam { register: Register, value: u32 },
    GetParam { register: Register },
    Run { direction: Direction, speed: u32 },
    StepClock { direction: Direction },
    Move { direction: Direction, steps: u32 },
    GoTo { position: u32 },
    GoToDir { direction: Direction, position: u32 },
    GoUntil { action: SwitchAction, direction: Direction, speed: u32 },
    ReleaseSwitch { action: SwitchAction, direction: Direction },
    GoHome,
    GoMark,
    ResetPos,
    ResetDevice,
    SoftStop,
    HardStop,
    SoftHiZ,
    HardHiZ,
    GetStatus,
}

/// 编码后的指令
///
/// 先发送 `opcode`，再发送 `payload`（若非空），最后接收 `response_len` 字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub opcode: u8,
    pub payload: Payload,
    pub response_len: usize,
}

fn non_negative(field: &'static str, value: i64, mask: u32) -> Result<u32, ProtocolError> {
    if value < 0 || value > mask as i64 {
        return Err(ProtocolError::InvalidArgument { field, value });
    }
    Ok(value as u32)
}

fn check_width(field: &'static str, value: u32, mask: u32) -> Result<(), ProtocolError> {
    if value & !mask != 0 {
        return Err(ProtocolError::InvalidArgument {
            field,
            value: value as i64,
        });
    }
    Ok(())
}

impl Command {
    // ==================== 带校验的构造器（原始整数参数）====================

    /// SetParam：写寄存器，只读寄存器直接拒绝
    pub fn set_param(register: Register, value: i64) -> Result<Self, ProtocolError> {
        let cmd = Command::SetParam {
            register,
            value: non_negative("value", value, u32::MAX)?,
        };
        cmd.validate()?;
        Ok(cmd)
    }

    /// Run：以 `speed` 恒速运行
    pub fn run(speed: i64, direction: i64) -> Result<Self, ProtocolError> {
        let direction = Direction::from_raw(direction)?;
        let speed = non_negative("speed", speed, SPEED_MASK)?;
        Ok(Command::Run { direction, speed })
    }

    /// StepClock：进入步进时钟模式
    pub fn step_clock(direction: i64) -> Result<Self, ProtocolError> {
        Ok(Command::StepClock {
            direction: Direction::from_raw(direction)?,
        })
    }

    /// Move：相对移动 `steps` 微步
    pub fn move_steps(steps: i64, direction: i64) -> Result<Self, ProtocolError> {
        let direction = Direction::from_raw(direction)?;
        let steps = non_negative("steps", steps, POSITION_MASK)?;
        Ok(Command::Move { direction, steps })
    }

    /// GoTo：最短路径到绝对位置（22 位原始值）
    pub fn go_to(position: i64) -> Result<Self, ProtocolError> {
        Ok(Command::GoTo {
            position: non_negative("position", position, POSITION_MASK)?,
        })
    }

    /// GoTo_DIR：指定方向到绝对位置
    pub fn go_to_dir(position: i64, direction: i64) -> Result<Self, ProtocolError> {
        let direction = Direction::from_raw(direction)?;
        let position = non_negative("position", position, POSITION_MASK)?;
        Ok(Command::GoToDir {
            direction,
            position,
        })
    }

    /// GoUntil：运动直到开关闭合
    pub fn go_until(speed: i64, action: i64, direction: i64) -> Result<Self, ProtocolError> {
        let action = SwitchAction::from_raw(action)?;
        let direction = Direction::from_raw(direction)?;
        let speed = non_negative("speed", speed, SPEED_MASK)?;
        Ok(Command::GoUntil {
            action,
            direction,
            speed,
        })
    }

    /// ReleaseSW：以最小速度运动直到开关释放
    pub fn release_switch(action: i64, direction: i64) -> Result<Self, ProtocolError> {
        let action = SwitchAction::from_raw(action)?;
        let direction = Direction::from_raw(direction)?;
        Ok(Command::ReleaseSwitch { action, direction })
    }

    // ==================== 编码 ====================

    /// 检查字段宽度与寄存器权限
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match *self {
            Command::SetParam { register, .. } => {
                let spec = register.spec();
                if !spec.access.is_writable() {
                    return Err(ProtocolError::ReadOnlyRegister {
                        register: spec.name,
                    });
                }
                Ok(())
            },
            Command::GetParam { register } => {
                let spec = register.spec();
                // 保留地址没有可读字节，发出去只会锁存 WRONG_CMD
                if spec.access == RegisterAccess::Reserved {
                    return Err(ProtocolError::UnreadableRegister {
                        register: spec.name,
                    });
                }
                Ok(())
            },
            Command::Run { speed, .. } | Command::GoUntil { speed, .. } => {
                check_width("speed", speed, SPEED_MASK)
            },
            Command::Move { steps, .. } => check_width("steps", steps, POSITION_MASK),
            Command::GoTo { position } | Command::GoToDir { position, .. } => {
                check_width("position", position, POSITION_MASK)
            },
            _ => Ok(()),
        }
    }

    /// 操作码（含折叠进来的方向/动作/地址位）
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match *self {
            Command::Nop => NOP,
            Command::SetParam { register, .. } => SET_PARAM | (register.address() & ADDRESS_MASK),
            Command::GetParam { register } => GET_PARAM | (register.address() & ADDRESS_MASK),
            Command::Run { direction, .. } => RUN | u8::from(direction),
            Command::StepClock { direction } => STEP_CLOCK | u8::from(direction),
            Command::Move { direction, .. } => MOVE | u8::from(direction),
            Command::GoTo { .. } => GO_TO,
            Command::GoToDir { direction, .. } => GO_TO_DIR | u8::from(direction),
            Command::GoUntil {
                action, direction, ..
            } => GO_UNTIL | (u8::from(action) << ACTION_SHIFT) | u8::from(direction),
            Command::ReleaseSwitch { action, direction } => {
                RELEASE_SW | (u8::from(action) << ACTION_SHIFT) | u8::from(direction)
            },
            Command::GoHome => GO_HOME,
            Command::GoMark => GO_MARK,
            Command::ResetPos => RESET_POS,
            Command::ResetDevice => RESET_DEVICE,
            Command::SoftStop => SOFT_STOP,
            Command::HardStop => HARD_STOP,
            Command::SoftHiZ => SOFT_HIZ,
            Command::HardHiZ => HARD_HIZ,
            Command::GetStatus => GET_STATUS,
        }
    }

    /// 需要接收的响应字节数
    pub fn response_len(&self) -> usize {
        match *self {
            Command::GetParam { register } => register.byte_len(),
            Command::GetStatus => 2,
            _ => 0,
        }
    }

    /// 编码为操作码 + 负载
    pub fn encode(&self) -> Result<EncodedCommand, ProtocolError> {
        self.validate()?;
        let payload = match *self {
            Command::SetParam { register, value } => {
                u32_to_be_bytes(value, register.byte_len())
            },
            Command::Run { speed, .. } | Command::GoUntil { speed, .. } => {
                u32_to_be_bytes(speed, 3)
            },
            Command::Move { steps, .. } => u32_to_be_bytes(steps, 3),
            Command::GoTo { position } | Command::GoToDir { position, .. } => {
                u32_to_be_bytes(position, 3)
            },
            _ => Payload::new(),
        };
        Ok(EncodedCommand {
            opcode: self.opcode(),
            payload,
            response_len: self.response_len(),
        })
    }

    /// 把接收到的字节按 MSB 在前拼成数值
    ///
    /// 只有 GetParam / GetStatus 有返回值。
    pub fn decode_response(&self, bytes: &[u8]) -> Result<Option<u32>, ProtocolError> {
        let expected = self.response_len();
        if expected == 0 {
            return Ok(None);
        }
        if bytes.len() != expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Some(be_bytes_to_u32(bytes)))
    }

    /// 芯片侧解析：由操作码和负载还原指令
    pub fn decode(op: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let (payload_len, _) = frame_layout(op).ok_or(ProtocolError::InvalidArgument {
            field: "opcode",
            value: op as i64,
        })?;
        if payload.len() != payload_len {
            return Err(ProtocolError::InvalidLength {
                expected: payload_len,
                actual: payload.len(),
            });
        }
        let value = be_bytes_to_u32(payload);
        let direction = if op & 0x01 == 0 {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        let action = if op & (1 << opcode::ACTION_SHIFT) == 0 {
            SwitchAction::ResetAbsPos
        } else {
            SwitchAction::CopyToMark
        };
        let register = || Register::try_from(op & opcode::ADDRESS_MASK);

        let cmd = match op {
            opcode::NOP => Command::Nop,
            0x01..=0x1F => Command::SetParam {
                register: register().map_err(|_| ProtocolError::InvalidArgument {
                    field: "opcode",
                    value: op as i64,
                })?,
                value,
            },
            0x21..=0x3F => Command::GetParam {
                register: register().map_err(|_| ProtocolError::InvalidArgument {
                    field: "opcode",
                    value: op as i64,
                })?,
            },
            0x40 | 0x41 => Command::Move {
                direction,
                steps: value,
            },
            0x50 | 0x51 => Command::Run {
                direction,
                speed: value,
            },
            0x58 | 0x59 => Command::StepClock { direction },
            opcode::GO_TO => Command::GoTo { position: value },
            0x68 | 0x69 => Command::GoToDir {
                direction,
                position: value,
            },
            0x82 | 0x83 | 0x8A | 0x8B => Command::GoUntil {
                action,
                direction,
                speed: value,
            },
            0x92 | 0x93 | 0x9A | 0x9B => Command::ReleaseSwitch { action, direction },
            opcode::GO_HOME => Command::GoHome,
            opcode::GO_MARK => Command::GoMark,
            opcode::RESET_POS => Command::ResetPos,
            opcode::RESET_DEVICE => Command::ResetDevice,
            opcode::SOFT_STOP => Command::SoftStop,
            opcode::HARD_STOP => Command::HardStop,
            opcode::SOFT_HIZ => Command::SoftHiZ,
            opcode::HARD_HIZ => Command::HardHiZ,
            opcode::GET_STATUS => Command::GetStatus,
            _ => {
                return Err(ProtocolError::InvalidArgument {
                    field: "opcode",
                    value: op as i64,
                });
            },
        };
        Ok(cmd)
    }

    /// 无论芯片处于什么状态都能立即执行的指令
    pub fn is_always_executable(&self) -> bool {
        matches!(
            self,
            Command::SoftStop
                | Command::HardStop
                | Command::SoftHiZ
                | Command::HardHiZ
                | Command::GetStatus
                | Command::Nop
        )
    }

    /// 指令名（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            Command::Nop => "Nop",
            Command::SetParam { .. } => "SetParam",
            Command::GetParam { .. } => "GetParam",
            Command::Run { .. } => "Run",
            Command::StepClock { .. } => "StepClock",
            Command::Move { .. } => "Move",
            Command::GoTo { .. } => "GoTo",
            Command::GoToDir { .. } => "GoToDir",
            Command::GoUntil { .. } => "GoUntil",
            Command::ReleaseSwitch { .. } => "ReleaseSW",
            Command::GoHome => "GoHome",
            Command::GoMark => "GoMark",
            Command::ResetPos => "ResetPos",
            Command::ResetDevice => "ResetDevice",
            Command::SoftStop => "SoftStop",
            Command::HardStop => "HardStop",
            Command::SoftHiZ => "SoftHiZ",
            Command::HardHiZ => "HardHiZ",
            Command::GetStatus => "GetStatus",
        }
    }
}

/// 操作码对应的 (负载字节数, 响应字节数)
///
/// 不存在的操作码返回 `None`，芯片会置位 WRONG_CMD。
pub fn frame_layout(op: u8) -> Option<(usize, usize)> {
    let register_len = || {
        Register::try_from(op & opcode::ADDRESS_MASK)
            .ok()
            .filter(|r| r.byte_len() > 0)
            .map(Register::byte_len)
    };
    match op {
        opcode::NOP => Some((0, 0)),
        0x01..=0x1F => register_len().map(|len| (len, 0)),
        0x21..=0x3F => register_len().map(|len| (0, len)),
        0x40 | 0x41 | 0x50 | 0x51 | 0x60 | 0x68 | 0x69 => Some((3, 0)),
        0x82 | 0x83 | 0x8A | 0x8B => Some((3, 0)),
        0x58 | 0x59 | 0x92 | 0x93 | 0x9A | 0x9B => Some((0, 0)),
        opcode::GO_HOME
        | opcode::GO_MARK
        | opcode::RESET_POS
        | opcode::RESET_DEVICE
        | opcode::SOFT_STOP
        | opcode::HARD_STOP
        | opcode::SOFT_HIZ
        | opcode::HARD_HIZ => Some((0, 0)),
        opcode::GET_STATUS => Some((0, 2)),
        _ => None,
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::SetParam { register, value } => write!(f, "SetParam({register}, {value:#X})"),
            Command::GetParam { register } => write!(f, "GetParam({register})"),
            Command::Run { direction, speed } => write!(f, "Run({speed}, {direction:?})"),
            Command::Move { direction, steps } => write!(f, "Move({steps}, {direction:?})"),
            Command::GoTo { position } => write!(f, "GoTo({position:#08X})"),
            Command::GoToDir {
                direction,
                position,
            } => write!(f, "GoToDir({position:#08X}, {direction:?})"),
            _ => f.write_str(self.name()),
        }
    }
}
