//! # L6470 Protocol
//!
//! L6470 步进电机驱动芯片的 SPI 指令协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `registers`: 寄存器表（地址、位宽、访问权限、复位值）
//! - `command`: 指令编码（操作码 + 负载字节）
//! - `status`: STATUS 寄存器解码
//!
//! ## 字节序
//!
//! 所有多字节字段均为 MSB 高位在前（大端字节序），与芯片线上格式一致。
//! 本模块提供了变长字段的字节序转换工具函数。

pub mod command;
pub mod registers;
pub mod status;

// 重新导出常用类型
pub use command::*;
pub use registers::*;
pub use status::*;

use thiserror::Error;

/// 协议层错误类型
///
/// 所有错误都在发送任何字节之前产生，调用方可以放心重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown register: {name}")]
    UnknownRegister { name: String },

    #[error("Invalid argument for {field}: {value}")]
    InvalidArgument { field: &'static str, value: i64 },

    #[error("Register {register} is not writable")]
    ReadOnlyRegister { register: &'static str },

    #[error("Register {register} is not readable")]
    UnreadableRegister { register: &'static str },

    #[error("Invalid response length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// 22 位位置字段（ABS_POS / MARK / GoTo 目标）的掩码
pub const POSITION_MASK: u32 = 0x3F_FFFF;

/// 20 位速度字段（Run / GoUntil）的掩码，与 SPEED 寄存器同宽
///
/// Run 帧虽有 3 个载荷字节（可容纳 22 位），芯片只使用低 20 位；
/// `2^20..2^22` 之间的值一律拒绝，而不是静默截断。
pub const SPEED_MASK: u32 = 0x0F_FFFF;

/// 22 位二进制补码可表示的最大位置
pub const POSITION_MAX: i32 = (1 << 21) - 1;

/// 22 位二进制补码可表示的最小位置
pub const POSITION_MIN: i32 = -(1 << 21);

/// 按 MSB 在前的顺序把字节拼成无符号整数
///
/// 最多使用 4 个字节，超出部分被忽略。
pub fn be_bytes_to_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// 取 `value` 的低 `len` 个字节，按 MSB 在前输出
///
/// 高位超出 `len` 字节的部分被截断，与芯片只锁存寄存器位宽内的数据一致。
pub fn u32_to_be_bytes(value: u32, len: usize) -> smallvec::SmallVec<[u8; 4]> {
    let len = len.min(4);
    (0..len)
        .map(|i| (value >> (8 * (len - i - 1))) as u8)
        .collect()
}

/// 有符号步数转为 22 位二进制补码
pub fn position_to_raw(steps: i32) -> Result<u32, ProtocolError> {
    if !(POSITION_MIN..=POSITION_MAX).contains(&steps) {
        return Err(ProtocolError::InvalidArgument {
            field: "position",
            value: steps as i64,
        });
    }
    Ok(steps as u32 & POSITION_MASK)
}

/// 22 位二进制补码转为有符号步数
pub fn raw_to_position(raw: u32) -> i32 {
    // 左移到 i32 符号位再算术右移，完成符号扩展
    (((raw & POSITION_MASK) << 10) as i32) >> 10
}
