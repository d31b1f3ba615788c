//! 寄存器表
//!
//! L6470 的寄存器集合是封闭的：地址和位宽由数据手册固定，运行期不会改变。
//! 用 `Register` 枚举代替按名字查字典，只有外部传入的名字字符串才可能查找失败。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

/// 寄存器写入权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterAccess {
    /// 任何时候都可写
    Always,
    /// 仅电机停止时可写
    WhenStopped,
    /// 仅桥臂处于 Hi-Z 时可写
    WhenHiZ,
    /// 只读
    ReadOnly,
    /// 保留地址，不可读写
    Reserved,
}

impl RegisterAccess {
    /// 是否允许 SetParam
    pub fn is_writable(self) -> bool {
        !matches!(self, RegisterAccess::ReadOnly | RegisterAccess::Reserved)
    }
}

/// 寄存器元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    /// 唯一名字（数据手册写法，如 `ABS_POS`）
    pub name: &'static str,
    /// 5 位地址
    pub address: u8,
    /// 位宽（0-22）
    pub bit_width: u8,
    /// 写入权限
    pub access: RegisterAccess,
    /// 上电复位值
    pub reset_value: u32,
}

impl RegisterSpec {
    /// 一次传输所需的字节数：ceil(bit_width / 8)
    pub fn byte_len(&self) -> usize {
        (self.bit_width as usize).div_ceil(8)
    }

    /// 位宽掩码
    pub fn mask(&self) -> u32 {
        if self.bit_width == 0 {
            0
        } else {
            u32::MAX >> (32 - self.bit_width as u32)
        }
    }
}

/// L6470 寄存器
///
/// 判别值即寄存器地址。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Register {
    AbsPos = 0x01,
    ElPos = 0x02,
    Mark = 0x03,
    Speed = 0x04,
    Acc = 0x05,
    Dec = 0x06,
    MaxSpeed = 0x07,
    MinSpeed = 0x08,
    KvalHold = 0x09,
    KvalRun = 0x0A,
    KvalAcc = 0x0B,
    KvalDec = 0x0C,
    IntSpeed = 0x0D,
    StSlp = 0x0E,
    FnSlpAcc = 0x0F,
    FnSlpDec = 0x10,
    KTherm = 0x11,
    AdcOut = 0x12,
    OcdTh = 0x13,
    StallTh = 0x14,
    FsSpd = 0x15,
    StepMode = 0x16,
    AlarmEn = 0x17,
    Config = 0x18,
    Status = 0x19,
    ReservedA = 0x1A,
    ReservedB = 0x1B,
}

impl Register {
    /// 按地址排序的全部寄存器
    pub const ALL: [Register; 27] = [
        Register::AbsPos,
        Register::ElPos,
        Register::Mark,
        Register::Speed,
        Register::Acc,
        Register::Dec,
        Register::MaxSpeed,
        Register::MinSpeed,
        Register::KvalHold,
        Register::KvalRun,
        Register::KvalAcc,
        Register::KvalDec,
        Register::IntSpeed,
        Register::StSlp,
        Register::FnSlpAcc,
        Register::FnSlpDec,
        Register::KTherm,
        Register::AdcOut,
        Register::OcdTh,
        Register::StallTh,
        Register::FsSpd,
        Register::StepMode,
        Register::AlarmEn,
        Register::Config,
        Register::Status,
        Register::ReservedA,
        Register::ReservedB,
    ];

    /// 寄存器元数据
    pub const fn spec(self) -> RegisterSpec {
        use RegisterAccess::*;
        //                              name        | width | access     | reset
        let (name, bit_width, access, reset_value) = match self {
            Register::AbsPos => ("ABS_POS", 22, WhenStopped, 0),
            Register::ElPos => ("EL_POS", 9, WhenStopped, 0),
            Register::Mark => ("MARK", 22, Always, 0),
            Register::Speed => ("SPEED", 20, ReadOnly, 0),
            Register::Acc => ("ACC", 12, Always, 0x08A),
            Register::Dec => ("DEC", 12, Always, 0x08A),
            Register::MaxSpeed => ("MAX_SPEED", 10, Always, 0x041),
            Register::MinSpeed => ("MIN_SPEED", 13, WhenStopped, 0),
            Register::KvalHold => ("KVAL_HOLD", 8, Always, 0x29),
            Register::KvalRun => ("KVAL_RUN", 8, Always, 0x29),
            Register::KvalAcc => ("KVAL_ACC", 8, Always, 0x29),
            Register::KvalDec => ("KVAL_DEC", 8, Always, 0x29),
            Register::IntSpeed => ("INT_SPEED", 14, WhenHiZ, 0x0408),
            Register::StSlp => ("ST_SLP", 8, WhenHiZ, 0x19),
            Register::FnSlpAcc => ("FN_SLP_ACC", 8, WhenHiZ, 0x29),
            Register::FnSlpDec => ("FN_SLP_DEC", 8, WhenHiZ, 0x29),
            Register::KTherm => ("K_THERM", 4, WhenHiZ, 0),
            Register::AdcOut => ("ADC_OUT", 5, ReadOnly, 0),
            Register::OcdTh => ("OCD_TH", 4, Always, 0x8),
            Register::StallTh => ("STALL_TH", 7, Always, 0x40),
            Register::FsSpd => ("FS_SPD", 10, Always, 0x027),
            Register::StepMode => ("STEP_MODE", 8, WhenHiZ, 0x7),
            Register::AlarmEn => ("ALARM_EN", 8, WhenStopped, 0xFF),
            Register::Config => ("CONFIG", 16, WhenHiZ, 0x2E88),
            Register::Status => ("STATUS", 16, ReadOnly, 0),
            Register::ReservedA => ("RESERVED_A", 0, Reserved, 0),
            Register::ReservedB => ("RESERVED_B", 0, Reserved, 0),
        };
        RegisterSpec {
            name,
            address: self as u8,
            bit_width,
            access,
            reset_value,
        }
    }

    /// 寄存器名字
    pub const fn name(self) -> &'static str {
        self.spec().name
    }

    /// 5 位地址
    pub fn address(self) -> u8 {
        u8::from(self)
    }

    /// 一次传输所需的字节数
    pub fn byte_len(self) -> usize {
        self.spec().byte_len()
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = name.trim();
        Register::ALL
            .into_iter()
            .find(|reg| reg.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ProtocolError::UnknownRegister {
                name: name.to_string(),
            })
    }
}

/// 按名字查找寄存器元数据
pub fn lookup(name: &str) -> Result<RegisterSpec, ProtocolError> {
    name.parse::<Register>().map(Register::spec)
}
