//! STATUS 寄存器解码
//!
//! 16 位状态字，位序为 LSB first（Bit 0 = HiZ），与 bilge 默认位序一致。
//!
//! 芯片的故障位（UVLO、TH_WRN、TH_SD、OCD、STEP_LOSS_A/B）为低有效：
//! 位为 0 表示故障发生。`StatusFlags` 中这些字段已取反，`true` 即故障。
//! BUSY 位同样低有效：位为 1 表示空闲，0 表示正在执行运动指令。

use bilge::prelude::*;
use std::fmt;

/// 故障指示位掩码（Bit 9-14，正常时全为 1）
pub const ERR_FLAG_MASK: u16 = 0x7E00;

/// 指令错误位掩码（NOTPERF_CMD / WRONG_CMD，正常时全为 0）
pub const ERR_CMD_MASK: u16 = 0x0180;

/// 原始位域布局
///
/// 每个字段保存线上的原始位值，不做极性转换。
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct StatusBits {
    pub hiz: bool,         // Bit 0: 桥臂 Hi-Z
    pub busy: bool,        // Bit 1: 1 = 空闲（低有效）
    pub sw_f: bool,        // Bit 2: 开关闭合
    pub sw_evn: bool,      // Bit 3: 开关下降沿事件（锁存）
    pub dir: bool,         // Bit 4: 1 = 正转
    pub mot_status: u2,    // Bit 5-6: 运动状态
    pub notperf_cmd: bool, // Bit 7: 指令无法执行（锁存）
    pub wrong_cmd: bool,   // Bit 8: 指令不存在（锁存）
    pub uvlo: bool,        // Bit 9: 欠压（低有效）
    pub th_wrn: bool,      // Bit 10: 过热预警（低有效）
    pub th_sd: bool,       // Bit 11: 过热关断（低有效）
    pub ocd: bool,         // Bit 12: 过流（低有效）
    pub step_loss_a: bool, // Bit 13: A 桥失步（低有效）
    pub step_loss_b: bool, // Bit 14: B 桥失步（低有效）
    pub sck_mod: bool,     // Bit 15: 步进时钟模式
}

/// 运动状态（MOT_STATUS，2 位）
#[bitsize(2)]
#[derive(FromBits, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotorStatus {
    #[default]
    Stopped = 0,
    Accelerating = 1,
    Decelerating = 2,
    ConstantSpeed = 3,
}

/// 状态标志名
///
/// 封闭集合，每个成员对应 STATUS 中的一个位或位段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    HiZ,
    Busy,
    SwitchClosed,
    SwitchEdge,
    DirectionForward,
    MotorStatus,
    NotPerformable,
    WrongCommand,
    Undervoltage,
    HeatWarning,
    HeatShutdown,
    Overcurrent,
    StepLossA,
    StepLossB,
    StepClockMode,
}

impl StatusFlag {
    /// 按位序排列的全部标志
    pub const ALL: [StatusFlag; 15] = [
        StatusFlag::HiZ,
        StatusFlag::Busy,
        StatusFlag::SwitchClosed,
        StatusFlag::SwitchEdge,
        StatusFlag::DirectionForward,
        StatusFlag::MotorStatus,
        StatusFlag::NotPerformable,
        StatusFlag::WrongCommand,
        StatusFlag::Undervoltage,
        StatusFlag::HeatWarning,
        StatusFlag::HeatShutdown,
        StatusFlag::Overcurrent,
        StatusFlag::StepLossA,
        StatusFlag::StepLossB,
        StatusFlag::StepClockMode,
    ];

    /// 最低位位置
    pub const fn shift(self) -> u32 {
        match self {
            StatusFlag::HiZ => 0,
            StatusFlag::Busy => 1,
            StatusFlag::SwitchClosed => 2,
            StatusFlag::SwitchEdge => 3,
            StatusFlag::DirectionForward => 4,
            StatusFlag::MotorStatus => 5,
            StatusFlag::NotPerformable => 7,
            StatusFlag::WrongCommand => 8,
            StatusFlag::Undervoltage => 9,
            StatusFlag::HeatWarning => 10,
            StatusFlag::HeatShutdown => 11,
            StatusFlag::Overcurrent => 12,
            StatusFlag::StepLossA => 13,
            StatusFlag::StepLossB => 14,
            StatusFlag::StepClockMode => 15,
        }
    }

    /// 位段宽度
    pub const fn width(self) -> u32 {
        match self {
            StatusFlag::MotorStatus => 2,
            _ => 1,
        }
    }

    /// 无故障时的原始位值
    pub const fn nominal(self) -> u16 {
        match self {
            StatusFlag::HiZ
            | StatusFlag::Busy
            | StatusFlag::DirectionForward
            | StatusFlag::Undervoltage
            | StatusFlag::HeatWarning
            | StatusFlag::HeatShutdown
            | StatusFlag::Overcurrent
            | StatusFlag::StepLossA
            | StatusFlag::StepLossB => 1,
            _ => 0,
        }
    }

    /// 数据手册写法的名字
    pub const fn name(self) -> &'static str {
        match self {
            StatusFlag::HiZ => "HI_Z",
            StatusFlag::Busy => "BUSY",
            StatusFlag::SwitchClosed => "SWITCH_CLOSED",
            StatusFlag::SwitchEdge => "SWITCH_EDGE",
            StatusFlag::DirectionForward => "DIRECTION_FORWARD",
            StatusFlag::MotorStatus => "MOTOR_STATUS",
            StatusFlag::NotPerformable => "NOT_PERFORMABLE",
            StatusFlag::WrongCommand => "WRONG_COMMAND",
            StatusFlag::Undervoltage => "UNDERVOLTAGE",
            StatusFlag::HeatWarning => "HEAT_WARNING",
            StatusFlag::HeatShutdown => "HEAT_SHUTDOWN",
            StatusFlag::Overcurrent => "OVERCURRENT",
            StatusFlag::StepLossA => "STEP_LOSS_A",
            StatusFlag::StepLossB => "STEP_LOSS_B",
            StatusFlag::StepClockMode => "STEP_CLOCK_MODE",
        }
    }

    /// 从状态字中取出该标志的原始位值
    pub fn extract(self, word: u16) -> u16 {
        (word >> self.shift()) & ((1 << self.width()) - 1)
    }

    /// 故障位（参与错误掩码判定）
    pub fn is_fault_indicator(self) -> bool {
        (ERR_FLAG_MASK | ERR_CMD_MASK) & (1 << self.shift()) != 0
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 解码后的状态
///
/// 低有效的故障位已取反，所有 `bool` 字段均为 "true = 条件成立"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusFlags {
    pub hi_z: bool,
    /// 正在执行运动指令（BUSY 位为 0）
    pub busy: bool,
    pub switch_closed: bool,
    pub switch_edge: bool,
    pub direction_forward: bool,
    pub motor_status: MotorStatus,
    pub not_performable: bool,
    pub wrong_command: bool,
    pub undervoltage: bool,
    pub heat_warning: bool,
    pub heat_shutdown: bool,
    pub overcurrent: bool,
    pub step_loss_a: bool,
    pub step_loss_b: bool,
    pub step_clock_mode: bool,
}

impl StatusFlags {
    /// 纯函数解码，无 I/O
    pub fn decode(word: u16) -> Self {
        let bits = StatusBits::from(u16::new(word));
        Self {
            hi_z: bits.hiz(),
            busy: !bits.busy(),
            switch_closed: bits.sw_f(),
            switch_edge: bits.sw_evn(),
            direction_forward: bits.dir(),
            motor_status: MotorStatus::from(bits.mot_status()),
            not_performable: bits.notperf_cmd(),
            wrong_command: bits.wrong_cmd(),
            undervoltage: !bits.uvlo(),
            heat_warning: !bits.th_wrn(),
            heat_shutdown: !bits.th_sd(),
            overcurrent: !bits.ocd(),
            step_loss_a: !bits.step_loss_a(),
            step_loss_b: !bits.step_loss_b(),
            step_clock_mode: bits.sck_mod(),
        }
    }

    /// 打包回 16 位状态字
    pub fn encode(&self) -> u16 {
        let bits = StatusBits::new(
            self.hi_z,
            !self.busy,
            self.switch_closed,
            self.switch_edge,
            self.direction_forward,
            u2::from(self.motor_status),
            self.not_performable,
            self.wrong_command,
            !self.undervoltage,
            !self.heat_warning,
            !self.heat_shutdown,
            !self.overcurrent,
            !self.step_loss_a,
            !self.step_loss_b,
            self.step_clock_mode,
        );
        u16::from(bits).value()
    }

    /// 对应的状态字
    pub fn word(&self) -> StatusWord {
        StatusWord(self.encode())
    }

    pub fn alerts(&self) -> Vec<StatusFlag> {
        self.word().alerts()
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.word().report())
    }
}

/// `StatusFlags::encode` 的自由函数形式
pub fn encode_status_word(flags: &StatusFlags) -> u16 {
    flags.encode()
}

/// 原始状态字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// 上电后无故障、桥臂 Hi-Z、空闲时的状态字
    pub const NOMINAL: StatusWord = StatusWord(0x7E13);

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn flags(self) -> StatusFlags {
        StatusFlags::decode(self.0)
    }

    /// 错误掩码判定：指令错误位全为 0，故障位全为 1
    pub fn is_healthy(self) -> bool {
        self.0 & ERR_CMD_MASK == 0 && self.0 & ERR_FLAG_MASK == ERR_FLAG_MASK
    }

    /// BUSY 位为 1：芯片可以接受新的运动指令
    pub fn is_ready(self) -> bool {
        StatusFlag::Busy.extract(self.0) == 1
    }

    /// 全 0 或全 1 说明 MISO 悬空，芯片没有上电或没有连接
    pub fn is_unreachable(self) -> bool {
        self.0 == 0x0000 || self.0 == 0xFFFF
    }

    pub fn flag(self, flag: StatusFlag) -> u16 {
        flag.extract(self.0)
    }

    /// 偏离无故障值的标志（建议性，不影响解码）
    pub fn alerts(self) -> Vec<StatusFlag> {
        StatusFlag::ALL
            .into_iter()
            .filter(|f| f.extract(self.0) != f.nominal())
            .collect()
    }

    /// 可读报告
    ///
    /// 先逐个列出故障/指令错误标志（`ok` 或 `Alert!`），再描述运动状态。
    pub fn report(self) -> String {
        let flags = self.flags();
        let mut out = String::from("Driver Status:\n");
        for flag in StatusFlag::ALL.into_iter().filter(|f| f.is_fault_indicator()) {
            let verdict = if flag.extract(self.0) == flag.nominal() {
                "ok"
            } else {
                "Alert!"
            };
            out.push_str(&format!("  Flag {:<16}: {}\n", flag.name(), verdict));
        }

        let lines = [
            if flags.step_clock_mode {
                "Step-clock mode is on."
            } else {
                "Step-clock mode is off."
            },
            match flags.motor_status {
                MotorStatus::Stopped => "Motor is stopped.",
                MotorStatus::Accelerating => "Motor is accelerating.",
                MotorStatus::Decelerating => "Motor is decelerating.",
                MotorStatus::ConstantSpeed => "Motor is at constant speed.",
            },
            if flags.direction_forward {
                "Motor direction is set to forward."
            } else {
                "Motor direction is set to reverse."
            },
            if flags.busy {
                "Motor is busy with a movement command."
            } else {
                "Motor is ready to receive movement commands."
            },
            if flags.hi_z {
                "Bridges are in high-impedance mode (disabled)."
            } else {
                "Bridges are in low-impedance mode (active)."
            },
            if flags.switch_edge {
                "External switch has been clicked since last check."
            } else {
                "External switch has not been clicked since last check."
            },
            if flags.switch_closed {
                "External switch is closed (grounded)."
            } else {
                "External switch is open."
            },
        ];
        for line in lines {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord(value)
    }
}

impl From<StatusWord> for u16 {
    fn from(word: StatusWord) -> Self {
        word.0
    }
}

impl From<StatusFlags> for StatusWord {
    fn from(flags: StatusFlags) -> Self {
        flags.word()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bit_order_lsb_first() {
        let bits = StatusBits::from(u16::new(0x0001));
        assert!(bits.hiz());
        assert!(!bits.busy());

        let bits = StatusBits::from(u16::new(0x8000));
        assert!(bits.sck_mod());
        assert!(!bits.hiz());

        let bits = StatusBits::from(u16::new(0b0110_0000));
        assert_eq!(bits.mot_status().value(), 3);
    }

    #[test]
    fn test_decode_nominal() {
        let flags = StatusFlags::decode(StatusWord::NOMINAL.raw());
        assert!(flags.hi_z);
        assert!(!flags.busy);
        assert!(flags.direction_forward);
        assert_eq!(flags.motor_status, MotorStatus::Stopped);
        assert!(!flags.undervoltage);
        assert!(!flags.overcurrent);
        assert!(!flags.step_loss_a);
        assert!(!flags.wrong_command);
        assert!(StatusWord::NOMINAL.is_healthy());
        assert!(StatusWord::NOMINAL.alerts().is_empty());
    }

    #[test]
    fn test_decode_active_low_faults() {
        // 清掉 OCD（Bit 12）= 过流
        let flags = StatusFlags::decode(0x7E13 & !(1 << 12));
        assert!(flags.overcurrent);
        assert!(!flags.heat_shutdown);
        assert!(!StatusWord(0x7E13 & !(1 << 12)).is_healthy());
    }

    #[test]
    fn test_motor_status_values() {
        for (raw, expected) in [
            (0u16, MotorStatus::Stopped),
            (1, MotorStatus::Accelerating),
            (2, MotorStatus::Decelerating),
            (3, MotorStatus::ConstantSpeed),
        ] {
            assert_eq!(StatusFlags::decode(raw << 5).motor_status, expected);
        }
    }

    #[test]
    fn test_health_mask() {
        assert!(StatusWord(0x7E00).is_healthy());
        assert!(StatusWord(0x7E02).is_healthy());
        // WRONG_CMD
        assert!(!StatusWord(0x7F00).is_healthy());
        // NOTPERF_CMD
        assert!(!StatusWord(0x7E80).is_healthy());
        // 欠压
        assert!(!StatusWord(0x7C00).is_healthy());
        assert!(!StatusWord(0x0000).is_healthy());
        // 全 1 时指令错误位也置位
        assert!(!StatusWord(0xFFFF).is_healthy());
    }

    #[test]
    fn test_ready_and_unreachable() {
        assert!(StatusWord(0x0002).is_ready());
        assert!(!StatusWord(0x7E11).is_ready());
        assert!(StatusWord(0x0000).is_unreachable());
        assert!(StatusWord(0xFFFF).is_unreachable());
        assert!(!StatusWord::NOMINAL.is_unreachable());
    }

    #[test]
    fn test_alerts() {
        // 过热预警 + 正在加速
        let word = StatusWord((0x7E13 & !(1 << 10)) | (1 << 5));
        let alerts = word.alerts();
        assert_eq!(
            alerts,
            vec![StatusFlag::MotorStatus, StatusFlag::HeatWarning]
        );
        assert!(StatusFlag::HeatWarning.is_fault_indicator());
        assert!(StatusFlag::WrongCommand.is_fault_indicator());
        assert!(!StatusFlag::Busy.is_fault_indicator());
    }

    #[test]
    fn test_report_marks_alerts() {
        let report = StatusWord(0x7E13 & !(1 << 12)).report();
        assert!(report.starts_with("Driver Status:"));
        // 8 个故障/指令错误标志 + 7 行状态描述
        assert_eq!(report.lines().count(), 1 + 8 + 7);
        let ocd_line = report.lines().find(|l| l.contains("OVERCURRENT")).unwrap();
        assert!(ocd_line.ends_with("Alert!"));
        let uvlo_line = report.lines().find(|l| l.contains("UNDERVOLTAGE")).unwrap();
        assert!(uvlo_line.ends_with("ok"));
    }

    #[test]
    fn test_report_describes_motion() {
        let report = StatusWord::NOMINAL.report();
        assert!(report.contains("Step-clock mode is off."));
        assert!(report.contains("Motor is stopped."));
        assert!(report.contains("Motor direction is set to forward."));
        assert!(report.contains("Motor is ready to receive movement commands."));
        assert!(report.contains("Bridges are in high-impedance mode (disabled)."));
        assert!(!report.contains("Alert!"));

        // BUSY 清零、恒速、反转、桥臂有效
        let moving = StatusWord(0x7E00 | (0b11 << 5));
        let report = moving.report();
        assert!(report.contains("Motor is at constant speed."));
        assert!(report.contains("Motor direction is set to reverse."));
        assert!(report.contains("Motor is busy with a movement command."));
        assert!(report.contains("Bridges are in low-impedance mode (active)."));
    }

    #[test]
    fn test_constructed_flags_roundtrip() {
        let flags = StatusFlags {
            busy: true,
            motor_status: MotorStatus::Decelerating,
            step_loss_b: true,
            switch_edge: true,
            ..Default::default()
        };
        assert_eq!(StatusFlags::decode(encode_status_word(&flags)), flags);
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusWord(0x7E13).to_string(), "0x7E13");
        assert_eq!(StatusWord(0x0002).to_string(), "0x0002");
    }

    proptest! {
        /// 16 位全部有定义，解码再编码必须得到原值
        #[test]
        fn status_word_roundtrip(word in any::<u16>()) {
            prop_assert_eq!(StatusFlags::decode(word).encode(), word);
        }

        /// 健康判定只依赖掩码位
        #[test]
        fn health_ignores_non_mask_bits(word in any::<u16>()) {
            let masked = word & (ERR_FLAG_MASK | ERR_CMD_MASK);
            prop_assert_eq!(StatusWord(word).is_healthy(), StatusWord(masked).is_healthy());
        }
    }
}
