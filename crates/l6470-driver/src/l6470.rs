//! L6470 指令执行器

use crate::DriverError;
use l6470_protocol::{Command, Register, StatusWord, position_to_raw, raw_to_position};
use l6470_spi::Transport;
use tracing::trace;

/// 单颗 L6470 芯片的驱动
///
/// 独占一个传输端口。所有方法都是同步的，返回时字节交换已经完成。
#[derive(Debug)]
pub struct L6470<T: Transport> {
    transport: T,
}

impl<T: Transport> L6470<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// 执行一条指令
    ///
    /// 参数校验失败时不会发送任何字节。只有 GetParam / GetStatus 返回 `Some`。
    pub fn execute(&mut self, cmd: Command) -> Result<Option<u32>, DriverError> {
        let encoded = cmd.encode()?;
        trace!("L6470 execute: {}", cmd);

        self.transport.exchange(&[encoded.opcode], 0)?;
        if !encoded.payload.is_empty() {
            self.transport.exchange(&encoded.payload, 0)?;
        }
        if encoded.response_len == 0 {
            return Ok(None);
        }

        let response = self.transport.exchange(&[], encoded.response_len)?;
        Ok(cmd.decode_response(&response)?)
    }

    fn execute_read(&mut self, cmd: Command) -> Result<u32, DriverError> {
        self.execute(cmd)?.ok_or(DriverError::MissingResponse {
            command: cmd.name(),
        })
    }

    // ==================== 寄存器访问 ====================

    pub fn set_param(&mut self, register: Register, value: i64) -> Result<(), DriverError> {
        self.execute(Command::set_param(register, value)?)?;
        Ok(())
    }

    /// 按名字写寄存器，未知名字不产生任何 I/O
    pub fn set_param_by_name(&mut self, name: &str, value: i64) -> Result<(), DriverError> {
        let register: Register = name.parse()?;
        self.set_param(register, value)
    }

    pub fn get_param(&mut self, register: Register) -> Result<u32, DriverError> {
        self.execute_read(Command::GetParam { register })
    }

    /// 按名字读寄存器，未知名字不产生任何 I/O
    pub fn get_param_by_name(&mut self, name: &str) -> Result<u32, DriverError> {
        let register: Register = name.parse()?;
        self.get_param(register)
    }

    /// 读 STATUS 并清除芯片中的锁存标志
    pub fn get_status(&mut self) -> Result<StatusWord, DriverError> {
        let raw = self.execute_read(Command::GetStatus)?;
        Ok(StatusWord(raw as u16))
    }

    /// ABS_POS（有符号微步）
    pub fn position(&mut self) -> Result<i32, DriverError> {
        Ok(raw_to_position(self.get_param(Register::AbsPos)?))
    }

    /// MARK（有符号微步）
    pub fn mark(&mut self) -> Result<i32, DriverError> {
        Ok(raw_to_position(self.get_param(Register::Mark)?))
    }

    /// 写 MARK（有符号微步）
    pub fn set_mark(&mut self, steps: i32) -> Result<(), DriverError> {
        let raw = position_to_raw(steps)?;
        self.set_param(Register::Mark, raw as i64)
    }

    // ==================== 运动指令 ====================

    pub fn nop(&mut self) -> Result<(), DriverError> {
        self.execute(Command::Nop).map(drop)
    }

    pub fn run(&mut self, speed: i64, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::run(speed, direction)?).map(drop)
    }

    pub fn step_clock(&mut self, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::step_clock(direction)?).map(drop)
    }

    pub fn move_steps(&mut self, steps: i64, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::move_steps(steps, direction)?).map(drop)
    }

    pub fn go_to(&mut self, position: i64) -> Result<(), DriverError> {
        self.execute(Command::go_to(position)?).map(drop)
    }

    /// 以有符号微步给出目标位置
    pub fn go_to_position(&mut self, steps: i32) -> Result<(), DriverError> {
        let raw = position_to_raw(steps)?;
        self.go_to(raw as i64)
    }

    pub fn go_to_dir(&mut self, position: i64, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::go_to_dir(position, direction)?).map(drop)
    }

    pub fn go_until(&mut self, speed: i64, action: i64, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::go_until(speed, action, direction)?)
            .map(drop)
    }

    pub fn release_switch(&mut self, action: i64, direction: i64) -> Result<(), DriverError> {
        self.execute(Command::release_switch(action, direction)?)
            .map(drop)
    }

    pub fn go_home(&mut self) -> Result<(), DriverError> {
        self.execute(Command::GoHome).map(drop)
    }

    pub fn go_mark(&mut self) -> Result<(), DriverError> {
        self.execute(Command::GoMark).map(drop)
    }

    pub fn reset_pos(&mut self) -> Result<(), DriverError> {
        self.execute(Command::ResetPos).map(drop)
    }

    pub fn reset_device(&mut self) -> Result<(), DriverError> {
        self.execute(Command::ResetDevice).map(drop)
    }

    pub fn soft_stop(&mut self) -> Result<(), DriverError> {
        self.execute(Command::SoftStop).map(drop)
    }

    pub fn hard_stop(&mut self) -> Result<(), DriverError> {
        self.execute(Command::HardStop).map(drop)
    }

    pub fn soft_hiz(&mut self) -> Result<(), DriverError> {
        self.execute(Command::SoftHiZ).map(drop)
    }

    pub fn hard_hiz(&mut self) -> Result<(), DriverError> {
        self.execute(Command::HardHiZ).map(drop)
    }
}
