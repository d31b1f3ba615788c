//! Mock 传输层
//!
//! - [`RecordingTransport`]: 按脚本回放响应，记录每一次交换，可注入总线错误
//! - [`SimulatedL6470`]: 字节级芯片模型，按数据手册规则解析指令流
//!
//! 两者内部状态都放在 `Arc<Mutex<_>>` 中，克隆出的句柄共享同一份状态，
//! 传输层交给驱动之后测试代码仍然可以检查记录。

use crate::{ExchangeBuffer, SpiError, Transport};
use l6470_protocol::{
    Command, Direction, ERR_FLAG_MASK, MotorStatus, POSITION_MASK, Register, RegisterAccess,
    SPEED_MASK, StatusFlag, StatusFlags, StatusWord, SwitchAction, frame_layout, raw_to_position,
    u32_to_be_bytes,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 一次字节交换的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub sent: Vec<u8>,
    pub recv_len: usize,
    pub received: Vec<u8>,
}

/// 把交换记录还原成指令序列
///
/// 依赖驱动的交换模式：操作码单独一次交换，负载/响应各一次。
fn parse_command_stream(exchanges: &[Exchange]) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut iter = exchanges.iter();
    while let Some(exchange) = iter.next() {
        let Some(&op) = exchange.sent.first() else {
            continue;
        };
        let Some((payload_len, response_len)) = frame_layout(op) else {
            continue;
        };
        let payload: &[u8] = if payload_len > 0 {
            match iter.next() {
                Some(p) => &p.sent,
                None => break,
            }
        } else {
            &[]
        };
        if response_len > 0 && iter.next().is_none() {
            break;
        }
        if let Ok(cmd) = Command::decode(op, payload) {
            commands.push(cmd);
        }
    }
    commands
}

// ============================================================================
// RecordingTransport
// ============================================================================

#[derive(Debug, Default)]
struct Recorder {
    exchanges: Vec<Exchange>,
    responses: VecDeque<Vec<u8>>,
    default_status: Option<u16>,
    /// 再成功多少次交换后注入一次错误
    fail_after: Option<usize>,
}

/// 录制/回放传输层
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排队一个状态字响应（2 字节，MSB 在前）
    pub fn push_status(&self, word: u16) {
        self.push_response(&word.to_be_bytes());
    }

    /// 排队多个状态字响应
    pub fn push_statuses(&self, words: &[u16]) {
        for &word in words {
            self.push_status(word);
        }
    }

    /// 排队一段任意响应
    pub fn push_response(&self, bytes: &[u8]) {
        lock(&self.inner).responses.push_back(bytes.to_vec());
    }

    /// 响应队列为空时，2 字节读取返回该状态字
    pub fn set_default_status(&self, word: u16) {
        lock(&self.inner).default_status = Some(word);
    }

    /// 跳过 `skip` 次成功交换后，下一次交换返回总线错误
    pub fn fail_after(&self, skip: usize) {
        lock(&self.inner).fail_after = Some(skip);
    }

    /// 全部交换记录
    pub fn exchanges(&self) -> Vec<Exchange> {
        lock(&self.inner).exchanges.clone()
    }

    /// 还原出的指令序列
    pub fn commands(&self) -> Vec<Command> {
        parse_command_stream(&lock(&self.inner).exchanges)
    }

    /// 还原出的操作码序列
    pub fn opcodes(&self) -> Vec<u8> {
        self.commands().iter().map(Command::opcode).collect()
    }

    /// 某条指令出现的次数
    pub fn count(&self, cmd: Command) -> usize {
        self.commands().into_iter().filter(|c| *c == cmd).count()
    }

    /// 尚未被读取的排队响应数
    pub fn pending_responses(&self) -> usize {
        lock(&self.inner).responses.len()
    }

    /// 清空记录（保留响应队列）
    pub fn clear(&self) {
        lock(&self.inner).exchanges.clear();
    }
}

impl Transport for RecordingTransport {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError> {
        let mut inner = lock(&self.inner);

        match inner.fail_after {
            Some(0) => {
                inner.fail_after = None;
                return Err(SpiError::bus("injected bus failure"));
            },
            Some(n) => inner.fail_after = Some(n - 1),
            None => {},
        }

        let received: Vec<u8> = if recv_len == 0 {
            Vec::new()
        } else if let Some(bytes) = inner.responses.pop_front() {
            bytes
        } else if let (2, Some(word)) = (recv_len, inner.default_status) {
            word.to_be_bytes().to_vec()
        } else {
            Vec::new()
        };

        if received.len() != recv_len {
            return Err(SpiError::ShortRead {
                expected: recv_len,
                actual: received.len(),
            });
        }

        trace!("mock exchange: tx={:02X?} rx={:02X?}", send, received);
        inner.exchanges.push(Exchange {
            sent: send.to_vec(),
            recv_len,
            received: received.clone(),
        });
        Ok(received.into_iter().collect())
    }
}

// ============================================================================
// SimulatedL6470
// ============================================================================

/// 运动指令完成前需要的 GetStatus 轮询次数
pub const DEFAULT_MOTION_POLLS: u32 = 3;

#[derive(Debug, Clone)]
struct ChipState {
    registers: [u32; 32],
    hi_z: bool,
    direction: Direction,
    motor: MotorStatus,
    running: bool,
    busy_polls: u32,
    target: Option<i32>,
    switch_action: Option<(SwitchAction, bool)>,
    step_clock: bool,
    switch_closed: bool,
    switch_event: bool,
    not_performable: bool,
    wrong_command: bool,
    /// 持续存在的故障（ERR_FLAG_MASK 内的位）
    faults: u16,
    /// 下次 GetStatus 后清除的故障
    latched_faults: u16,
    connected: bool,
    motion_polls: u32,
    pending: Option<(u8, usize)>,
    payload: Vec<u8>,
    response: VecDeque<u8>,
    executed: Vec<Command>,
}

impl ChipState {
    fn power_on(motion_polls: u32) -> Self {
        let mut registers = [0u32; 32];
        for reg in Register::ALL {
            registers[reg.address() as usize] = reg.spec().reset_value;
        }
        Self {
            registers,
            hi_z: true,
            direction: Direction::Forward,
            motor: MotorStatus::Stopped,
            running: false,
            busy_polls: 0,
            target: None,
            switch_action: None,
            step_clock: false,
            switch_closed: false,
            switch_event: false,
            not_performable: false,
            wrong_command: false,
            faults: 0,
            // 上电瞬间 UVLO 被锁存，第一次 GetStatus 后清除
            latched_faults: 1 << StatusFlag::Undervoltage.shift(),
            connected: true,
            motion_polls,
            pending: None,
            payload: Vec::new(),
            response: VecDeque::new(),
            executed: Vec::new(),
        }
    }

    fn position(&self) -> i32 {
        raw_to_position(self.registers[Register::AbsPos.address() as usize])
    }

    fn set_position(&mut self, steps: i64) {
        self.registers[Register::AbsPos.address() as usize] = (steps as u32) & POSITION_MASK;
    }

    fn is_stopped(&self) -> bool {
        self.busy_polls == 0 && !self.running
    }

    fn status_word(&self) -> StatusWord {
        let asserted = (self.faults | self.latched_faults) & ERR_FLAG_MASK;
        let fault = |flag: StatusFlag| asserted & (1 << flag.shift()) != 0;
        StatusFlags {
            hi_z: self.hi_z,
            busy: self.busy_polls > 0,
            switch_closed: self.switch_closed,
            switch_edge: self.switch_event,
            direction_forward: self.direction == Direction::Forward,
            motor_status: self.motor,
            not_performable: self.not_performable,
            wrong_command: self.wrong_command,
            undervoltage: fault(StatusFlag::Undervoltage),
            heat_warning: fault(StatusFlag::HeatWarning),
            heat_shutdown: fault(StatusFlag::HeatShutdown),
            overcurrent: fault(StatusFlag::Overcurrent),
            step_loss_a: fault(StatusFlag::StepLossA),
            step_loss_b: fault(StatusFlag::StepLossB),
            step_clock_mode: self.step_clock,
        }
        .word()
    }

    fn feed(&mut self, byte: u8) {
        if let Some((op, needed)) = self.pending {
            self.payload.push(byte);
            if self.payload.len() == needed {
                self.pending = None;
                let payload = std::mem::take(&mut self.payload);
                self.dispatch(op, &payload);
            }
            return;
        }

        self.response.clear();
        match frame_layout(byte) {
            None => {
                debug!("simulated L6470: unknown opcode {:#04X}", byte);
                self.wrong_command = true;
            },
            Some((0, _)) => self.dispatch(byte, &[]),
            Some((needed, _)) => {
                self.pending = Some((byte, needed));
                self.payload.clear();
            },
        }
    }

    fn dispatch(&mut self, op: u8, payload: &[u8]) {
        match Command::decode(op, payload) {
            Ok(cmd) => {
                trace!("simulated L6470: {}", cmd);
                self.executed.push(cmd);
                self.execute(cmd);
            },
            Err(_) => self.wrong_command = true,
        }
    }

    fn start_motion(&mut self, direction: Direction, target: Option<i32>) {
        self.direction = direction;
        self.target = target;
        self.busy_polls = self.motion_polls.max(1);
        self.motor = MotorStatus::ConstantSpeed;
        self.hi_z = false;
        self.step_clock = false;
        self.running = false;
    }

    fn go_to(&mut self, target: i32) {
        let direction = if target >= self.position() {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        self.start_motion(direction, Some(target));
    }

    fn stop(&mut self) {
        self.busy_polls = 0;
        self.running = false;
        self.target = None;
        self.switch_action = None;
        self.motor = MotorStatus::Stopped;
        self.step_clock = false;
        self.registers[Register::Speed.address() as usize] = 0;
    }

    fn complete_motion(&mut self) {
        if let Some(target) = self.target.take() {
            self.set_position(target as i64);
        }
        if let Some((action, closes)) = self.switch_action.take() {
            self.switch_closed = closes;
            if closes {
                self.switch_event = true;
            }
            match action {
                SwitchAction::ResetAbsPos => self.set_position(0),
                SwitchAction::CopyToMark => {
                    self.registers[Register::Mark.address() as usize] =
                        self.registers[Register::AbsPos.address() as usize];
                },
            }
        }
        self.motor = if self.running {
            MotorStatus::ConstantSpeed
        } else {
            MotorStatus::Stopped
        };
    }

    fn reject(&mut self, cmd: Command) {
        debug!("simulated L6470: {} not performable", cmd);
        self.not_performable = true;
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Nop => {},
            Command::SetParam { register, value } => {
                let spec = register.spec();
                let allowed = match spec.access {
                    RegisterAccess::Always => true,
                    RegisterAccess::WhenStopped => self.is_stopped(),
                    RegisterAccess::WhenHiZ => self.hi_z,
                    RegisterAccess::ReadOnly | RegisterAccess::Reserved => false,
                };
                if allowed {
                    self.registers[spec.address as usize] = value & spec.mask();
                } else {
                    self.reject(cmd);
                }
            },
            Command::GetParam { register } => {
                let value = if register == Register::Status {
                    self.status_word().raw() as u32
                } else {
                    self.registers[register.address() as usize]
                };
                self.response = u32_to_be_bytes(value, register.byte_len())
                    .into_iter()
                    .collect();
            },
            Command::Run { direction, speed } => {
                self.start_motion(direction, None);
                self.running = true;
                self.registers[Register::Speed.address() as usize] = speed & SPEED_MASK;
            },
            Command::StepClock { direction } => {
                if self.is_stopped() {
                    self.direction = direction;
                    self.step_clock = true;
                    self.hi_z = false;
                } else {
                    self.reject(cmd);
                }
            },
            _ if !self.is_stopped() && is_positioning(&cmd) => self.reject(cmd),
            Command::Move { direction, steps } => {
                let delta = match direction {
                    Direction::Forward => steps as i64,
                    Direction::Reverse => -(steps as i64),
                };
                let target = raw_to_position(((self.position() as i64 + delta) as u32) & POSITION_MASK);
                self.start_motion(direction, Some(target));
            },
            Command::GoTo { position } => self.go_to(raw_to_position(position)),
            Command::GoToDir {
                direction,
                position,
            } => self.start_motion(direction, Some(raw_to_position(position))),
            Command::GoUntil {
                action, direction, ..
            } => {
                self.start_motion(direction, None);
                self.switch_action = Some((action, true));
            },
            Command::ReleaseSwitch { action, direction } => {
                self.start_motion(direction, None);
                self.switch_action = Some((action, false));
            },
            Command::GoHome => self.go_to(0),
            Command::GoMark => {
                let mark = raw_to_position(self.registers[Register::Mark.address() as usize]);
                self.go_to(mark);
            },
            Command::ResetPos => self.set_position(0),
            Command::ResetDevice => {
                let connected = self.connected;
                let faults = self.faults;
                let executed = std::mem::take(&mut self.executed);
                *self = ChipState::power_on(self.motion_polls);
                self.latched_faults = 0;
                self.connected = connected;
                self.faults = faults;
                self.executed = executed;
            },
            Command::SoftStop | Command::HardStop => self.stop(),
            Command::SoftHiZ | Command::HardHiZ => {
                self.stop();
                self.hi_z = true;
            },
            Command::GetStatus => {
                let word = self.status_word();
                self.response = word.raw().to_be_bytes().into_iter().collect();
                // 读状态清除锁存标志
                self.not_performable = false;
                self.wrong_command = false;
                self.switch_event = false;
                self.latched_faults = 0;
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                    if self.busy_polls == 0 {
                        self.complete_motion();
                    }
                }
            },
        }
    }
}

fn is_positioning(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::Move { .. }
            | Command::GoTo { .. }
            | Command::GoToDir { .. }
            | Command::GoUntil { .. }
            | Command::ReleaseSwitch { .. }
            | Command::GoHome
            | Command::GoMark
    )
}

/// 芯片级模拟器
///
/// 运动指令在若干次 GetStatus 轮询之后完成（BUSY 位恢复为 1）。
/// Run 在加速阶段结束后释放 BUSY，但电机保持恒速运行，直到收到停止指令。
#[derive(Debug, Clone)]
pub struct SimulatedL6470 {
    state: Arc<Mutex<ChipState>>,
}

impl Default for SimulatedL6470 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedL6470 {
    pub fn new() -> Self {
        Self::with_motion_polls(DEFAULT_MOTION_POLLS)
    }

    /// 指定运动指令完成所需的轮询次数
    pub fn with_motion_polls(polls: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChipState::power_on(polls))),
        }
    }

    /// 当前 ABS_POS（有符号微步）
    pub fn position(&self) -> i32 {
        lock(&self.state).position()
    }

    pub fn register(&self, register: Register) -> u32 {
        lock(&self.state).registers[register.address() as usize]
    }

    /// 绕过访问权限直接写寄存器
    pub fn set_register(&self, register: Register, value: u32) {
        let mut state = lock(&self.state);
        state.registers[register.address() as usize] = value & register.spec().mask();
    }

    /// 当前状态字（不清除锁存标志）
    pub fn status(&self) -> StatusWord {
        lock(&self.state).status_word()
    }

    pub fn is_hi_z(&self) -> bool {
        lock(&self.state).hi_z
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy_polls > 0
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// 注入持续故障，直到 [`clear_fault`](Self::clear_fault)
    pub fn inject_fault(&self, flag: StatusFlag) {
        lock(&self.state).faults |= (1 << flag.shift()) & ERR_FLAG_MASK;
    }

    pub fn clear_fault(&self, flag: StatusFlag) {
        lock(&self.state).faults &= !(1 << flag.shift());
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults = 0;
    }

    /// 注入锁存标志，下一次 GetStatus 报告后清除
    pub fn latch_fault(&self, flag: StatusFlag) {
        let mut state = lock(&self.state);
        match flag {
            StatusFlag::WrongCommand => state.wrong_command = true,
            StatusFlag::NotPerformable => state.not_performable = true,
            StatusFlag::SwitchEdge => state.switch_event = true,
            other => state.latched_faults |= (1 << other.shift()) & ERR_FLAG_MASK,
        }
    }

    /// 断开连接后 MISO 恒为 0
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn set_switch(&self, closed: bool) {
        lock(&self.state).switch_closed = closed;
    }

    /// 芯片实际执行过的指令
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).executed.clone()
    }

    pub fn count(&self, cmd: Command) -> usize {
        lock(&self.state).executed.iter().filter(|c| **c == cmd).count()
    }
}

impl Transport for SimulatedL6470 {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Ok((0..recv_len).map(|_| 0u8).collect());
        }
        for &byte in send {
            state.feed(byte);
        }
        Ok((0..recv_len)
            .map(|_| state.response.pop_front().unwrap_or(0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(chip: &mut SimulatedL6470, cmd: Command) -> Option<u32> {
        let encoded = cmd.encode().unwrap();
        chip.exchange(&[encoded.opcode], 0).unwrap();
        if !encoded.payload.is_empty() {
            chip.exchange(&encoded.payload, 0).unwrap();
        }
        if encoded.response_len > 0 {
            let rx = chip.exchange(&[], encoded.response_len).unwrap();
            return cmd.decode_response(&rx).unwrap();
        }
        None
    }

    fn status(chip: &mut SimulatedL6470) -> StatusWord {
        StatusWord(send(chip, Command::GetStatus).unwrap() as u16)
    }

    #[test]
    fn test_recording_transport_replays_and_records() {
        let mut transport = RecordingTransport::new();
        transport.push_status(0x7E13);

        transport.exchange(&[0xD0], 0).unwrap();
        let rx = transport.exchange(&[], 2).unwrap();
        assert_eq!(rx.as_slice(), &[0x7E, 0x13]);

        transport.exchange(&[0x51], 0).unwrap();
        transport.exchange(&[0x00, 0x03, 0xE8], 0).unwrap();

        assert_eq!(transport.exchanges().len(), 4);
        assert_eq!(
            transport.commands(),
            vec![
                Command::GetStatus,
                Command::Run {
                    direction: Direction::Forward,
                    speed: 1000
                }
            ]
        );
        assert_eq!(transport.opcodes(), vec![0xD0, 0x51]);
    }

    #[test]
    fn test_recording_transport_short_read_without_script() {
        let mut transport = RecordingTransport::new();
        let err = transport.exchange(&[], 2).unwrap_err();
        assert!(matches!(
            err,
            SpiError::ShortRead {
                expected: 2,
                actual: 0
            }
        ));

        transport.set_default_status(0x7E03);
        let rx = transport.exchange(&[], 2).unwrap();
        assert_eq!(rx.as_slice(), &[0x7E, 0x03]);
    }

    #[test]
    fn test_recording_transport_failure_injection() {
        let mut transport = RecordingTransport::new();
        transport.fail_after(1);
        assert!(transport.exchange(&[0xA8], 0).is_ok());
        assert!(transport.exchange(&[0xA8], 0).is_err());
        assert!(transport.exchange(&[0xA8], 0).is_ok());
        assert_eq!(transport.count(Command::HardHiZ), 2);
    }

    #[test]
    fn test_power_on_latches_undervoltage_once() {
        let mut chip = SimulatedL6470::new();
        let first = status(&mut chip);
        assert!(first.flags().undervoltage);
        assert!(!first.is_healthy());

        let second = status(&mut chip);
        assert!(second.is_healthy());
        assert_eq!(second, StatusWord::NOMINAL);
    }

    #[test]
    fn test_move_completes_after_polls() {
        let mut chip = SimulatedL6470::with_motion_polls(2);
        status(&mut chip);
        send(&mut chip, Command::move_steps(1600, 1).unwrap());
        assert!(chip.is_busy());
        assert!(!chip.is_hi_z());

        assert!(!status(&mut chip).is_ready());
        assert!(!status(&mut chip).is_ready());
        assert!(status(&mut chip).is_ready());
        assert_eq!(chip.position(), 1600);

        send(&mut chip, Command::move_steps(1700, 0).unwrap());
        status(&mut chip);
        status(&mut chip);
        assert_eq!(chip.position(), -100);
    }

    #[test]
    fn test_positioning_while_busy_is_not_performable() {
        let mut chip = SimulatedL6470::new();
        status(&mut chip);
        send(&mut chip, Command::go_to(500).unwrap());
        send(&mut chip, Command::GoHome);

        let word = status(&mut chip);
        assert!(word.flags().not_performable);
        assert!(!word.is_healthy());
        // 锁存标志读一次即清除
        assert!(!status(&mut chip).flags().not_performable);
    }

    #[test]
    fn test_register_access_rules() {
        let mut chip = SimulatedL6470::new();
        status(&mut chip);

        // 桥臂 Hi-Z 时可写 STEP_MODE
        send(&mut chip, Command::set_param(Register::StepMode, 5).unwrap());
        assert_eq!(chip.register(Register::StepMode), 5);

        // 运行中写 STEP_MODE 被拒绝
        send(&mut chip, Command::run(1000, 1).unwrap());
        send(&mut chip, Command::set_param(Register::StepMode, 2).unwrap());
        assert_eq!(chip.register(Register::StepMode), 5);
        assert!(status(&mut chip).flags().not_performable);

        // MARK 任何时候可写
        send(&mut chip, Command::set_param(Register::Mark, 0x123).unwrap());
        assert_eq!(chip.register(Register::Mark), 0x123);
    }

    #[test]
    fn test_get_param_and_mark_roundtrip() {
        let mut chip = SimulatedL6470::with_motion_polls(1);
        status(&mut chip);
        send(&mut chip, Command::go_to(1234).unwrap());
        status(&mut chip);
        let pos = send(
            &mut chip,
            Command::GetParam {
                register: Register::AbsPos,
            },
        );
        assert_eq!(pos, Some(1234));
        send(&mut chip, Command::set_param(Register::Mark, 1234).unwrap());

        send(&mut chip, Command::GoHome);
        status(&mut chip);
        assert_eq!(chip.position(), 0);
        send(&mut chip, Command::GoMark);
        status(&mut chip);
        assert_eq!(chip.position(), 1234);
    }

    #[test]
    fn test_run_releases_busy_but_keeps_running() {
        let mut chip = SimulatedL6470::with_motion_polls(1);
        status(&mut chip);
        send(&mut chip, Command::run(1000, 1).unwrap());
        status(&mut chip);
        let word = status(&mut chip);
        assert!(word.is_ready());
        assert_eq!(word.flags().motor_status, MotorStatus::ConstantSpeed);
        assert!(chip.is_running());

        send(&mut chip, Command::SoftStop);
        assert!(!chip.is_running());
        assert_eq!(status(&mut chip).flags().motor_status, MotorStatus::Stopped);
    }

    #[test]
    fn test_go_until_copies_position_to_mark() {
        let mut chip = SimulatedL6470::with_motion_polls(1);
        status(&mut chip);
        chip.set_register(Register::AbsPos, 777);
        send(&mut chip, Command::go_until(100, 1, 1).unwrap());
        status(&mut chip);
        assert_eq!(chip.register(Register::Mark), 777);
        assert!(status(&mut chip).flags().switch_closed);
    }

    #[test]
    fn test_unknown_opcode_sets_wrong_command() {
        let mut chip = SimulatedL6470::new();
        status(&mut chip);
        chip.exchange(&[0xF0], 0).unwrap();
        assert!(status(&mut chip).flags().wrong_command);
    }

    #[test]
    fn test_disconnected_chip_reads_zero() {
        let mut chip = SimulatedL6470::new();
        chip.set_connected(false);
        assert!(status(&mut chip).is_unreachable());
    }

    #[test]
    fn test_persistent_fault_survives_status_read() {
        let mut chip = SimulatedL6470::new();
        status(&mut chip);
        chip.inject_fault(StatusFlag::Overcurrent);
        assert!(status(&mut chip).flags().overcurrent);
        assert!(status(&mut chip).flags().overcurrent);
        chip.clear_faults();
        assert!(status(&mut chip).is_healthy());
    }

    #[test]
    fn test_reset_device_restores_defaults() {
        let mut chip = SimulatedL6470::new();
        status(&mut chip);
        send(&mut chip, Command::set_param(Register::StepMode, 5).unwrap());
        send(&mut chip, Command::ResetDevice);
        assert_eq!(chip.register(Register::StepMode), 0x7);
        assert!(chip.is_hi_z());
        assert!(status(&mut chip).is_healthy());
    }
}
