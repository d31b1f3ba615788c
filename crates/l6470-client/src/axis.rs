//! 单轴运动监督器
//!
//! 每根轴一个状态机，由外部固定周期调用 [`Axis::tick`] / [`Axis::request`] 推进：
//!
//! ```text
//! Init ──► Idle ◄──► Busy
//!           │ ▲
//!           ▼ │
//!          Error        Unknown ──► Idle
//! ```
//!
//! 每次调用只做有限次字节交换，从不等待 BUSY 清除。
//! 芯片报告的故障被吸收进 `Error` 状态；进入该状态前电机已 HardHiZ。

use crate::config::{AxisConfig, ConfigError, GearTrain};
use crate::{AxisError, AxisEvent, MotionRequest};
use crossbeam_channel::Sender;
use l6470_driver::L6470;
use l6470_protocol::{
    Command, POSITION_MAX, POSITION_MIN, ProtocolError, Register, StatusWord, position_to_raw,
    raw_to_position,
};
use l6470_spi::Transport;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// `track` 默认速度（SPEED 寄存器单位）
pub const DEFAULT_TRACK_SPEED: u32 = 1000;

/// SoftStop 之后默认等待时间
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_micros(10);

/// 轴生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisState {
    Init,
    Idle,
    Busy,
    Error,
    /// 多指令序列中途传输失败，芯片状态未知
    Unknown,
}

impl fmt::Display for AxisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisState::Init => "Init",
            AxisState::Idle => "Idle",
            AxisState::Busy => "Busy",
            AxisState::Error => "Error",
            AxisState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// 单轴监督器
///
/// 独占一颗芯片的驱动（及其传输端口），轴之间没有共享状态。
pub struct Axis<T: Transport> {
    name: String,
    driver: L6470<T>,
    state: AxisState,
    last_error: Option<StatusWord>,
    gear: GearTrain,
    track_speed: u32,
    settle_delay: Duration,
    params: Vec<(Register, i64)>,
    events: Option<Sender<AxisEvent>>,
}

/// ABS_POS / MARK 接受带符号步数，负值转成 22 位二进制补码；其余寄存器原样写入
fn signed_register_value(register: Register, value: i64) -> Result<i64, ProtocolError> {
    match register {
        Register::AbsPos | Register::Mark if value < 0 => {
            let steps = i32::try_from(value).map_err(|_| ProtocolError::InvalidArgument {
                field: "position",
                value,
            })?;
            Ok(i64::from(position_to_raw(steps)?))
        },
        _ => Ok(value),
    }
}

impl<T: Transport> Axis<T> {
    pub fn new(name: impl Into<String>, driver: L6470<T>) -> Self {
        Self {
            name: name.into(),
            driver,
            state: AxisState::Init,
            last_error: None,
            gear: GearTrain::default(),
            track_speed: DEFAULT_TRACK_SPEED,
            settle_delay: DEFAULT_SETTLE_DELAY,
            params: Vec::new(),
            events: None,
        }
    }

    /// 按配置创建，配置先经过校验
    pub fn from_config(config: &AxisConfig, driver: L6470<T>) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut axis = Self::new(config.name.clone(), driver)
            .with_gear(config.gear())
            .with_track_speed(config.track_speed)
            .with_settle_delay(config.settle_delay());
        axis.params = config.register_params()?;
        Ok(axis)
    }

    pub fn with_gear(mut self, gear: GearTrain) -> Self {
        self.gear = gear;
        self
    }

    pub fn with_track_speed(mut self, speed: u32) -> Self {
        self.track_speed = speed;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// 挂接事件通道
    pub fn with_events(mut self, events: Sender<AxisEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AxisState {
        self.state
    }

    /// 进入 Error 时记录的状态字
    pub fn last_error(&self) -> Option<StatusWord> {
        self.last_error
    }

    pub fn gear(&self) -> GearTrain {
        self.gear
    }

    pub fn driver(&self) -> &L6470<T> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut L6470<T> {
        &mut self.driver
    }

    pub fn into_driver(self) -> L6470<T> {
        self.driver
    }

    // ==================== 状态机入口 ====================

    /// 无新请求时推进一步
    pub fn tick(&mut self) -> Result<AxisState, AxisError> {
        self.step(None)
    }

    /// 带请求文本推进一步
    ///
    /// 文本无法识别时不做任何 I/O，状态不变。
    pub fn request(&mut self, text: &str) -> Result<AxisState, AxisError> {
        let request = match text.parse::<MotionRequest>() {
            Ok(request) => request,
            Err(err) => {
                warn!("{}: {}", self.name, err);
                return Err(err);
            },
        };
        self.step(Some(request))
    }

    /// 推进一步，返回推进后的状态
    ///
    /// 返回 `Ok(AxisState::Busy)` 表示运动尚未完成，不是错误。
    pub fn step(&mut self, request: Option<MotionRequest>) -> Result<AxisState, AxisError> {
        let result = self.dispatch(request);
        self.check_transport(result)
    }

    fn dispatch(&mut self, request: Option<MotionRequest>) -> Result<AxisState, AxisError> {
        match request {
            Some(MotionRequest::Init) => return self.reinitialize(),
            Some(req) if req.is_always_executable() => return self.execute_always(req),
            _ => {},
        }

        match (self.state, request) {
            (AxisState::Idle, request) => self.tick_idle(request),
            (state, Some(req)) => {
                self.drop_request(state, req);
                self.poll(state)
            },
            (state, None) => self.poll(state),
        }
    }

    fn poll(&mut self, state: AxisState) -> Result<AxisState, AxisError> {
        match state {
            AxisState::Init => self.tick_init(),
            AxisState::Idle => self.tick_idle(None),
            AxisState::Busy => self.tick_busy(),
            AxisState::Error => self.tick_error(),
            AxisState::Unknown => self.tick_unknown(),
        }
    }

    /// Idle/Busy 中途传输失败时转入 Unknown，下一拍安全停止
    fn check_transport<R>(&mut self, result: Result<R, AxisError>) -> Result<R, AxisError> {
        if let Err(err) = &result
            && err.is_transport()
            && matches!(self.state, AxisState::Idle | AxisState::Busy)
        {
            warn!("{}: transport failure in {} ({}), state unknown", self.name, self.state, err);
            self.state = AxisState::Unknown;
        }
        result
    }

    // ==================== 各状态 ====================

    fn tick_init(&mut self) -> Result<AxisState, AxisError> {
        // 第一次读数是上电噪声，丢弃
        self.driver.get_status()?;
        let status = self.driver.get_status()?;

        if status.is_unreachable() {
            warn!("Cannot connect to {} (status {}), is motor power on?", self.name, status);
            return Err(AxisError::DeviceUnreachable {
                axis: self.name.clone(),
                status,
            });
        }

        if !status.is_healthy() {
            self.driver.hard_hiz()?;
            warn!("Init error for {}: {}, trying again", self.name, status);
            return Err(AxisError::InitFault {
                axis: self.name.clone(),
                status,
            });
        }

        self.driver.soft_hiz()?;
        self.state = AxisState::Idle;
        self.last_error = None;
        info!("{} init finished successfully: {}", self.name, status);
        self.emit(AxisEvent::Initialized {
            axis: self.name.clone(),
            status,
        });
        Ok(AxisState::Idle)
    }

    fn tick_idle(&mut self, request: Option<MotionRequest>) -> Result<AxisState, AxisError> {
        let status = self.driver.get_status()?;
        if !status.is_healthy() {
            let state = self.enter_error(status)?;
            if let Some(req) = request {
                self.drop_request(state, req);
            }
            return Ok(state);
        }

        match request {
            Some(req) => self.execute_request(req),
            None => Ok(AxisState::Idle),
        }
    }

    fn tick_busy(&mut self) -> Result<AxisState, AxisError> {
        let status = self.driver.get_status()?;
        if status.is_ready() {
            debug!("{}: Busy -> Idle", self.name);
            self.state = AxisState::Idle;
        } else {
            trace!("{}: still busy ({})", self.name, status);
        }
        Ok(self.state)
    }

    fn tick_error(&mut self) -> Result<AxisState, AxisError> {
        let status = self.driver.get_status()?;
        if status.is_healthy() {
            info!("{}: fault cleared ({})", self.name, status);
            self.last_error = None;
            self.state = AxisState::Idle;
            self.emit(AxisEvent::FaultCleared {
                axis: self.name.clone(),
            });
        } else {
            trace!("{}: fault persists ({})", self.name, status);
        }
        Ok(self.state)
    }

    fn tick_unknown(&mut self) -> Result<AxisState, AxisError> {
        warn!("Unknown state for {}, stopping motor", self.name);
        self.emergency_stop()?;
        self.state = AxisState::Idle;
        Ok(AxisState::Idle)
    }

    fn enter_error(&mut self, status: StatusWord) -> Result<AxisState, AxisError> {
        self.driver.hard_hiz()?;
        self.state = AxisState::Error;
        self.last_error = Some(status);
        error!(
            "Error in {} driver: {:016b}\n{}",
            self.name,
            status.raw(),
            status.report()
        );
        self.emit(AxisEvent::FaultEntered {
            axis: self.name.clone(),
            status,
        });
        Ok(AxisState::Error)
    }

    fn drop_request(&mut self, state: AxisState, request: MotionRequest) {
        warn!("{}: dropping '{}' while {}", self.name, request, state);
        self.emit(AxisEvent::RequestDropped {
            axis: self.name.clone(),
            request,
            state,
        });
    }

    // ==================== 请求执行 ====================

    fn reinitialize(&mut self) -> Result<AxisState, AxisError> {
        self.driver.reset_device()?;
        debug!("{}: {} -> Init (device reset)", self.name, self.state);
        self.state = AxisState::Init;
        self.last_error = None;
        Ok(AxisState::Init)
    }

    fn execute_always(&mut self, request: MotionRequest) -> Result<AxisState, AxisError> {
        match request {
            MotionRequest::Off => self.driver.soft_hiz()?,
            _ => self.driver.soft_stop()?,
        }
        debug!("{}: '{}' executed in {}", self.name, request, self.state);
        Ok(self.state)
    }

    fn execute_request(&mut self, request: MotionRequest) -> Result<AxisState, AxisError> {
        match request {
            MotionRequest::Init => self.reinitialize(),
            MotionRequest::Stop | MotionRequest::Off => self.execute_always(request),
            MotionRequest::Slew(angle) => {
                let step_mode = self.driver.get_param(Register::StepMode)?;
                let target = self.target_to_raw(self.gear.angle_to_microsteps(angle, step_mode))?;
                self.stop_and_settle()?;
                self.driver.go_to(target as i64)?;
                self.enter_busy(request)
            },
            MotionRequest::Turn(delta) => {
                let step_mode = self.driver.get_param(Register::StepMode)?;
                let delta_steps = self.gear.microsteps(delta, step_mode);
                let current = self.driver.position()?;
                let target = self.target_to_raw((current as f64 + delta_steps).trunc())?;
                self.stop_and_settle()?;
                self.driver.go_to(target as i64)?;
                self.enter_busy(request)
            },
            MotionRequest::Track => {
                self.stop_and_settle()?;
                self.driver.run(self.track_speed as i64, 1)?;
                self.enter_busy(request)
            },
            MotionRequest::MarkSet => {
                let position = self.driver.get_param(Register::AbsPos)?;
                self.write_param(Register::Mark, position as i64)?;
                Ok(self.state)
            },
            MotionRequest::MarkGoto => {
                self.driver.go_mark()?;
                self.enter_busy(request)
            },
            MotionRequest::HomeSet => {
                self.stop_and_settle()?;
                self.write_param(Register::AbsPos, 0)?;
                Ok(self.state)
            },
            MotionRequest::HomeGoto => {
                self.driver.go_home()?;
                self.enter_busy(request)
            },
        }
    }

    fn enter_busy(&mut self, request: MotionRequest) -> Result<AxisState, AxisError> {
        debug!("{}: Idle -> Busy ({})", self.name, request);
        self.state = AxisState::Busy;
        Ok(AxisState::Busy)
    }

    fn stop_and_settle(&mut self) -> Result<(), AxisError> {
        self.driver.soft_stop()?;
        spin_sleep::sleep(self.settle_delay);
        Ok(())
    }

    /// 微步目标 → 22 位原始值，超出范围时不发送任何运动指令
    fn target_to_raw(&self, target: f64) -> Result<u32, AxisError> {
        if !(POSITION_MIN as f64..=POSITION_MAX as f64).contains(&target) {
            return Err(AxisError::InvalidArgument {
                field: "position",
                value: target.to_string(),
            });
        }
        Ok(position_to_raw(target as i32)?)
    }

    // ==================== 参数/查询 ====================

    /// 按名字写寄存器
    ///
    /// GetStatus → SetParam → GetStatus，失败时整体重试一次；
    /// 仍失败则 HardHiZ 并返回 `ParamWriteFailed`，不再重试。
    pub fn set_param(&mut self, name: &str, value: i64) -> Result<(), AxisError> {
        let register: Register = name.parse()?;
        self.set_register(register, value)
    }

    pub fn set_register(&mut self, register: Register, value: i64) -> Result<(), AxisError> {
        let result = self.write_param(register, value);
        self.check_transport(result)
    }

    fn write_param(&mut self, register: Register, value: i64) -> Result<(), AxisError> {
        // 参数校验在任何 I/O 之前
        let cmd = Command::set_param(register, signed_register_value(register, value)?)?;

        let status = self.param_attempt(cmd)?;
        if status.is_healthy() {
            return Ok(());
        }
        warn!(
            "Error setting {} for {} ({}), trying once more",
            register, self.name, status
        );
        self.emit(AxisEvent::ParamRetry {
            axis: self.name.clone(),
            register: register.name(),
            status,
        });

        let status = self.param_attempt(cmd)?;
        if status.is_healthy() {
            return Ok(());
        }
        self.driver.hard_hiz()?;
        error!(
            "Error setting {} for {} driver: {}\n{}",
            register,
            self.name,
            status,
            status.report()
        );
        self.emit(AxisEvent::ParamWriteFailed {
            axis: self.name.clone(),
            register: register.name(),
            status,
        });
        Err(AxisError::ParamWriteFailed {
            axis: self.name.clone(),
            register: register.name(),
            status,
        })
    }

    fn param_attempt(&mut self, cmd: Command) -> Result<StatusWord, AxisError> {
        // 先读一次清除残留的锁存标志
        self.driver.get_status()?;
        self.driver.execute(cmd)?;
        Ok(self.driver.get_status()?)
    }

    /// 输出轴当前角度（度），只读
    pub fn get_angle(&mut self) -> Result<f64, AxisError> {
        let steps = raw_to_position(self.driver.get_param(Register::AbsPos)?);
        let step_mode = self.driver.get_param(Register::StepMode)?;
        Ok(self.gear.microsteps_to_angle(steps, step_mode))
    }

    /// 按地址顺序写入配置中的全部寄存器
    pub fn configure(&mut self) -> Result<(), AxisError> {
        let params = self.params.clone();
        for (register, value) in params {
            debug!("{}: {} = {:#X}", self.name, register, value);
            self.set_register(register, value)?;
        }
        info!("{} configured ({} registers)", self.name, self.params.len());
        Ok(())
    }

    // ==================== 关闭 ====================

    /// 正常关闭：SoftHiZ，回到 Idle，清除错误
    pub fn shutdown(&mut self) -> Result<(), AxisError> {
        self.driver.soft_hiz()?;
        self.state = AxisState::Idle;
        self.last_error = None;
        info!("{} shut off", self.name);
        Ok(())
    }

    /// 紧急停止：HardHiZ
    pub fn emergency_stop(&mut self) -> Result<(), AxisError> {
        self.driver.hard_hiz()?;
        self.emit(AxisEvent::SafeStop {
            axis: self.name.clone(),
        });
        Ok(())
    }

    fn emit(&self, event: AxisEvent) {
        if let Some(events) = &self.events
            && events.try_send(event).is_err()
        {
            trace!("{}: event receiver unavailable", self.name);
        }
    }
}

impl<T: Transport> fmt::Debug for Axis<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Axis")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("gear", &self.gear)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l6470_spi::RecordingTransport;

    const OK: u16 = 0x7E03;

    fn axis() -> (Axis<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::new();
        let axis = Axis::new("alt", L6470::new(transport.clone()))
            .with_settle_delay(Duration::ZERO);
        (axis, transport)
    }

    #[test]
    fn test_initial_state() {
        let (axis, _) = axis();
        assert_eq!(axis.state(), AxisState::Init);
        assert_eq!(axis.last_error(), None);
        assert_eq!(axis.name(), "alt");
    }

    #[test]
    fn test_target_range() {
        let (axis, _) = axis();
        assert_eq!(axis.target_to_raw(-1.0).unwrap(), 0x3F_FFFF);
        assert!(axis.target_to_raw(POSITION_MAX as f64 + 1.0).is_err());
        assert!(axis.target_to_raw(POSITION_MIN as f64).is_ok());
    }

    #[test]
    fn test_unknown_state_recovers_with_hard_hiz() {
        let (mut axis, transport) = axis();
        axis.state = AxisState::Unknown;
        assert_eq!(axis.tick().unwrap(), AxisState::Idle);
        assert_eq!(transport.commands(), vec![Command::HardHiZ]);
    }

    #[test]
    fn test_idle_tick_checks_health() {
        let (mut axis, transport) = axis();
        axis.state = AxisState::Idle;
        transport.push_status(OK);
        assert_eq!(axis.tick().unwrap(), AxisState::Idle);
        assert_eq!(transport.commands(), vec![Command::GetStatus]);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AxisState::Busy.to_string(), "Busy");
        assert_eq!(AxisState::Unknown.to_string(), "Unknown");
    }
}
