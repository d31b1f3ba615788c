//! 轴监督器集成测试
//!
//! 用 RecordingTransport 精确脚本化状态字，检查每一拍发出的指令序列。

use crossbeam_channel::{Receiver, unbounded};
use l6470_client::{Axis, AxisConfig, AxisError, AxisEvent, AxisState, MotionRequest};
use l6470_driver::{Command, Direction, L6470, Register};
use l6470_spi::RecordingTransport;
use std::time::Duration;

const OK: u16 = 0x7E03;
const MOVING: u16 = 0x7E01;
const WRONG_CMD: u16 = 0x7F03;
const OVERCURRENT: u16 = 0x6E03;

fn new_axis() -> (Axis<RecordingTransport>, RecordingTransport, Receiver<AxisEvent>) {
    let transport = RecordingTransport::new();
    let (tx, rx) = unbounded();
    let axis = Axis::new("alt", L6470::new(transport.clone()))
        .with_settle_delay(Duration::ZERO)
        .with_events(tx);
    (axis, transport, rx)
}

/// 初始化到 Idle 并清空记录
fn idle_axis() -> (Axis<RecordingTransport>, RecordingTransport, Receiver<AxisEvent>) {
    let (mut axis, transport, rx) = new_axis();
    transport.push_statuses(&[OK, OK]);
    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    transport.clear();
    while rx.try_recv().is_ok() {}
    (axis, transport, rx)
}

fn busy_axis() -> (Axis<RecordingTransport>, RecordingTransport, Receiver<AxisEvent>) {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_status(OK);
    assert_eq!(axis.step(Some(MotionRequest::Track)).unwrap(), AxisState::Busy);
    transport.clear();
    (axis, transport, rx)
}

fn events(rx: &Receiver<AxisEvent>) -> Vec<AxisEvent> {
    rx.try_iter().collect()
}

// ==================== Init ====================

#[test]
fn test_unreachable_device_stays_in_init() {
    let (mut axis, transport, _rx) = new_axis();
    transport.push_statuses(&[0x0000, 0x0000]);

    let err = axis.tick().unwrap_err();
    assert!(matches!(err, AxisError::DeviceUnreachable { ref axis, .. } if axis == "alt"));
    assert_eq!(axis.state(), AxisState::Init);
    assert_eq!(transport.commands(), vec![Command::GetStatus, Command::GetStatus]);
}

#[test]
fn test_all_ones_is_unreachable() {
    let (mut axis, transport, _rx) = new_axis();
    transport.push_statuses(&[0xFFFF, 0xFFFF]);
    assert!(matches!(axis.tick(), Err(AxisError::DeviceUnreachable { .. })));
    assert_eq!(axis.state(), AxisState::Init);
}

#[test]
fn test_healthy_init_enters_idle_with_one_soft_hiz() {
    let (mut axis, transport, rx) = new_axis();
    // 第一次读数被丢弃
    transport.push_statuses(&[0x0000, OK]);

    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    assert_eq!(
        transport.commands(),
        vec![Command::GetStatus, Command::GetStatus, Command::SoftHiZ]
    );
    assert_eq!(transport.count(Command::SoftHiZ), 1);
    assert!(matches!(
        events(&rx).as_slice(),
        [AxisEvent::Initialized { status, .. }] if status.raw() == OK
    ));
}

#[test]
fn test_init_fault_hard_hiz_and_retry() {
    let (mut axis, transport, _rx) = new_axis();
    transport.push_statuses(&[OK, OVERCURRENT]);

    assert!(matches!(axis.tick(), Err(AxisError::InitFault { .. })));
    assert_eq!(axis.state(), AxisState::Init);
    assert_eq!(transport.count(Command::HardHiZ), 1);

    // 下一拍重新尝试
    transport.push_statuses(&[OK, OK]);
    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
}

#[test]
fn test_transport_failure_in_init_keeps_init() {
    let (mut axis, transport, _rx) = new_axis();
    transport.fail_after(0);
    assert!(axis.tick().unwrap_err().is_transport());
    assert_eq!(axis.state(), AxisState::Init);
}

// ==================== Idle → Busy ====================

#[test]
fn test_slew_90_degrees() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_status(OK);
    transport.push_response(&[0x05]);

    assert_eq!(axis.request("slew 90").unwrap(), AxisState::Busy);
    assert_eq!(
        transport.commands(),
        vec![
            Command::GetStatus,
            Command::GetParam {
                register: Register::StepMode
            },
            Command::SoftStop,
            Command::GoTo { position: 1600 },
        ]
    );
}

#[test]
fn test_slew_negative_angle_encodes_twos_complement() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_status(OK);
    transport.push_response(&[0x05]);

    axis.step(Some(MotionRequest::Slew(-90.0))).unwrap();
    assert_eq!(
        transport.commands().last(),
        Some(&Command::GoTo {
            position: (-1600i32 as u32) & 0x3F_FFFF
        })
    );
}

#[test]
fn test_slew_out_of_range_sends_no_motion() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_status(OK);
    transport.push_response(&[0x07]);

    let err = axis.step(Some(MotionRequest::Slew(1.0e6))).unwrap_err();
    assert!(matches!(err, AxisError::InvalidArgument { field: "position", .. }));
    assert_eq!(axis.state(), AxisState::Idle);
    assert_eq!(transport.count(Command::SoftStop), 0);
    assert!(
        !transport
            .commands()
            .iter()
            .any(|c| matches!(c, Command::GoTo { .. }))
    );
}

#[test]
fn test_turn_is_relative_to_signed_position() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_status(OK);
    transport.push_response(&[0x05]);
    // ABS_POS = -100
    transport.push_response(&[0x3F, 0xFF, 0x9C]);

    assert_eq!(axis.request("turn 90").unwrap(), AxisState::Busy);
    assert_eq!(
        transport.commands().last(),
        Some(&Command::GoTo { position: 1500 })
    );
}

#[test]
fn test_track_runs_forward_at_track_speed() {
    let (axis, transport, _rx) = idle_axis();
    let mut axis = axis.with_track_speed(0x200);
    transport.push_status(OK);

    assert_eq!(axis.request("track").unwrap(), AxisState::Busy);
    assert_eq!(
        transport.commands(),
        vec![
            Command::GetStatus,
            Command::SoftStop,
            Command::Run {
                direction: Direction::Forward,
                speed: 0x200
            },
        ]
    );
}

#[test]
fn test_mark_and_home() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_status(OK);
    transport.push_response(&[0x00, 0x00, 0x10]);
    transport.set_default_status(OK);

    // mark set：读 ABS_POS 写入 MARK，状态不变
    assert_eq!(axis.request("mark set").unwrap(), AxisState::Idle);
    assert_eq!(
        transport.count(Command::SetParam {
            register: Register::Mark,
            value: 0x10
        }),
        1
    );

    transport.clear();
    assert_eq!(axis.request("home set").unwrap(), AxisState::Idle);
    let commands = transport.commands();
    let stop = commands.iter().position(|c| *c == Command::SoftStop).unwrap();
    let write = commands
        .iter()
        .position(|c| {
            *c == Command::SetParam {
                register: Register::AbsPos,
                value: 0,
            }
        })
        .unwrap();
    assert!(stop < write);

    transport.clear();
    assert_eq!(axis.request("mark").unwrap(), AxisState::Busy);
    assert_eq!(transport.commands().last(), Some(&Command::GoMark));

    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    transport.clear();
    assert_eq!(axis.request("home").unwrap(), AxisState::Busy);
    assert_eq!(transport.commands().last(), Some(&Command::GoHome));
}

// ==================== Busy ====================

#[test]
fn test_busy_completes_when_busy_bit_released() {
    let (mut axis, transport, _rx) = busy_axis();
    transport.push_status(MOVING);
    assert_eq!(axis.tick().unwrap(), AxisState::Busy);
    transport.push_status(OK);
    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    assert_eq!(transport.commands(), vec![Command::GetStatus, Command::GetStatus]);
}

#[test]
fn test_request_dropped_while_busy() {
    let (mut axis, transport, rx) = busy_axis();
    transport.push_status(MOVING);

    assert_eq!(axis.request("slew 10").unwrap(), AxisState::Busy);
    // 只做了一次轮询，没有运动指令
    assert_eq!(transport.commands(), vec![Command::GetStatus]);
    assert!(matches!(
        events(&rx).as_slice(),
        [AxisEvent::RequestDropped { state: AxisState::Busy, request: MotionRequest::Slew(_), .. }]
    ));
}

#[test]
fn test_stop_and_off_execute_in_any_state() {
    let (mut axis, transport, _rx) = busy_axis();
    assert_eq!(axis.request("stop").unwrap(), AxisState::Busy);
    assert_eq!(transport.commands(), vec![Command::SoftStop]);

    let (mut axis, transport, _rx) = new_axis();
    assert_eq!(axis.request("off").unwrap(), AxisState::Init);
    assert_eq!(transport.commands(), vec![Command::SoftHiZ]);
}

#[test]
fn test_init_request_resets_from_any_state() {
    let (mut axis, transport, _rx) = busy_axis();
    assert_eq!(axis.request("init").unwrap(), AxisState::Init);
    assert_eq!(transport.commands(), vec![Command::ResetDevice]);
    assert_eq!(axis.state(), AxisState::Init);
}

#[test]
fn test_unrecognized_request_does_no_io() {
    let (mut axis, transport, _rx) = idle_axis();
    assert!(matches!(
        axis.request("warp 9"),
        Err(AxisError::UnrecognizedCommand { .. })
    ));
    assert!(transport.exchanges().is_empty());
    assert_eq!(axis.state(), AxisState::Idle);
}

#[test]
fn test_bad_angle_does_no_io() {
    let (mut axis, transport, _rx) = idle_axis();
    let err = axis.request("slewabc").unwrap_err();
    assert!(matches!(
        err,
        AxisError::InvalidArgument { field: "angle", ref value } if value == "abc"
    ));
    assert!(transport.exchanges().is_empty());
    assert_eq!(axis.state(), AxisState::Idle);
}

// ==================== Error ====================

#[test]
fn test_fault_entry_and_recovery() {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_status(OVERCURRENT);

    assert_eq!(axis.tick().unwrap(), AxisState::Error);
    assert_eq!(transport.commands(), vec![Command::GetStatus, Command::HardHiZ]);
    assert_eq!(axis.last_error().map(|s| s.raw()), Some(OVERCURRENT));

    // 故障持续
    transport.push_status(OVERCURRENT);
    assert_eq!(axis.tick().unwrap(), AxisState::Error);

    // 请求被丢弃
    transport.push_status(OVERCURRENT);
    assert_eq!(axis.request("track").unwrap(), AxisState::Error);

    transport.push_status(OK);
    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    assert_eq!(axis.last_error(), None);

    let events = events(&rx);
    assert!(matches!(events.first(), Some(AxisEvent::FaultEntered { .. })));
    assert!(events.iter().any(|e| matches!(e, AxisEvent::RequestDropped { state: AxisState::Error, .. })));
    assert!(matches!(events.last(), Some(AxisEvent::FaultCleared { .. })));
    assert!(events[0].is_fault());
}

#[test]
fn test_fault_during_request_drops_request() {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_status(OVERCURRENT);

    assert_eq!(axis.request("slew 90").unwrap(), AxisState::Error);
    assert_eq!(transport.commands(), vec![Command::GetStatus, Command::HardHiZ]);
    let events = events(&rx);
    assert_eq!(events.len(), 2);
}

// ==================== Unknown ====================

#[test]
fn test_transport_failure_enters_unknown_then_safe_stop() {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_status(OK);
    // GetStatus 两次交换成功，GetParam 操作码交换失败
    transport.fail_after(2);

    assert!(axis.request("slew 10").unwrap_err().is_transport());
    assert_eq!(axis.state(), AxisState::Unknown);

    transport.clear();
    assert_eq!(axis.tick().unwrap(), AxisState::Idle);
    assert_eq!(transport.commands(), vec![Command::HardHiZ]);
    assert!(matches!(events(&rx).as_slice(), [AxisEvent::SafeStop { .. }]));
}

// ==================== 参数写入 ====================

#[test]
fn test_set_param_retries_once_then_fails() {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_statuses(&[OK, WRONG_CMD, OK, WRONG_CMD]);

    let err = axis.set_param("MAX_SPEED", 0x20).unwrap_err();
    assert!(matches!(
        err,
        AxisError::ParamWriteFailed { register: "MAX_SPEED", .. }
    ));
    let write = Command::SetParam {
        register: Register::MaxSpeed,
        value: 0x20,
    };
    assert_eq!(transport.count(write), 2);
    assert_eq!(transport.count(Command::HardHiZ), 1);
    assert_eq!(transport.pending_responses(), 0);

    let events = events(&rx);
    assert!(matches!(events[0], AxisEvent::ParamRetry { register: "MAX_SPEED", .. }));
    assert!(matches!(events[1], AxisEvent::ParamWriteFailed { .. }));
}

#[test]
fn test_set_param_retry_succeeds() {
    let (mut axis, transport, rx) = idle_axis();
    transport.push_statuses(&[OK, WRONG_CMD, OK, OK]);

    axis.set_param("ACC", 0x100).unwrap();
    assert_eq!(transport.count(Command::HardHiZ), 0);
    assert_eq!(events(&rx).len(), 1);
}

#[test]
fn test_set_param_validates_before_io() {
    let (mut axis, transport, _rx) = idle_axis();
    assert!(axis.set_param("WARP", 1).is_err());
    assert!(axis.set_param("STATUS", 1).is_err());
    assert!(axis.set_param("ACC", 0x1000).is_err());
    assert!(transport.exchanges().is_empty());
    assert_eq!(axis.state(), AxisState::Idle);
}

#[test]
fn test_set_param_negative_position_is_twos_complement() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_statuses(&[OK, OK, OK, OK]);

    axis.set_param("ABS_POS", -12).unwrap();
    axis.set_param("MARK", -1).unwrap();
    let writes: Vec<Command> = transport
        .commands()
        .into_iter()
        .filter(|c| matches!(c, Command::SetParam { .. }))
        .collect();
    assert_eq!(
        writes,
        vec![
            Command::SetParam {
                register: Register::AbsPos,
                value: 0x3F_FFF4,
            },
            Command::SetParam {
                register: Register::Mark,
                value: 0x3F_FFFF,
            },
        ]
    );

    // 超出 22 位补码范围，以及非位置寄存器的负值
    transport.clear();
    assert!(axis.set_param("ABS_POS", -(1 << 21) - 1).is_err());
    assert!(axis.set_param("MARK", i64::MIN).is_err());
    assert!(axis.set_param("ACC", -1).is_err());
    assert!(transport.exchanges().is_empty());
}

#[test]
fn test_configure_writes_in_address_order() {
    let transport = RecordingTransport::new();
    transport.set_default_status(OK);
    let mut config = AxisConfig::new("azi");
    config.params.insert("STEP_MODE".to_string(), 5);
    config.params.insert("MAX_SPEED".to_string(), 0x20);
    config.params.insert("ACC".to_string(), 0x8A);

    let mut axis = Axis::from_config(&config, L6470::new(transport.clone())).unwrap();
    axis.configure().unwrap();

    let writes: Vec<Register> = transport
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::SetParam { register, .. } => Some(register),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec![Register::Acc, Register::MaxSpeed, Register::StepMode]);
}

#[test]
fn test_from_config_rejects_invalid() {
    let config = AxisConfig::new("bad:name");
    assert!(Axis::from_config(&config, L6470::new(RecordingTransport::new())).is_err());
}

// ==================== 查询/关闭 ====================

#[test]
fn test_get_angle_reads_without_state_change() {
    let (mut axis, transport, _rx) = idle_axis();
    transport.push_response(&[0x00, 0x06, 0x40]);
    transport.push_response(&[0x05]);
    assert_eq!(axis.get_angle().unwrap(), 90.0);

    transport.push_response(&[0x3F, 0xF9, 0xC0]);
    transport.push_response(&[0x05]);
    assert_eq!(axis.get_angle().unwrap(), -90.0);
    assert_eq!(axis.state(), AxisState::Idle);
}

#[test]
fn test_shutdown_and_emergency_stop() {
    let (mut axis, transport, rx) = busy_axis();
    axis.shutdown().unwrap();
    assert_eq!(axis.state(), AxisState::Idle);
    assert_eq!(transport.commands(), vec![Command::SoftHiZ]);

    transport.clear();
    axis.emergency_stop().unwrap();
    assert_eq!(transport.commands(), vec![Command::HardHiZ]);
    assert!(matches!(events(&rx).as_slice(), [AxisEvent::SafeStop { .. }]));
}

#[test]
fn test_events_ignored_when_receiver_dropped() {
    let (mut axis, transport, rx) = idle_axis();
    drop(rx);
    transport.push_status(OVERCURRENT);
    assert_eq!(axis.tick().unwrap(), AxisState::Error);
}
