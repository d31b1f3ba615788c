//! 台架运行器
//!
//! 每根轴一颗模拟芯片，固定周期推进所有轴；轴完成初始化后立即写入配置寄存器。

use crate::router::Line;
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, unbounded};
use l6470_client::{Axis, AxisEvent, AxisState, MountConfig};
use l6470_driver::L6470;
use l6470_spi::SimulatedL6470;
use std::collections::HashMap;
use tracing::{error, info, warn};

pub struct Bench {
    axes: Vec<Axis<SimulatedL6470>>,
    events: Receiver<AxisEvent>,
    /// 每根轴最近一次 tick 错误，用于去重日志
    last_errors: HashMap<String, String>,
}

impl Bench {
    pub fn new(config: &MountConfig, motion_polls: u32) -> Result<Self> {
        let (tx, rx) = unbounded();
        let axes = config
            .axes
            .iter()
            .map(|axis_config| {
                let chip = SimulatedL6470::with_motion_polls(motion_polls);
                Axis::from_config(axis_config, L6470::new(chip))
                    .map(|axis| axis.with_events(tx.clone()))
                    .with_context(|| format!("invalid axis {}", axis_config.name))
            })
            .collect::<Result<Vec<_>>>()?;
        if axes.is_empty() {
            return Err(anyhow!("mount configuration has no axes"));
        }
        Ok(Self {
            axes,
            events: rx,
            last_errors: HashMap::new(),
        })
    }

    pub fn axes(&self) -> &[Axis<SimulatedL6470>] {
        &self.axes
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.axes
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| anyhow!("unknown axis {:?}", name))
    }

    /// 处理一行输入，返回被推进过的轴（本周期不再 tick）
    pub fn handle(&mut self, line: Line) -> Result<Option<usize>> {
        match line {
            Line::Empty | Line::Quit => Ok(None),
            Line::List => {
                for axis in &self.axes {
                    println!("{:<8} {}", axis.name(), axis.state());
                }
                Ok(None)
            },
            Line::Angle { axis } => {
                let index = self.index_of(&axis)?;
                let angle = self.axes[index].get_angle()?;
                println!("{}: {:.4}°", axis, angle);
                Ok(None)
            },
            Line::SetParam { axis, name, value } => {
                let index = self.index_of(&axis)?;
                self.axes[index].set_param(&name, value)?;
                info!("{}: {} set to {:#X}", axis, name, value);
                Ok(None)
            },
            Line::Request { axis, text } => {
                let index = self.index_of(&axis)?;
                let before = self.axes[index].state();
                let result = self.axes[index].request(&text);
                self.after_step(index, before, result);
                Ok(Some(index))
            },
        }
    }

    /// 推进所有轴（`skip` 本周期已处理过请求）
    pub fn tick_all(&mut self, skip: Option<usize>) {
        for index in 0..self.axes.len() {
            if Some(index) == skip {
                continue;
            }
            let before = self.axes[index].state();
            let result = self.axes[index].tick();
            self.after_step(index, before, result);
        }
    }

    fn after_step(
        &mut self,
        index: usize,
        before: AxisState,
        result: Result<AxisState, l6470_client::AxisError>,
    ) {
        let axis = &mut self.axes[index];
        match result {
            Ok(state) => {
                self.last_errors.remove(axis.name());
                if before == AxisState::Init
                    && state == AxisState::Idle
                    && let Err(e) = axis.configure()
                {
                    error!("{}: configuration failed: {}", axis.name(), e);
                }
            },
            Err(e) => {
                let message = e.to_string();
                if self.last_errors.get(axis.name()) != Some(&message) {
                    warn!("{}: {}", axis.name(), message);
                    self.last_errors.insert(axis.name().to_string(), message);
                }
            },
        }
    }

    /// 输出并清空事件队列
    pub fn drain_events(&self) -> Vec<AxisEvent> {
        let events: Vec<AxisEvent> = self.events.try_iter().collect();
        for event in &events {
            if event.is_fault() {
                println!("[FAULT] {:?}", event);
            } else {
                println!("[event] {:?}", event);
            }
        }
        events
    }

    /// 关闭所有轴；单轴失败不影响其他轴
    pub fn shutdown(&mut self) -> Result<()> {
        let mut failed = Vec::new();
        for axis in &mut self.axes {
            if let Err(e) = axis.shutdown() {
                error!("{}: shutdown failed: {}", axis.name(), e);
                failed.push(axis.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("shutdown failed for {}", failed.join(", ")))
        }
    }
}
