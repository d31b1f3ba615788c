//! 安全停止守卫
//!
//! 持有 `&mut Axis` 期间若发生 panic 或提前返回，析构时对电机执行 HardHiZ。
//! 正常结束时调用 [`SafeStopGuard::shutdown`]（SoftHiZ）或 [`SafeStopGuard::release`]。

use crate::Axis;
use crate::AxisError;
use l6470_spi::Transport;
use std::ops::{Deref, DerefMut};
use tracing::warn;

pub struct SafeStopGuard<'a, T: Transport> {
    axis: &'a mut Axis<T>,
    armed: bool,
}

impl<'a, T: Transport> SafeStopGuard<'a, T> {
    pub fn new(axis: &'a mut Axis<T>) -> Self {
        Self { axis, armed: true }
    }

    /// 解除守卫，不发送任何指令
    pub fn release(mut self) {
        self.armed = false;
    }

    /// 正常关闭，成功后解除守卫
    ///
    /// 关闭失败时守卫保持武装，析构时仍会尝试 HardHiZ。
    pub fn shutdown(mut self) -> Result<(), AxisError> {
        self.axis.shutdown()?;
        self.armed = false;
        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl<T: Transport> Deref for SafeStopGuard<'_, T> {
    type Target = Axis<T>;

    fn deref(&self) -> &Self::Target {
        self.axis
    }
}

impl<T: Transport> DerefMut for SafeStopGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.axis
    }
}

impl<T: Transport> Drop for SafeStopGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("{} guard dropped without shutdown, stopping motor", self.axis.name());
        // 忽略错误，传输层可能已经不可用
        let _ = self.axis.emergency_stop();
    }
}
