//! # L6470 SPI Transport Layer
//!
//! SPI 字节交换抽象层，向上只暴露一个操作：发送若干字节，再接收若干字节。
//!
//! L6470 要求每个字节之间拉高一次 CS（芯片按字节锁存），所以
//! [`ChipSelectTransport`] 对每个字节单独做一次 select/transfer/deselect。

use smallvec::SmallVec;
use thiserror::Error;
use tracing::trace;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{Exchange, RecordingTransport, SimulatedL6470};

/// 接收缓冲区（最长 3 字节）
pub type ExchangeBuffer = SmallVec<[u8; 4]>;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum SpiError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bus Error: {message}")]
    Bus { message: String },
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

impl SpiError {
    pub fn bus(message: impl Into<String>) -> Self {
        SpiError::Bus {
            message: message.into(),
        }
    }
}

/// 字节交换端口
///
/// 一次调用先发送 `send` 中的全部字节，再接收 `recv_len` 个字节。
/// 实现必须保证一次调用内不与其他设备的交换交错。
pub trait Transport {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError> {
        (**self).exchange(send, recv_len)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError> {
        (**self).exchange(send, recv_len)
    }
}

/// 全双工单字节传输
pub trait SpiBus {
    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SpiError>;
}

/// 片选线（低有效）
pub trait ChipSelect {
    /// 拉低 CS
    fn select(&mut self);
    /// 拉高 CS
    fn deselect(&mut self);
}

/// 逐字节片选的传输实现
pub struct ChipSelectTransport<B, C> {
    bus: B,
    cs: C,
}

impl<B: SpiBus, C: ChipSelect> ChipSelectTransport<B, C> {
    pub fn new(bus: B, mut cs: C) -> Self {
        cs.deselect();
        Self { bus, cs }
    }

    fn transfer_one(&mut self, byte: u8) -> Result<u8, SpiError> {
        self.cs.select();
        let result = self.bus.transfer_byte(byte);
        // 出错也要释放 CS，否则芯片会把下一个字节拼进当前帧
        self.cs.deselect();
        result
    }

    pub fn free(self) -> (B, C) {
        (self.bus, self.cs)
    }
}

impl<B: SpiBus, C: ChipSelect> Transport for ChipSelectTransport<B, C> {
    fn exchange(&mut self, send: &[u8], recv_len: usize) -> Result<ExchangeBuffer, SpiError> {
        for &byte in send {
            self.transfer_one(byte)?;
        }
        let mut received = ExchangeBuffer::new();
        for _ in 0..recv_len {
            received.push(self.transfer_one(0x00)?);
        }
        trace!("SPI exchange: tx={:02X?} rx={:02X?}", send, received.as_slice());
        Ok(received)
    }
}
