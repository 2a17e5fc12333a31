//! # 分区块设备接口层
//!
//! 分区命名空间（ZNS）固态盘对上层呈现为一段线性的 LBA 空间，
//! 写入只能在写指针处顺序进行；更底层的转换层负责把它伪装成
//! “以追加为主”的块设备。[`ZonedDevice`] 就是对这种设备的抽象，
//! `zns-store` 只通过它读写设备。
//!
//! 所有偏移与长度都以**字节**表示，但必须按 LBA 对齐。

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use derive_more::Display;
use spin::Mutex;

/// 分区块设备驱动特质
pub trait ZonedDevice: Send + Sync + Any {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError>;
    /// 设备容量（字节）
    fn capacity(&self) -> u64;
    /// 逻辑块大小（字节）
    fn lba_size(&self) -> usize;
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[display(fmt = "misaligned I/O at {:#x} (len {})", offset, len)]
    Misaligned { offset: u64, len: usize },
    #[display(fmt = "I/O beyond device end at {:#x} (len {})", offset, len)]
    OutOfBounds { offset: u64, len: usize },
    /// 驱动返回的状态码
    #[display(fmt = "device I/O failed with status {}", _0)]
    Io(i32),
}

impl core::error::Error for DeviceError {}

/// 设备操作计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoStats {
    pub reads: usize,
    pub writes: usize,
}

/// 内存中模拟的分区命名空间。
///
/// 只接受按块对齐的读写，便于检验上层从不发出零碎 I/O。
pub struct MemZone {
    lba_size: usize,
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    /// 置位后所有操作都失败，用于模拟设备故障
    faulty: AtomicBool,
}

impl MemZone {
    pub fn new(lba_size: usize, nblocks: usize) -> Self {
        Self {
            lba_size,
            data: Mutex::new(vec![0; lba_size * nblocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            faulty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn stats(&self) -> IoStats {
        IoStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::Relaxed);
    }

    /// 校验请求，返回其在缓冲区内的字节区间
    fn check(&self, offset: u64, len: usize) -> Result<core::ops::Range<usize>, DeviceError> {
        if self.faulty.load(Ordering::Relaxed) {
            return Err(DeviceError::Io(-5));
        }

        if offset % self.lba_size as u64 != 0 || len % self.lba_size != 0 {
            return Err(DeviceError::Misaligned { offset, len });
        }

        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end as u64 <= self.capacity() => Ok(start..end),
            _ => Err(DeviceError::OutOfBounds { offset, len }),
        }
    }
}

impl ZonedDevice for MemZone {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.check(offset, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError> {
        let range = self.check(offset, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.data.lock().len() as u64
    }

    #[inline]
    fn lba_size(&self) -> usize {
        self.lba_size
    }
}
