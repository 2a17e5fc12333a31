use alloc::string::String;

use derive_more::Display;
use zoned_dev::DeviceError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Error {
    /// 追加会越过设备末尾
    #[display(fmt = "no space for {} bytes at {:#x} (capacity {:#x})", len, offset, capacity)]
    OutOfSpace { offset: u64, len: usize, capacity: u64 },
    #[display(fmt = "{}", _0)]
    Device(DeviceError),

    #[display(fmt = "inode {} not found", _0)]
    InodeNotFound(u64),
    #[display(fmt = "directory {:?} not found", _0)]
    DirectoryNotFound(String),
    #[display(fmt = "entry {:?} not found", _0)]
    EntryNotFound(String),
    /// 目录的索引节点没有指向目录表的区段
    #[display(fmt = "dnode of directory {} not found", _0)]
    DnodeNotFound(u64),

    #[display(fmt = "extent table of inode {} is full", _0)]
    ExtentTableFull(u64),
    #[display(fmt = "directory {} is full", _0)]
    DirectoryFull(u64),

    /// 从位置表读回的记录不属于该编号
    #[display(fmt = "expected inode {} on disk, found {}", ino, found)]
    Inconsistent { ino: u64, found: u64 },
    #[display(fmt = "inode {} is not a directory", _0)]
    NotADirectory(u64),
    #[display(fmt = "inode {} is a directory", _0)]
    IsADirectory(u64),
    #[display(fmt = "directory {} is not empty", _0)]
    DirectoryNotEmpty(u64),

    #[display(fmt = "invalid name")]
    InvalidName,
    #[display(fmt = "name of {} bytes is too long", _0)]
    NameTooLong(usize),
    #[display(fmt = "{:?} already exists", _0)]
    AlreadyExists(String),
    #[display(fmt = "invalid configuration: {}", _0)]
    InvalidConfig(&'static str),
}

impl core::error::Error for Error {}

impl From<DeviceError> for Error {
    #[inline]
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}
