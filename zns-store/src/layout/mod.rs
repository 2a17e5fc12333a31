//! # 磁盘数据结构层
//!
//! zns-store 的日志布局：
//! 预留区域 | 数据块、目录表、索引节点记录依次追加……
//!
//! 每种记录都是定长的 `#[repr(C)]` 结构体，按字节原样落盘。

use core::{mem, ptr, slice};

use crate::{Error, NAME_MAX_LEN, Result};

mod segment;
pub use segment::Segment;

mod inode;
pub use inode::DiskInode;

/// 目录表及其记录
mod dnode;
pub use dnode::{DirRecord, Dnode};

/// 按字节原样落盘的定长记录
///
/// # Safety
///
/// 实现者必须是 `#[repr(C)]`、不含填充字节，且任意位模式都是合法值。
pub unsafe trait OnDisk: Sized + Default {
    const SIZE: usize = mem::size_of::<Self>();

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

type NameBuf = [u8; NAME_MAX_LEN + 1];

/// 名字不能为空，不能含有 `/` 与 `\0`
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|c| c == b'/' || c == 0) {
        return Err(Error::InvalidName);
    }
    if name.len() > NAME_MAX_LEN {
        return Err(Error::NameTooLong(name.len()));
    }
    Ok(())
}

/// 超长的部分会被截断，调用者应先用 [`check_name`] 校验
fn encode_name(name: &str) -> NameBuf {
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_MAX_LEN);
    let mut buf = [0; NAME_MAX_LEN + 1];
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

fn decode_name(buf: &NameBuf) -> &str {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(NAME_MAX_LEN);
    core::str::from_utf8(&buf[..len]).unwrap_or_default()
}
