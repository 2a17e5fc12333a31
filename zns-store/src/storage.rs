//! # 存储层桥接
//!
//! 元数据与数据段落盘的唯一通道。
//! 带`overwrite`时，若该索引节点上一次的记录仍在日志末尾，
//! 就收回它占用的空间再追加，使得反复更新同一个索引节点不会让日志膨胀。

use crate::layout::{DiskInode, OnDisk};
use crate::{BlockManager, Result};

/// 追加一段数据，返回其起始地址。
///
/// `overwrite`是被取代的索引节点记录的地址。
#[inline]
pub fn store_segment_on_disk(
    allocator: &BlockManager,
    data: &[u8],
    overwrite: Option<u64>,
) -> Result<u64> {
    allocator.reappend(overwrite.map(|lba| (lba, DiskInode::SIZE)), data)
}

#[inline]
pub fn get_from_disk(allocator: &BlockManager, lba: u64, data: &mut [u8]) -> Result<()> {
    allocator.read(lba, data)
}
