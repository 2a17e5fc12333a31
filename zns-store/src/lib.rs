#![no_std]

extern crate alloc;

/* zns-store 的整体架构，自上而下 */

// 对象层：面向应用的文件与目录
mod dir;
mod file;
mod inode;

// 存储层桥接：元数据与数据段落盘的唯一通道
mod storage;

// 全局状态：索引节点位置表、各类缓存、编号计数器
mod context;

// 块分配器层：把只能追加的设备变成可随机读写的存储
mod allocator;

// 磁盘数据结构层
pub mod layout;

mod config;
mod error;

pub use self::{
    allocator::BlockManager,
    config::Config,
    context::StorageContext,
    dir::{Lookup, OnMissing, Resolved, StoDir, find_inode, resolve},
    error::{Error, Result},
    file::StoFile,
    inode::{InodeFlag, Stat, StatKind, StoInode},
    storage::{get_from_disk, store_segment_on_disk},
};
pub use zoned_dev::{DeviceError, ZonedDevice};

/// 根目录的索引节点号，编号计数器也从这里开始
pub const ROOT_INO: u64 = 2;
/// 名字的最大字节数，最后一字节留给 \0
pub const NAME_MAX_LEN: usize = 23;
/// 目录表的容量
pub const DIRSIZE: usize = 14;
/// 索引节点可记录的区段数
pub const MAX_SEGMENTS: usize = 24;
/// 预留给索引节点位置表的块数
pub const IMAP_RESERVED_FRACTION: u64 = 0;
