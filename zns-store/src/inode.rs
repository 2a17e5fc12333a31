//! # 索引节点层
//!
//! [`StoInode`] 是磁盘记录 [`DiskInode`] 在内存中的投影，带有脏标记。
//! 修改只发生在内存里，[`StoInode::write_to_disk`] 时才追加到日志，
//! 并在位置表中登记新地址。

use alloc::sync::Arc;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

use crate::layout::{DiskInode, OnDisk, Segment};
use crate::storage;
use crate::{Error, Result, StorageContext};

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeFlag {
    Directory = 0b0001,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Directory,
    #[default]
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub size: u64,
    pub kind: StatKind,
    pub time: u64,
    pub nsegments: usize,
}

#[derive(Debug, Clone)]
pub struct StoInode {
    disk: DiskInode,
    dirty: bool,
    /// 本节点最新记录的地址，仍在日志末尾时可以被收回
    location: Option<u64>,
}

impl StoInode {
    /// 分配新的编号并打上创建时间，尚未落盘
    pub(crate) fn new(ctx: &StorageContext, name: &str, flags: BitFlags<InodeFlag>) -> Self {
        let mut disk = DiskInode::default();
        disk.init(ctx.alloc_ino(), name, flags.bits(), ctx.now());
        log::debug!("new inode {} {name:?}", disk.id);

        Self {
            disk,
            dirty: true,
            location: None,
        }
    }

    /// 由读回的磁盘记录构造
    pub(crate) fn hydrate(disk: DiskInode, location: u64) -> Self {
        Self {
            disk,
            dirty: false,
            location: Some(location),
        }
    }

    #[inline]
    pub fn ino(&self) -> u64 {
        self.disk.id
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.disk.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.disk.name()
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<InodeFlag> {
        BitFlags::from_bits_truncate(self.disk.flags)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags().contains(InodeFlag::Directory)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn is_inserted(&self) -> bool {
        self.disk.is_inserted()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.disk.is_deleted()
    }

    #[inline]
    pub fn extents(&self) -> &[Segment] {
        self.disk.segments()
    }

    #[inline]
    pub fn disk(&self) -> &DiskInode {
        &self.disk
    }

    pub fn stat(&self) -> Stat {
        Stat {
            ino: self.ino(),
            size: self.size(),
            kind: if self.is_dir() {
                StatKind::Directory
            } else {
                StatKind::File
            },
            time: self.disk.time,
            nsegments: self.extents().len(),
        }
    }

    /// 记录新写入的区段。
    ///
    /// 紧接上一区段末尾的区段并入上一区段，否则占用区段表的新槽位；
    /// 区段表已满时报错，索引节点不变。
    pub fn add_segment(&mut self, lba: u64, nblocks: u32, lba_size: usize) -> Result<()> {
        if nblocks == 0 {
            return Ok(());
        }

        if let Some(last) = self.disk.last_segment_mut() {
            if last.end(lba_size) == lba {
                last.nblocks += nblocks;
                self.dirty = true;
                return Ok(());
            }
        }

        if !self.disk.try_push_segment(Segment::new(lba, nblocks)) {
            return Err(Error::ExtentTableFull(self.ino()));
        }
        self.dirty = true;

        Ok(())
    }

    /// 若有改动则把记录追加到日志，返回是否真的写了
    pub fn write_to_disk(&mut self, ctx: &StorageContext) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let inserted = self.disk.is_inserted();
        let overwrite = if inserted { self.location } else { None };
        self.disk.set_inserted(true);

        let lba = match storage::store_segment_on_disk(ctx.allocator(), self.disk.as_bytes(), overwrite)
        {
            Ok(lba) => lba,
            Err(err) => {
                self.disk.set_inserted(inserted);
                return Err(err);
            }
        };

        ctx.record_location(self.ino(), lba);
        self.location = Some(lba);
        self.dirty = false;
        log::debug!("inode {} written at {lba:#x}", self.ino());

        Ok(true)
    }

    #[inline]
    pub fn mark_deleted(&mut self) {
        self.disk.set_deleted(true);
        self.dirty = true;
    }
}

impl StoInode {
    #[inline]
    pub(crate) fn location(&self) -> Option<u64> {
        self.location
    }

    /// 旧记录已被覆盖或已不在日志末尾，不能再收回
    #[inline]
    pub(crate) fn forget_location(&mut self) {
        self.location = None;
    }

    #[inline]
    pub(crate) fn set_size(&mut self, size: u64) {
        self.disk.size = size;
        self.dirty = true;
    }

    #[inline]
    pub(crate) fn is_extents_full(&self) -> bool {
        self.disk.is_segments_full()
    }

    /// 旧记录所在的块被`clobbered`区间覆盖了，把当前记录重新写回。
    ///
    /// 被覆盖的区间仍在日志末尾时，记录写回原处。
    pub(crate) fn restore_record(&mut self, ctx: &StorageContext, clobbered: (u64, usize)) -> Result<()> {
        let lba = ctx.allocator().reappend(Some(clobbered), self.disk.as_bytes())?;
        ctx.record_location(self.ino(), lba);
        self.location = Some(lba);
        log::debug!("inode {} restored at {lba:#x}", self.ino());

        Ok(())
    }

    /// 从区段表中摘下最后一块，返回其地址
    pub(crate) fn pop_tail_block(&mut self, lba_size: usize) -> Option<u64> {
        let last = self.disk.last_segment_mut()?;
        let block = last.last_block(lba_size);
        last.nblocks -= 1;
        if last.nblocks == 0 {
            self.disk.pop_segment();
        }
        self.dirty = true;

        Some(block)
    }
}

impl StorageContext {
    /// 先查缓存，未命中时按位置表从磁盘读回并缓存。
    ///
    /// 从未落盘的编号返回空，这不是错误。
    pub fn get_stoinode_by_id(&self, ino: u64) -> Result<Option<Arc<Mutex<StoInode>>>> {
        if let Some(inode) = self.inode_cache.lock().get(&ino) {
            return Ok(Some(inode.clone()));
        }

        let Some(lba) = self.inode_location(ino) else {
            log::debug!("inode {ino} not found");
            return Ok(None);
        };

        let mut disk = DiskInode::default();
        storage::get_from_disk(self.allocator(), lba, disk.as_bytes_mut())?;
        if disk.id != ino {
            log::error!("inode map points {ino} to {lba:#x}, which holds inode {}", disk.id);
            return Err(Error::Inconsistent { ino, found: disk.id });
        }

        Ok(Some(self.cache_inode(StoInode::hydrate(disk, lba))))
    }

    /// 索引节点记录的快照
    pub fn get_inode_by_id(&self, ino: u64) -> Result<Option<DiskInode>> {
        Ok(self.get_stoinode_by_id(ino)?.map(|inode| {
            let disk = *inode.lock().disk();
            disk
        }))
    }
}
