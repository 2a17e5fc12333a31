//! # 全局状态
//!
//! 挂载时构造一次的 [`StorageContext`] 持有块分配器、
//! 索引节点位置表（编号 → 最新记录的地址）、索引节点缓存、
//! 目录缓存以及编号计数器，所有组件都通过它的共享引用访问这些状态。
//!
//! 缓存项永不淘汰。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;
use zoned_dev::ZonedDevice;

use crate::layout::{Dnode, OnDisk};
use crate::{BlockManager, Config, Error, ROOT_INO, Result, StoDir, StoInode};

pub struct StorageContext {
    allocator: BlockManager,
    /// 下一个可分配的索引节点号
    next_ino: AtomicU64,
    inode_map: Mutex<BTreeMap<u64, u64>>,
    pub(crate) inode_cache: Mutex<BTreeMap<u64, Arc<Mutex<StoInode>>>>,
    pub(crate) dir_cache: Mutex<BTreeMap<u64, Arc<Mutex<StoDir>>>>,
    clock: fn() -> u64,
}

impl StorageContext {
    pub fn mount(device: Arc<dyn ZonedDevice>, config: Config) -> Result<Arc<Self>> {
        // 目录表必须能放进一个块
        if device.lba_size() < Dnode::SIZE {
            return Err(Error::InvalidConfig("LBA size is smaller than a directory table"));
        }

        let allocator = BlockManager::new(device, &config)?;
        log::info!(
            "mount: {} blocks of {} bytes",
            allocator.capacity() / allocator.lba_size() as u64,
            allocator.lba_size()
        );

        Ok(Arc::new(Self {
            allocator,
            next_ino: AtomicU64::new(ROOT_INO),
            inode_map: Mutex::new(BTreeMap::new()),
            inode_cache: Mutex::new(BTreeMap::new()),
            dir_cache: Mutex::new(BTreeMap::new()),
            clock: config.clock,
        }))
    }

    #[inline]
    pub fn allocator(&self) -> &BlockManager {
        &self.allocator
    }

    #[inline]
    pub fn lba_size(&self) -> usize {
        self.allocator.lba_size()
    }

    /// 索引节点记录的最新地址；从未落盘的编号返回空
    #[inline]
    pub fn inode_location(&self, ino: u64) -> Option<u64> {
        self.inode_map.lock().get(&ino).copied()
    }

    /// 是否还没有创建过任何对象
    #[inline]
    pub fn is_virgin(&self) -> bool {
        self.next_ino.load(Ordering::Acquire) == ROOT_INO
    }

    #[inline]
    pub(crate) fn record_location(&self, ino: u64, lba: u64) {
        self.inode_map.lock().insert(ino, lba);
    }

    #[inline]
    pub(crate) fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn now(&self) -> u64 {
        (self.clock)()
    }

    /// 撤销未能落盘的根目录，下次访问时重新创建
    pub(crate) fn reset_genesis(&self) {
        self.inode_cache.lock().remove(&ROOT_INO);
        self.inode_map.lock().remove(&ROOT_INO);
        let _ = self.next_ino.compare_exchange(
            ROOT_INO + 1,
            ROOT_INO,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 缓存新建的索引节点；同号的已有对象优先
    pub(crate) fn cache_inode(&self, inode: StoInode) -> Arc<Mutex<StoInode>> {
        self.inode_cache
            .lock()
            .entry(inode.ino())
            .or_insert_with(|| Arc::new(Mutex::new(inode)))
            .clone()
    }

    pub(crate) fn cache_dir(&self, dir: StoDir) -> Arc<Mutex<StoDir>> {
        self.dir_cache
            .lock()
            .entry(dir.ino())
            .or_insert_with(|| Arc::new(Mutex::new(dir)))
            .clone()
    }
}
