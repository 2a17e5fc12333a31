//! # 文件层
//!
//! 文件内容按区段顺序拼接而成，区段表与文件字节一一对应：
//! 除最后一块外每块都是满的。
//!
//! 追加写时若最后一块没写满，就把这块的有效字节读回，与新数据一起
//! 重新追加到日志末尾，旧块从区段表中摘除。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::storage;
use crate::{Error, Result, Stat, StoInode, StorageContext};

pub struct StoFile {
    inode: Arc<Mutex<StoInode>>,
    ctx: Arc<StorageContext>,
}

impl StoFile {
    #[inline]
    pub fn new(ctx: Arc<StorageContext>, inode: Arc<Mutex<StoInode>>) -> Self {
        Self { inode, ctx }
    }

    /// 按编号打开文件，编号不存在时返回空
    pub fn open(ctx: &Arc<StorageContext>, ino: u64) -> Result<Option<Self>> {
        let Some(inode) = ctx.get_stoinode_by_id(ino)? else {
            return Ok(None);
        };
        if inode.lock().is_dir() {
            return Err(Error::IsADirectory(ino));
        }

        Ok(Some(Self::new(ctx.clone(), inode)))
    }

    #[inline]
    pub fn ino(&self) -> u64 {
        self.inode.lock().ino()
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.inode.lock().size()
    }

    #[inline]
    pub fn name(&self) -> String {
        self.inode.lock().name().to_string()
    }

    #[inline]
    pub fn stat(&self) -> Stat {
        self.inode.lock().stat()
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Mutex<StoInode>> {
        &self.inode
    }

    /// 把`data`追加到文件末尾。
    ///
    /// 出错时文件保持写之前的样子。
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let allocator = self.ctx.allocator();
        let lba_size = allocator.lba_size();
        let mut inode = self.inode.lock();
        if inode.is_dir() {
            return Err(Error::IsADirectory(inode.ino()));
        }

        // 所有改动先落在副本上，成功后才提交
        let mut staged = inode.clone();
        let tail_len = (staged.size() % lba_size as u64) as usize;
        let mut blob = Vec::with_capacity(tail_len + data.len());

        if tail_len != 0 {
            match staged.pop_tail_block(lba_size) {
                Some(block) => {
                    let mut tail = vec![0; tail_len];
                    storage::get_from_disk(allocator, block, &mut tail)?;
                    blob.extend_from_slice(&tail);
                }
                None => log::warn!("inode {} has {} bytes but no extents", staged.ino(), staged.size()),
            }
        }
        blob.extend_from_slice(data);

        // 落盘前检查，避免写了数据却记不下区段
        if staged.is_extents_full() {
            return Err(Error::ExtentTableFull(staged.ino()));
        }

        let overwrite = if staged.is_inserted() {
            staged.location()
        } else {
            None
        };
        let lba = storage::store_segment_on_disk(allocator, &blob, overwrite)?;
        let persisted = staged
            .add_segment(lba, allocator.blocks_for(blob.len()), lba_size)
            .and_then(|()| {
                staged.set_size(staged.size() + data.len() as u64);
                // 旧记录可能已被数据覆盖
                staged.forget_location();
                staged.write_to_disk(&self.ctx)
            });

        if let Err(err) = persisted {
            // 数据落在了旧记录上，旧记录必须写回，否则位置表指向的是数据
            if overwrite == Some(lba) {
                if let Err(restore) = inode.restore_record(&self.ctx, (lba, blob.len())) {
                    log::error!("inode {}: cannot restore record: {restore}", inode.ino());
                }
            }
            return Err(err);
        }

        log::debug!(
            "inode {}: {} bytes at {lba:#x}, {} extents",
            staged.ino(),
            blob.len(),
            staged.extents().len()
        );
        *inode = staged;

        Ok(())
    }

    /// 从头读，返回读到的字节数
    #[inline]
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_at(0, buf)
    }

    /// 从`offset`处读，不会越过文件末尾
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.inode.lock();
        let size = inode.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }

        let end = size.min(offset + buf.len() as u64);
        let allocator = self.ctx.allocator();
        let lba_size = allocator.lba_size();

        // 当前区段在文件中的起始偏移
        let mut pos = 0;
        for segment in inode.extents() {
            let segment_end = pos + segment.len(lba_size) as u64;
            let start = offset.max(pos);
            let stop = end.min(segment_end);

            if start < stop {
                let dst = &mut buf[(start - offset) as usize..(stop - offset) as usize];
                storage::get_from_disk(allocator, segment.start_lba + (start - pos), dst)?;
            }

            pos = segment_end;
            if pos >= end {
                break;
            }
        }

        Ok((end - offset) as usize)
    }

    /// 返回是否真的写了
    #[inline]
    pub fn write_to_disk(&self) -> Result<bool> {
        self.inode.lock().write_to_disk(&self.ctx)
    }
}
