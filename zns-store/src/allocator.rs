//! # 块分配器层
//!
//! 设备只能在写指针处追加，而上层需要按字节随机读写。
//! [`BlockManager`] 维护全局唯一的写指针，负责：
//!
//! - 追加：在写指针处分配空间，必要时对未对齐的块“读-改-写”；
//! - 随机读：读出覆盖请求区间的整块，只拷出需要的字节；
//! - 原地写：按首尾是否对齐分四种情况合并边界块，恰好一次设备写。
//!
//! 日志从不回收。写指针只会前进，唯一的例外是 [`BlockManager::reappend`]
//! 中对日志末尾记录的回退。

use alloc::sync::Arc;
use alloc::vec;

use spin::RwLock;
use zoned_dev::ZonedDevice;

use crate::{Config, Error, Result};

/// 日志的写指针：下一个空闲字节的偏移
#[derive(Debug)]
pub struct WritePointer {
    position: u64,
}

pub struct BlockManager {
    device: Arc<dyn ZonedDevice>,
    lba_size: usize,
    capacity: u64,
    /// 设备开头的预留区域大小（字节）
    imap_size: u64,
    wp: RwLock<WritePointer>,
}

impl BlockManager {
    pub fn new(device: Arc<dyn ZonedDevice>, config: &Config) -> Result<Self> {
        let lba_size = device.lba_size();
        let capacity = device.capacity();

        if lba_size == 0 {
            return Err(Error::InvalidConfig("LBA size is zero"));
        }
        if capacity % lba_size as u64 != 0 {
            return Err(Error::InvalidConfig("capacity is not a multiple of the LBA size"));
        }
        let imap_size = config
            .imap_reserved_blocks
            .checked_mul(lba_size as u64)
            .filter(|&size| size < capacity)
            .ok_or(Error::InvalidConfig("reserved region covers the whole device"))?;

        log::debug!("block manager: lba_size={lba_size} capacity={capacity:#x} reserved={imap_size:#x}");

        Ok(Self {
            device,
            lba_size,
            capacity,
            imap_size,
            // 写指针从预留区域之后开始
            wp: RwLock::new(WritePointer {
                position: imap_size,
            }),
        })
    }

    /// 在写指针处追加`buf`，返回实际使用的起始地址。
    ///
    /// `advance`为真时写指针前进到记录末尾所在块的边界；
    /// 为假时数据照写，但不占用空间。
    pub fn append(&self, buf: &[u8], advance: bool) -> Result<u64> {
        let mut wp = self.wp.write();
        self.append_locked(&mut wp, buf, advance)
    }

    /// 回退后追加，在同一个临界区内完成。
    ///
    /// `reclaim`给出被取代记录的位置与长度：若它正好是日志末尾的记录，
    /// 写指针先回退到它的起点，新数据覆盖其上；否则直接追加到末尾。
    pub fn reappend(&self, reclaim: Option<(u64, usize)>, buf: &[u8]) -> Result<u64> {
        let mut wp = self.wp.write();
        let saved = wp.position;

        if let Some((lba, len)) = reclaim {
            if lba >= self.imap_size && self.round_up(lba + len as u64) == wp.position {
                log::trace!("retract write pointer {:#x} -> {lba:#x}", wp.position);
                wp.position = lba;
            } else {
                log::debug!("record at {lba:#x} is not the log tail, appending instead");
            }
        }

        match self.append_locked(&mut wp, buf, true) {
            Ok(lba) => Ok(lba),
            Err(err) => {
                wp.position = saved;
                Err(err)
            }
        }
    }

    /// 从`addr`读出`buf.len()`字节，不影响写指针
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let base = self.round_down(addr);
        let head = (addr - base) as usize;

        // 首尾都对齐时直接读入
        if head == 0 && buf.len() % self.lba_size == 0 {
            return Ok(self.device.read(addr, buf)?);
        }

        let end = addr + buf.len() as u64;
        let mut blocks = vec![0; (self.round_up(end) - base) as usize];
        self.device.read(base, &mut blocks)?;
        buf.copy_from_slice(&blocks[head..head + buf.len()]);

        Ok(())
    }

    /// 原地覆盖已分配的区间。
    ///
    /// 边界块中不属于请求区间的字节保持不变。
    pub fn write(&self, addr: u64, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let lba_size = self.lba_size;
        let base = self.round_down(addr);
        // 首块内请求前面的字节数
        let head = (addr - base) as usize;
        let end = addr + buf.len() as u64;
        let tail_base = self.round_down(end);
        // 末块内属于请求的字节数，为0表示结束于块边界
        let tail = (end - tail_base) as usize;

        match (head == 0, tail == 0) {
            // 首尾对齐
            (true, true) => self.device.write(addr, buf)?,
            // 首对齐，尾部跨入下一块
            (true, false) => {
                let mut blocks = vec![0; (tail_base - base) as usize + lba_size];
                let len = blocks.len();
                self.device.read(tail_base, &mut blocks[len - lba_size..])?;
                blocks[..buf.len()].copy_from_slice(buf);
                self.device.write(base, &blocks)?;
            }
            // 首未对齐，尾部结束于块边界
            (false, true) => {
                let mut blocks = vec![0; (end - base) as usize];
                self.device.read(base, &mut blocks[..lba_size])?;
                blocks[head..].copy_from_slice(buf);
                self.device.write(base, &blocks)?;
            }
            // 首尾都未对齐，两个边界块可能是同一块
            (false, false) => {
                let mut blocks = vec![0; (tail_base - base) as usize + lba_size];
                let len = blocks.len();
                self.device.read(base, &mut blocks[..lba_size])?;
                if tail_base != base {
                    self.device.read(tail_base, &mut blocks[len - lba_size..])?;
                }
                blocks[head..head + buf.len()].copy_from_slice(buf);
                self.device.write(base, &blocks)?;
            }
        }

        Ok(())
    }

    #[inline]
    pub fn current_position(&self) -> u64 {
        self.wp.read().position
    }

    /// 直接设置写指针。
    ///
    /// 写指针可以等于容量，表示设备已写满，之后的追加都会失败；
    /// 追加恰好写到设备末尾时写指针也停在这里。超过容量的地址被拒绝。
    pub fn update_current_position(&self, addr: u64) -> Result<()> {
        if addr > self.capacity {
            return Err(Error::OutOfSpace {
                offset: addr,
                len: 0,
                capacity: self.capacity,
            });
        }
        self.wp.write().position = addr;
        Ok(())
    }

    #[inline]
    pub fn lba_size(&self) -> usize {
        self.lba_size
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 预留区域的大小，也是日志的起点
    #[inline]
    pub fn reserved_region(&self) -> u64 {
        self.imap_size
    }

    /// 容纳`len`字节需要多少块
    #[inline]
    pub fn blocks_for(&self, len: usize) -> u32 {
        len.div_ceil(self.lba_size) as u32
    }
}

impl BlockManager {
    fn append_locked(&self, wp: &mut WritePointer, buf: &[u8], advance: bool) -> Result<u64> {
        let offset = wp.position;
        if buf.is_empty() {
            return Ok(offset);
        }

        let end = offset + buf.len() as u64;
        if end > self.capacity {
            return Err(Error::OutOfSpace {
                offset,
                len: buf.len(),
                capacity: self.capacity,
            });
        }

        let base = self.round_down(offset);
        let head = (offset - base) as usize;
        let padded_end = self.round_up(end);
        let mut blocks = vec![0; (padded_end - base) as usize];

        if head != 0 {
            // 写指针落在块中间，先读出该块以保留前面的数据
            self.device.read(base, &mut blocks[..self.lba_size])?;
        }
        blocks[head..head + buf.len()].copy_from_slice(buf);
        self.device.write(base, &blocks)?;

        if advance {
            wp.position = padded_end;
        }
        log::trace!("append {} bytes at {offset:#x}, wp={:#x}", buf.len(), wp.position);

        Ok(offset)
    }

    #[inline]
    fn round_down(&self, addr: u64) -> u64 {
        addr - addr % self.lba_size as u64
    }

    #[inline]
    fn round_up(&self, addr: u64) -> u64 {
        addr.next_multiple_of(self.lba_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use zoned_dev::{IoStats, MemZone};

    use super::*;

    fn manager(lba_size: usize, nblocks: usize) -> (Arc<MemZone>, BlockManager) {
        let zone = Arc::new(MemZone::new(lba_size, nblocks));
        let manager = BlockManager::new(zone.clone(), &Config::default()).unwrap();
        (zone, manager)
    }

    #[test]
    fn rejects_bad_geometry() {
        let zone = Arc::new(MemZone::new(512, 4));
        assert!(matches!(
            BlockManager::new(zone, &Config::default().imap_reserved(4)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn reserved_region_is_skipped() {
        let zone = Arc::new(MemZone::new(512, 8));
        let manager = BlockManager::new(zone, &Config::default().imap_reserved(2)).unwrap();
        assert_eq!(1024, manager.reserved_region());
        assert_eq!(1024, manager.append(&[1; 10], true).unwrap());
    }

    #[test]
    fn unaligned_append_keeps_block_prefix() {
        let (zone, manager) = manager(512, 8);
        manager.append(&[7; 512], true).unwrap();
        manager.update_current_position(100).unwrap();

        assert_eq!(100, manager.append(&[9; 600], true).unwrap());
        // 读出原块 + 一次写回
        assert_eq!(IoStats { reads: 1, writes: 2 }, zone.stats());
        assert_eq!(1024, manager.current_position());

        let mut buf = [0; 700];
        manager.read(0, &mut buf).unwrap();
        assert!(buf[..100].iter().all(|&b| b == 7));
        assert!(buf[100..].iter().all(|&b| b == 9));
    }

    #[test]
    fn append_without_advance() {
        let (_zone, manager) = manager(512, 4);
        assert_eq!(0, manager.append(&[3; 20], false).unwrap());
        assert_eq!(0, manager.current_position());
    }

    #[test]
    fn out_of_space() {
        let (zone, manager) = manager(512, 2);
        manager.append(&[0; 600], true).unwrap();
        assert_eq!(
            Err(Error::OutOfSpace {
                offset: 1024,
                len: 1,
                capacity: 1024
            }),
            manager.append(&[0; 1], true)
        );
        assert_eq!(1, zone.stats().writes);
    }

    #[test]
    fn write_pointer_may_rest_at_device_end() {
        let (_zone, manager) = manager(512, 2);
        manager.append(&[1; 1024], true).unwrap();
        assert_eq!(manager.capacity(), manager.current_position());

        manager.update_current_position(512).unwrap();
        manager.update_current_position(1024).unwrap();
        assert!(matches!(manager.append(&[0; 1], true), Err(Error::OutOfSpace { .. })));
        assert_eq!(
            Err(Error::OutOfSpace {
                offset: 1025,
                len: 0,
                capacity: 1024
            }),
            manager.update_current_position(1025)
        );
        assert_eq!(1024, manager.current_position());
    }

    #[test]
    fn reappend_retracts_only_the_tail() {
        let (_zone, manager) = manager(512, 16);
        let first = manager.append(&[1; 300], true).unwrap();
        let rewritten = manager.reappend(Some((first, 300)), &[2; 300]).unwrap();
        assert_eq!(first, rewritten);
        assert_eq!(512, manager.current_position());

        let other = manager.append(&[3; 10], true).unwrap();
        // 末尾已经不是它了
        let moved = manager.reappend(Some((first, 300)), &[4; 300]).unwrap();
        assert_eq!(other + 512, moved);

        let mut buf = [0; 10];
        manager.read(other, &mut buf).unwrap();
        assert_eq!([3; 10], buf);
    }

    #[test]
    fn device_errors_propagate() {
        let (zone, manager) = manager(512, 4);
        zone.set_faulty(true);
        assert_eq!(
            Err(Error::Device(zoned_dev::DeviceError::Io(-5))),
            manager.append(&[0; 8], true)
        );
        assert_eq!(0, manager.current_position());
    }
}
