/// 区段：从`start_lba`开始连续的`nblocks`个块
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Segment {
    /// 起始字节地址
    pub start_lba: u64,
    pub nblocks: u32,
    _reserved: u32,
}

unsafe impl super::OnDisk for Segment {}

impl Segment {
    #[inline]
    pub const fn new(start_lba: u64, nblocks: u32) -> Self {
        Self {
            start_lba,
            nblocks,
            _reserved: 0,
        }
    }

    /// 区段末尾（不含）的字节地址
    #[inline]
    pub fn end(&self, lba_size: usize) -> u64 {
        self.start_lba + self.nblocks as u64 * lba_size as u64
    }

    /// 区段内最后一块的起始地址
    #[inline]
    pub fn last_block(&self, lba_size: usize) -> u64 {
        self.start_lba + self.nblocks.saturating_sub(1) as u64 * lba_size as u64
    }

    /// 区段覆盖的字节数
    #[inline]
    pub fn len(&self, lba_size: usize) -> usize {
        self.nblocks as usize * lba_size
    }
}
