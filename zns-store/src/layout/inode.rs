use super::{NameBuf, OnDisk, Segment, decode_name, encode_name};
use crate::MAX_SEGMENTS;

/// 索引节点的磁盘记录
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    pub id: u64,
    /// 逻辑字节数
    pub size: u64,
    /// 创建时间（毫秒）
    pub time: u64,
    pub mode: u32,
    pub owner: u32,
    /// 见 [`InodeFlag`](crate::InodeFlag)
    pub flags: u32,
    nsegments: u32,
    name: NameBuf,
    name_len: u16,
    deleted: u8,
    /// 是否曾经落盘
    inserted: u8,
    _reserved: u32,
    segments: [Segment; MAX_SEGMENTS],
}

unsafe impl OnDisk for DiskInode {}

impl DiskInode {
    #[inline]
    pub fn init(&mut self, id: u64, name: &str, flags: u32, time: u64) {
        *self = Self {
            id,
            time,
            flags,
            name: encode_name(name),
            name_len: name.len().min(u16::MAX as usize) as u16,
            ..Default::default()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        decode_name(&self.name)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted != 0
    }

    #[inline]
    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted as u8;
    }

    #[inline]
    pub fn is_inserted(&self) -> bool {
        self.inserted != 0
    }

    #[inline]
    pub fn set_inserted(&mut self, inserted: bool) {
        self.inserted = inserted as u8;
    }

    /// 按逻辑顺序排列的区段
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments[..(self.nsegments as usize).min(MAX_SEGMENTS)]
    }

    #[inline]
    pub fn is_segments_full(&self) -> bool {
        self.segments().len() == MAX_SEGMENTS
    }

    #[inline]
    pub fn last_segment_mut(&mut self) -> Option<&mut Segment> {
        let len = self.segments().len();
        self.segments[..len].last_mut()
    }

    /// 区段表已满时返回`false`，表不变
    pub fn try_push_segment(&mut self, segment: Segment) -> bool {
        let len = self.segments().len();
        if len == MAX_SEGMENTS {
            return false;
        }

        self.segments[len] = segment;
        self.nsegments = len as u32 + 1;
        true
    }

    pub fn pop_segment(&mut self) -> Option<Segment> {
        let len = self.segments().len();
        if len == 0 {
            return None;
        }

        self.nsegments = len as u32 - 1;
        Some(core::mem::take(&mut self.segments[len - 1]))
    }
}
