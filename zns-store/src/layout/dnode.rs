use super::{NameBuf, OnDisk, decode_name, encode_name};
use crate::DIRSIZE;

/// 目录项：名字与索引节点号
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DirRecord {
    // 最后一字节留给 \0
    name: NameBuf,
    inode_number: u64,
}

unsafe impl OnDisk for DirRecord {}

impl DirRecord {
    #[inline]
    pub fn new(name: &str, inode_number: u64) -> Self {
        Self {
            name: encode_name(name),
            inode_number,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        decode_name(&self.name)
    }

    #[inline]
    pub fn inode_number(&self) -> u64 {
        self.inode_number
    }
}

/// 目录表，恰好占据目录索引节点的唯一区段
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Dnode {
    pub inode_number: u64,
    pub parent: u64,
    count: u32,
    _reserved: u32,
    name: NameBuf,
    records: [DirRecord; DIRSIZE],
}

unsafe impl OnDisk for Dnode {}

impl Dnode {
    #[inline]
    pub fn new(inode_number: u64, parent: u64, name: &str) -> Self {
        Self {
            inode_number,
            parent,
            name: encode_name(name),
            ..Default::default()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        decode_name(&self.name)
    }

    #[inline]
    pub fn records(&self) -> &[DirRecord] {
        &self.records[..(self.count as usize).min(DIRSIZE)]
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.records().len() == DIRSIZE
    }

    #[inline]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.records().iter().position(|record| record.name() == name)
    }

    /// 目录表已满时返回`false`，表不变
    pub fn try_push(&mut self, record: DirRecord) -> bool {
        let len = self.records().len();
        if len == DIRSIZE {
            return false;
        }

        self.records[len] = record;
        self.count = len as u32 + 1;
        true
    }

    /// 删除第`index`项，其后的项依次前移；越界时返回空，表不变
    pub fn remove(&mut self, index: usize) -> Option<DirRecord> {
        let len = self.records().len();
        let record = *self.records().get(index)?;
        self.records.copy_within(index + 1..len, index);
        self.records[len - 1] = DirRecord::default();
        self.count = len as u32 - 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_out_of_range_is_rejected() {
        let mut dnode = Dnode::new(5, 2, "d");
        assert_eq!(None, dnode.remove(0));

        dnode.try_push(DirRecord::new("a", 7));
        dnode.try_push(DirRecord::new("b", 8));
        assert_eq!(None, dnode.remove(2));
        assert_eq!(2, dnode.records().len());

        assert_eq!(Some(DirRecord::new("a", 7)), dnode.remove(0));
        assert_eq!(&[DirRecord::new("b", 8)], dnode.records());
        assert_eq!(Some(8), dnode.remove(0).map(|record| record.inode_number()));
        assert!(dnode.records().is_empty());
    }
}
