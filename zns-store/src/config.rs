//! 挂载参数

use crate::IMAP_RESERVED_FRACTION;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// 设备开头为索引节点位置表预留的块数，分配器不会使用这段空间
    pub imap_reserved_blocks: u64,
    /// 毫秒时钟，为新建的索引节点打上创建时间
    pub clock: fn() -> u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap_reserved_blocks: IMAP_RESERVED_FRACTION,
            clock: || 0,
        }
    }
}

impl Config {
    #[inline]
    pub fn imap_reserved(self, blocks: u64) -> Self {
        Self {
            imap_reserved_blocks: blocks,
            ..self
        }
    }

    #[inline]
    pub fn clock(self, clock: fn() -> u64) -> Self {
        Self { clock, ..self }
    }
}
