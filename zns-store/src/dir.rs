//! # 目录层
//!
//! 目录就是只有一个区段的索引节点，区段里存放定长的目录表 [`Dnode`]。
//! 目录表第一次落盘时追加到日志，之后都原地覆盖。
//!
//! 路径解析不替调用者做创建决定：[`find_inode`] 只报告缺了什么，
//! [`resolve`] 再按调用者给出的策略决定是否创建。

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use enumflags2::BitFlags;
use spin::Mutex;

use crate::layout::{DirRecord, Dnode, OnDisk, check_name};
use crate::storage;
use crate::{Error, InodeFlag, ROOT_INO, Result, StoInode, StorageContext};

#[derive(Debug)]
pub struct StoDir {
    dnode: Dnode,
    inode: Arc<Mutex<StoInode>>,
    /// 目录表是否有未落盘的改动
    dirty: bool,
}

impl StoDir {
    /// 新建目录，`parent`为空时父目录就是自己
    pub(crate) fn new(ctx: &StorageContext, name: &str, parent: Option<u64>) -> Self {
        let inode = ctx.cache_inode(StoInode::new(ctx, name, InodeFlag::Directory.into()));
        let ino = inode.lock().ino();

        Self {
            dnode: Dnode::new(ino, parent.unwrap_or(ino), name),
            inode,
            dirty: true,
        }
    }

    pub(crate) fn hydrate(dnode: Dnode, inode: Arc<Mutex<StoInode>>) -> Self {
        Self {
            dnode,
            inode,
            dirty: false,
        }
    }

    #[inline]
    pub fn ino(&self) -> u64 {
        self.dnode.inode_number
    }

    #[inline]
    pub fn parent(&self) -> u64 {
        self.dnode.parent
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.dnode.name()
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Mutex<StoInode>> {
        &self.inode
    }

    #[inline]
    pub fn entries(&self) -> &[DirRecord] {
        self.dnode.records()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// 目录表已满或重名时报错，表不变
    pub fn add_entry(&mut self, inode_number: u64, name: &str) -> Result<()> {
        self.check_insertable(name)?;
        if !self.dnode.try_push(DirRecord::new(name, inode_number)) {
            return Err(Error::DirectoryFull(self.ino()));
        }
        self.dirty = true;

        Ok(())
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<DirRecord> {
        let index = self.dnode.position(name)?;
        let record = self.dnode.remove(index)?;
        self.dirty = true;
        Some(record)
    }

    #[inline]
    pub fn find_entry(&self, name: &str) -> Option<&DirRecord> {
        self.dnode.position(name).map(|index| &self.entries()[index])
    }

    /// 目录表的落盘形式
    #[inline]
    pub fn create_dnode(&self) -> Dnode {
        self.dnode
    }

    pub fn write_to_disk(&mut self, ctx: &StorageContext) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let allocator = ctx.allocator();
        let dnode = self.create_dnode();
        let mut inode = self.inode.lock();

        match inode.extents().first().copied() {
            // 原地更新
            Some(segment) => allocator.write(segment.start_lba, dnode.as_bytes())?,
            // 首次落盘
            None => {
                let lba = storage::store_segment_on_disk(allocator, dnode.as_bytes(), None)?;
                inode.add_segment(lba, allocator.blocks_for(Dnode::SIZE), allocator.lba_size())?;
                inode.set_size(Dnode::SIZE as u64);
                log::debug!("dnode of directory {} stored at {lba:#x}", self.ino());
            }
        }
        inode.write_to_disk(ctx)?;
        self.dirty = false;

        Ok(())
    }

    /// 在当前目录下创建空文件
    pub fn create_file(&mut self, ctx: &StorageContext, name: &str) -> Result<Arc<Mutex<StoInode>>> {
        self.check_insertable(name)?;

        let mut inode = StoInode::new(ctx, name, BitFlags::empty());
        inode.write_to_disk(ctx)?;
        let ino = inode.ino();
        let inode = ctx.cache_inode(inode);

        self.add_entry(ino, name)?;
        self.write_to_disk(ctx)?;

        Ok(inode)
    }

    /// 在当前目录下创建子目录
    pub fn mkdir(&mut self, ctx: &StorageContext, name: &str) -> Result<Arc<Mutex<StoDir>>> {
        self.check_insertable(name)?;

        let mut dir = StoDir::new(ctx, name, Some(self.ino()));
        dir.write_to_disk(ctx)?;
        let ino = dir.ino();
        let dir = ctx.cache_dir(dir);

        self.add_entry(ino, name)?;
        self.write_to_disk(ctx)?;

        Ok(dir)
    }

    /// 删除目录项，并给对应的索引节点打上删除标记。
    ///
    /// 非空目录不能删除。
    pub fn unlink(&mut self, ctx: &StorageContext, name: &str) -> Result<DirRecord> {
        let record = *self
            .find_entry(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        let ino = record.inode_number();

        if let Some(inode) = ctx.get_stoinode_by_id(ino)? {
            if inode.lock().is_dir() {
                let empty = ctx
                    .get_directory_by_id(ino)?
                    .is_none_or(|dir| dir.lock().is_empty());
                if !empty {
                    return Err(Error::DirectoryNotEmpty(ino));
                }
            }

            let mut inode = inode.lock();
            inode.mark_deleted();
            inode.write_to_disk(ctx)?;
        }

        self.remove_entry(name);
        self.write_to_disk(ctx)?;

        Ok(record)
    }
}

impl StoDir {
    fn check_insertable(&self, name: &str) -> Result<()> {
        check_name(name)?;
        if self.dnode.position(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if self.dnode.is_full() {
            return Err(Error::DirectoryFull(self.ino()));
        }
        Ok(())
    }
}

impl StorageContext {
    /// 先查目录缓存，未命中时读回目录表。
    ///
    /// 设备上还没有任何对象时，首次访问根目录会就地创建它。
    pub fn get_directory_by_id(&self, ino: u64) -> Result<Option<Arc<Mutex<StoDir>>>> {
        {
            let mut cache = self.dir_cache.lock();
            if let Some(dir) = cache.get(&ino) {
                return Ok(Some(dir.clone()));
            }

            if ino == ROOT_INO && self.is_virgin() {
                log::info!("empty device, creating root directory");
                let mut root = StoDir::new(self, "/", None);
                if let Err(err) = root.write_to_disk(self) {
                    log::warn!("cannot create root directory: {err}");
                    self.reset_genesis();
                    return Err(err);
                }
                let root = Arc::new(Mutex::new(root));
                cache.insert(ino, root.clone());
                return Ok(Some(root));
            }
        }

        let Some(inode) = self.get_stoinode_by_id(ino)? else {
            return Ok(None);
        };
        let segment = {
            let inode = inode.lock();
            if !inode.is_dir() {
                return Err(Error::NotADirectory(ino));
            }
            // 目录只有一个区段
            inode
                .extents()
                .first()
                .copied()
                .ok_or(Error::DnodeNotFound(ino))?
        };

        let mut dnode = Dnode::default();
        storage::get_from_disk(self.allocator(), segment.start_lba, dnode.as_bytes_mut())?;
        if dnode.inode_number != ino {
            log::error!("dnode at {:#x} belongs to {}, not {ino}", segment.start_lba, dnode.inode_number);
            return Err(Error::Inconsistent {
                ino,
                found: dnode.inode_number,
            });
        }

        Ok(Some(self.cache_dir(StoDir::hydrate(dnode, inode))))
    }

    pub fn get_dnode_by_id(&self, ino: u64) -> Result<Option<Dnode>> {
        Ok(self.get_directory_by_id(ino)?.map(|dir| {
            let dnode = dir.lock().create_dnode();
            dnode
        }))
    }

    #[inline]
    pub fn root(&self) -> Result<Arc<Mutex<StoDir>>> {
        self.get_directory_by_id(ROOT_INO)?
            .ok_or_else(|| Error::DirectoryNotFound("/".to_string()))
    }
}

/// 路径解析的结果
#[derive(Debug)]
pub enum Lookup {
    Found {
        parent: Arc<Mutex<StoDir>>,
        record: DirRecord,
        inode: Arc<Mutex<StoInode>>,
    },
    /// 中间某一级目录不存在
    MissingDirectory {
        parent: Arc<Mutex<StoDir>>,
        name: String,
    },
    /// 末端的对象不存在
    MissingFile {
        parent: Arc<Mutex<StoDir>>,
        name: String,
    },
}

/// 从`start`出发解析以`/`分隔的相对路径
pub fn find_inode(ctx: &StorageContext, start: &Arc<Mutex<StoDir>>, path: &str) -> Result<Lookup> {
    let mut components = path.split('/').filter(|cmp| !cmp.is_empty()).peekable();
    let mut dir = start.clone();

    while let Some(name) = components.next() {
        let record = dir.lock().find_entry(name).copied();
        let is_last = components.peek().is_none();

        let Some(record) = record else {
            let name = name.to_string();
            return Ok(if is_last {
                Lookup::MissingFile { parent: dir, name }
            } else {
                Lookup::MissingDirectory { parent: dir, name }
            });
        };

        let ino = record.inode_number();
        if is_last {
            let inode = ctx
                .get_stoinode_by_id(ino)?
                .ok_or(Error::InodeNotFound(ino))?;
            return Ok(Lookup::Found {
                parent: dir,
                record,
                inode,
            });
        }

        dir = ctx
            .get_directory_by_id(ino)?
            .ok_or_else(|| Error::DirectoryNotFound(name.to_string()))?;
    }

    Err(Error::InvalidName)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    Fail,
    Create,
}

#[derive(Debug)]
pub enum Resolved {
    Found(Arc<Mutex<StoInode>>),
    Created(Arc<Mutex<StoInode>>),
}

impl Resolved {
    #[inline]
    pub fn inode(&self) -> &Arc<Mutex<StoInode>> {
        match self {
            Self::Found(inode) | Self::Created(inode) => inode,
        }
    }

    #[inline]
    pub fn into_inode(self) -> Arc<Mutex<StoInode>> {
        match self {
            Self::Found(inode) | Self::Created(inode) => inode,
        }
    }
}

/// 解析路径，缺失的中间目录与末端文件按各自的策略处理
pub fn resolve(
    ctx: &StorageContext,
    start: &Arc<Mutex<StoDir>>,
    path: &str,
    dirs: OnMissing,
    file: OnMissing,
) -> Result<Resolved> {
    loop {
        match find_inode(ctx, start, path)? {
            Lookup::Found { inode, .. } => return Ok(Resolved::Found(inode)),
            Lookup::MissingFile { parent, name } => {
                if file == OnMissing::Fail {
                    return Err(Error::EntryNotFound(name));
                }
                match parent.lock().create_file(ctx, &name) {
                    Ok(inode) => return Ok(Resolved::Created(inode)),
                    // 别人抢先创建了，重新解析
                    Err(Error::AlreadyExists(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            Lookup::MissingDirectory { parent, name } => {
                if dirs == OnMissing::Fail {
                    return Err(Error::DirectoryNotFound(name));
                }
                match parent.lock().mkdir(ctx, &name) {
                    Ok(_) | Err(Error::AlreadyExists(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::vec::Vec;

    use zoned_dev::MemZone;

    use super::*;
    use crate::{Config, DIRSIZE};

    fn context() -> Arc<StorageContext> {
        StorageContext::mount(Arc::new(MemZone::new(512, 256)), Config::default()).unwrap()
    }

    #[test]
    fn root_is_created_once() {
        let ctx = context();
        let root = ctx.root().unwrap();
        {
            let root = root.lock();
            assert_eq!(ROOT_INO, root.ino());
            assert_eq!(ROOT_INO, root.parent());
            assert_eq!("/", root.name());
            assert!(root.is_empty());
        }
        assert!(Arc::ptr_eq(&root, &ctx.root().unwrap()));
        assert!(ctx.get_inode_by_id(ROOT_INO).unwrap().unwrap().is_inserted());
    }

    #[test]
    fn root_creation_can_be_retried() {
        let zone = Arc::new(MemZone::new(512, 64));
        let ctx = StorageContext::mount(zone.clone(), Config::default()).unwrap();

        zone.set_faulty(true);
        assert_eq!(
            Err(Error::Device(zoned_dev::DeviceError::Io(-5))),
            ctx.root().map(|_| ())
        );
        assert!(ctx.is_virgin());
        assert!(ctx.inode_location(ROOT_INO).is_none());

        zone.set_faulty(false);
        let root = ctx.root().unwrap();
        assert_eq!(ROOT_INO, root.lock().ino());
        assert_eq!("/", root.lock().name());
        assert!(ctx.inode_location(ROOT_INO).is_some());

        let file = root.lock().create_file(&ctx, "f").unwrap();
        assert_eq!(ROOT_INO + 1, file.lock().ino());
    }

    #[test]
    fn full_directory_is_left_unchanged() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let mut root = root.lock();
        for i in 0..DIRSIZE {
            root.add_entry(100 + i as u64, &format!("f{i}")).unwrap();
        }

        let before = root.entries().to_vec();
        assert_eq!(Err(Error::DirectoryFull(ROOT_INO)), root.add_entry(1, "extra"));
        assert_eq!(before, root.entries());
    }

    #[test]
    fn rejects_bad_names() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let mut root = root.lock();
        root.add_entry(10, "a").unwrap();

        assert_eq!(Err(Error::AlreadyExists("a".into())), root.add_entry(11, "a"));
        assert_eq!(Err(Error::InvalidName), root.add_entry(11, "a/b"));
        assert_eq!(Err(Error::InvalidName), root.add_entry(11, ""));
        assert_eq!(Err(Error::NameTooLong(30)), root.add_entry(11, &"x".repeat(30)));
        assert_eq!(1, root.entries().len());
    }

    #[test]
    fn remove_keeps_order() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let mut root = root.lock();
        for (ino, name) in [(10, "a"), (11, "b"), (12, "c")] {
            root.add_entry(ino, name).unwrap();
        }

        assert_eq!(Some(11), root.remove_entry("b").map(|r| r.inode_number()));
        assert_eq!(None, root.remove_entry("b"));
        let names: Vec<&str> = root.entries().iter().map(DirRecord::name).collect();
        assert_eq!(["a", "c"], names.as_slice());
        assert_eq!(Some(12), root.find_entry("c").map(DirRecord::inode_number));
    }

    #[test]
    fn directories_survive_cache_loss() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let sub = root.lock().mkdir(&ctx, "sub").unwrap();
        let sub_ino = sub.lock().ino();
        sub.lock().create_file(&ctx, "f").unwrap();

        ctx.dir_cache.lock().clear();
        ctx.inode_cache.lock().clear();

        let dnode = ctx.get_dnode_by_id(ROOT_INO).unwrap().unwrap();
        assert_eq!(Some(0), dnode.position("sub"));

        let sub = ctx.get_directory_by_id(sub_ino).unwrap().unwrap();
        let sub = sub.lock();
        assert_eq!(ROOT_INO, sub.parent());
        assert_eq!("sub", sub.name());
        assert!(sub.find_entry("f").is_some());
    }

    #[test]
    fn file_is_not_a_directory() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let file = root.lock().create_file(&ctx, "f").unwrap();
        let ino = file.lock().ino();

        assert_eq!(Err(Error::NotADirectory(ino)), ctx.get_directory_by_id(ino).map(|_| ()));
        assert!(ctx.get_directory_by_id(999).unwrap().is_none());
    }

    #[test]
    fn find_inode_outcomes() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let sub = root.lock().mkdir(&ctx, "a").unwrap();
        let file = sub.lock().create_file(&ctx, "f").unwrap();
        let file_ino = file.lock().ino();

        match find_inode(&ctx, &root, "/a//f/").unwrap() {
            Lookup::Found { parent, record, inode } => {
                assert!(Arc::ptr_eq(&sub, &parent));
                assert_eq!("f", record.name());
                assert!(Arc::ptr_eq(&file, &inode));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            find_inode(&ctx, &root, "a/g").unwrap(),
            Lookup::MissingFile { name, .. } if name == "g"
        ));
        assert!(matches!(
            find_inode(&ctx, &root, "b/f").unwrap(),
            Lookup::MissingDirectory { name, .. } if name == "b"
        ));
        assert!(matches!(
            find_inode(&ctx, &root, "a/f/x"),
            Err(Error::NotADirectory(ino)) if ino == file_ino
        ));
        assert!(matches!(find_inode(&ctx, &root, "//"), Err(Error::InvalidName)));
    }

    #[test]
    fn resolve_follows_policy() {
        let ctx = context();
        let root = ctx.root().unwrap();

        assert!(matches!(
            resolve(&ctx, &root, "x/y", OnMissing::Fail, OnMissing::Create),
            Err(Error::DirectoryNotFound(name)) if name == "x"
        ));
        assert!(matches!(
            resolve(&ctx, &root, "y", OnMissing::Create, OnMissing::Fail),
            Err(Error::EntryNotFound(name)) if name == "y"
        ));

        let created = resolve(&ctx, &root, "x/y/z", OnMissing::Create, OnMissing::Create).unwrap();
        assert!(matches!(created, Resolved::Created(_)));
        let found = resolve(&ctx, &root, "x/y/z", OnMissing::Fail, OnMissing::Fail).unwrap();
        assert!(matches!(found, Resolved::Found(_)));
        assert!(Arc::ptr_eq(created.inode(), found.inode()));
        assert!(!found.inode().lock().is_dir());
    }

    #[test]
    fn unlink_marks_inode_deleted() {
        let ctx = context();
        let root = ctx.root().unwrap();
        let sub = root.lock().mkdir(&ctx, "a").unwrap();
        let file = sub.lock().create_file(&ctx, "f").unwrap();
        let sub_ino = sub.lock().ino();

        assert_eq!(
            Err(Error::DirectoryNotEmpty(sub_ino)),
            root.lock().unlink(&ctx, "a").map(|_| ())
        );

        let record = sub.lock().unlink(&ctx, "f").unwrap();
        assert_eq!("f", record.name());
        assert!(file.lock().is_deleted());
        assert!(!file.lock().is_dirty());
        assert!(matches!(
            find_inode(&ctx, &root, "a/f").unwrap(),
            Lookup::MissingFile { .. }
        ));

        root.lock().unlink(&ctx, "a").unwrap();
        assert!(root.lock().is_empty());
        assert_eq!(
            Err(Error::EntryNotFound("a".into())),
            root.lock().unlink(&ctx, "a").map(|_| ())
        );
    }
}
