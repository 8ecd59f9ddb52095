//! FUSE filesystem implementation for KeePass databases.
//!
//! This module implements the fuser `Filesystem` trait on top of a
//! [`Projection`]. Every request is answered from the in-memory store; no
//! callback blocks or performs I/O.
//!
//! ## Operation Summary
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | init/destroy | |
//! | lookup | Increments nlookup via `get_or_insert` |
//! | forget/batch_forget | Decrements nlookup, evicts at 0 |
//! | getattr | |
//! | open/release | Fields only, keeps the kernel page cache |
//! | read | |
//! | opendir/readdir/releasedir | readdir does not touch nlookup |
//! | access | Read and execute only |
//! | statfs | Synthetic counts |
//! | mutations | `EROFS` |
//! | xattrs | `ENOTSUP` |

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::inode::InodeTable;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use kpfs_core::{CredentialStore, Node, NodeAttributes, NodeKind, Projection, ProjectionError};
use libc::c_int;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 4096;

/// Maximum filename length reported by statfs.
const NAME_MAX: u32 = 255;

/// FUSE filesystem for a decrypted KeePass database.
pub struct KeePassFS {
    /// Read-only view of the credential store.
    projection: Projection,
    /// Inode table for node/inode mapping.
    inodes: InodeTable,
    /// Time-to-live for attributes and entries handed to the kernel.
    attr_ttl: Duration,
    /// User ID to use for file ownership.
    uid: u32,
    /// Group ID to use for file ownership.
    gid: u32,
}

impl KeePassFS {
    /// Creates a filesystem over `store` with the default configuration.
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self::with_config(store, &MountConfig::default())
    }

    /// Creates a filesystem over `store` owned by the mounting user.
    pub fn with_config(store: Arc<CredentialStore>, config: &MountConfig) -> Self {
        // SAFETY: getuid/getgid cannot fail and have no preconditions.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self::with_ownership(store, config, uid, gid)
    }

    /// Creates a filesystem reporting the given owner for every node.
    pub fn with_ownership(
        store: Arc<CredentialStore>,
        config: &MountConfig,
        uid: u32,
        gid: u32,
    ) -> Self {
        info!(
            groups = store.group_count(),
            entries = store.entry_count(),
            uid,
            gid,
            attr_ttl_secs = config.attr_ttl.as_secs(),
            "KeePassFS initialized"
        );
        Self {
            projection: Projection::new(store),
            inodes: InodeTable::new(),
            attr_ttl: config.attr_ttl,
            uid,
            gid,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn node(&self, ino: u64) -> FuseResult<Node> {
        self.inodes.node(ino).ok_or(FuseError::InvalidInode(ino))
    }

    /// Builds the kernel attribute record for a node.
    ///
    /// Missing access/modification times are reported as the epoch. Both
    /// ctime and crtime carry the projection's creation time.
    pub fn make_attr(&self, ino: u64, node: &Node) -> FileAttr {
        let NodeAttributes {
            size,
            access_time,
            modify_time,
            create_time,
        } = self.projection.attributes(node);
        let kind = node.kind();
        let (file_type, nlink) = match kind {
            NodeKind::Directory => (FileType::Directory, 2),
            NodeKind::Leaf => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: access_time.unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: modify_time.unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: create_time,
            crtime: create_time,
            kind: file_type,
            perm: kind.permissions(),
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Resolves `name` under `parent` and registers the child inode.
    pub fn lookup_child(&self, parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        let parent_node = self.node(parent)?;
        // Stored names are UTF-8, so anything else cannot match
        let name = name.to_str().ok_or_else(|| ProjectionError::NotFound {
            name: name.to_string_lossy().into_owned(),
        })?;
        let child = self.projection.resolve(&parent_node, name)?;
        let ino = self.inodes.get_or_insert(child.node, parent);
        Ok(self.make_attr(ino, &child.node))
    }

    /// Produces the `(inode, type, name)` triples of a directory, including
    /// `.` and `..`.
    pub fn list_directory(&self, ino: u64) -> FuseResult<Vec<(u64, FileType, String)>> {
        let (node, parent) = {
            let entry = self.inodes.get(ino).ok_or(FuseError::InvalidInode(ino))?;
            (entry.node, entry.parent)
        };
        if !node.is_directory() {
            return Err(FuseError::NotADirectory(ino));
        }

        let children = self.projection.list(&node);
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent, FileType::Directory, "..".to_string()));
        for child in children {
            let child_ino = self.inodes.get_or_insert_no_lookup_inc(child.node, ino);
            let file_type = if child.is_directory() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_ino, file_type, child.name));
        }
        Ok(entries)
    }

    /// Checks an open request and returns the FUSE open flags to reply with.
    pub fn open_flags(&self, ino: u64, flags: i32) -> FuseResult<u32> {
        let node = self.node(ino)?;
        if node.is_directory() {
            return Err(FuseError::IsADirectory(ino));
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            return Err(FuseError::ReadOnly);
        }
        match self.projection.open(&node)? {
            kpfs_core::OpenDisposition::KeepCache => Ok(fuser::consts::FOPEN_KEEP_CACHE),
        }
    }

    /// Reads a byte range of a field.
    pub fn read_range(&self, ino: u64, offset: i64, size: u32) -> FuseResult<&[u8]> {
        let node = self.node(ino)?;
        if node.is_directory() {
            return Err(FuseError::IsADirectory(ino));
        }
        Ok(self.projection.read(&node, offset, size as usize)?)
    }
}

impl Filesystem for KeePassFS {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE filesystem initialized");
        // Enable async reads for concurrent readers
        config.add_capabilities(fuser::consts::FUSE_ASYNC_READ).ok();
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent = parent, name = ?name, "lookup");
        match self.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
            Err(e) => {
                trace!(parent, name = ?name, error = %e, "lookup failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup = nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.node(ino) {
            Ok(node) => reply.attr(&self.attr_ttl, &self.make_attr(ino, &node)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags = flags, "open");
        // No per-open state: every read is served straight from the store.
        match self.open_flags(ino, flags) {
            Ok(open_flags) => reply.opened(0, open_flags),
            Err(e) => {
                debug!(inode = ino, error = %e, "open rejected");
                reply.error(e.to_errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh = fh, offset = offset, size = size, "read");
        match self.read_range(ino, offset, size) {
            Ok(data) => reply.data(data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        match self.node(ino) {
            Ok(node) if node.is_directory() => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Read directory entries.
    ///
    /// The offset handed back with each entry is its index + 1, so a resumed
    /// listing skips exactly the entries already returned. Listings are
    /// stable because the store never changes.
    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset = offset, "readdir");
        let entries = match self.list_directory(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, (child_ino, file_type, name)) in entries.iter().enumerate().skip(skip) {
            let next_offset = i64::try_from(index + 1).unwrap_or(i64::MAX);
            // add returns true if the buffer is full
            if reply.add(*child_ino, next_offset, *file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask = mask, "access");
        if self.inodes.get(ino).is_none() {
            reply.error(libc::ENOENT);
        } else if mask & libc::W_OK != 0 {
            reply.error(libc::EROFS);
        } else {
            reply.ok();
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let store = self.projection.store();
        let files = (store.group_count() + store.entry_count()) as u64;
        reply.statfs(0, 0, 0, files, 0, BLOCK_SIZE, NAME_MAX, BLOCK_SIZE);
    }

    // ==================== Write Operations ====================
    //
    // The filesystem is read-only; every mutation answers EROFS.

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(inode = ino, "setattr rejected on read-only filesystem");
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(FuseError::ReadOnly.to_errno());
    }

    // ==================== Extended Attributes ====================

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: fuser::ReplyXattr,
    ) {
        reply.error(FuseError::NotSupported.to_errno());
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: fuser::ReplyXattr) {
        reply.error(FuseError::NotSupported.to_errno());
    }
}
