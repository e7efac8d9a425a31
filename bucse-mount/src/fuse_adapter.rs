//! Adapts `fuser::Filesystem` kernel callbacks onto `bucse_core::ops`
//! calls, bridging sync FUSE-thread dispatch to the core's async API via
//! `block_on` (mirrors the teacher's `RemoteFS`/`FsWrapper` dispatcher in
//! `client/src/fs/mod.rs`) and maintaining the inode<->path table FUSE
//! needs but bucse-core (which addresses nodes by path or `NodeId`) does
//! not.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bucse_core::concurrency::Handle;
use bucse_core::ops::NodeKind;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use tokio::runtime::Handle as TokioHandle;

const ROOT_INODE: u64 = 1;

pub struct FuseAdapter {
    handle: Handle,
    rt: TokioHandle,
    attr_ttl: Duration,
    entry_ttl: Duration,
    created_at: SystemTime,
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
    next_inode: u64,
}

impl FuseAdapter {
    pub fn new(handle: Handle, rt: TokioHandle, attr_ttl: Duration, entry_ttl: Duration, created_at: i64) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();
        inode_to_path.insert(ROOT_INODE, String::new());
        path_to_inode.insert(String::new(), ROOT_INODE);

        FuseAdapter {
            handle,
            rt,
            attr_ttl,
            entry_ttl,
            created_at: UNIX_EPOCH + Duration::from_secs(created_at.max(0) as u64),
            inode_to_path,
            path_to_inode,
            next_inode: 2,
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inode_to_path.get(&ino).cloned()
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str()?;
        Some(if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}/{name}")
        })
    }

    fn inode_for(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inode_to_path.insert(ino, path.to_string());
        self.path_to_inode.insert(path.to_string(), ino);
        ino
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
        }
    }

    fn rename_path(&mut self, from: &str, to: &str) {
        if let Some(ino) = self.path_to_inode.remove(from) {
            self.path_to_inode.insert(to.to_string(), ino);
            self.inode_to_path.insert(ino, to.to_string());
        }
    }

    fn to_file_attr(&self, ino: u64, attr: bucse_core::ops::Attr) -> FileAttr {
        let mtime = self.created_at + Duration::from_secs(attr.mtime.max(0) as u64);
        let atime = self.created_at + Duration::from_secs(attr.atime.max(0) as u64);
        let kind = match attr.kind {
            NodeKind::Dir => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        };
        FileAttr {
            ino,
            size: attr.size.max(0) as u64,
            blocks: (attr.size.max(0) as u64).div_ceil(512),
            atime,
            mtime,
            ctime: mtime,
            crtime: self.created_at,
            kind,
            perm: if kind == FileType::Directory { 0o755 } else { 0o644 },
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            flags: 0,
            blksize: 4096,
        }
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let attr = self.rt.block_on(self.handle.0.lock().ops.getattr(&path));
        match attr {
            Ok(attr) => {
                let ino = self.inode_for(&path);
                reply.entry(&self.entry_ttl, &self.to_file_attr(ino, attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let attr = self.rt.block_on(self.handle.0.lock().ops.getattr(&path));
        match attr {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.to_file_attr(ino, attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = self.handle.0.lock().ops.readdir(&path);
        let entries = match entries {
            Ok(e) => e,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let mut rows = vec![(ino, FileType::Directory, ".".to_string())];
        rows.push((ROOT_INODE, FileType::Directory, "..".to_string()));
        for (name, kind) in entries {
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}/{name}")
            };
            let child_ino = self.inode_for(&child_path);
            let file_type = match kind {
                NodeKind::Dir => FileType::Directory,
                NodeKind::File => FileType::RegularFile,
            };
            rows.push((child_ino, file_type, name));
        }

        for (i, (ino, kind, name)) in rows.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.handle.0.lock().ops.open(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.rt.block_on(self.handle.0.lock().ops.create(&path));
        match result {
            Ok(fh) => {
                let attr = self.rt.block_on(self.handle.0.lock().ops.getattr(&path)).unwrap();
                let ino = self.inode_for(&path);
                reply.created(&self.entry_ttl, &self.to_file_attr(ino, attr), 0, fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = self
            .rt
            .block_on(self.handle.0.lock().ops.read(fh, offset, size as usize));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.handle.0.lock().ops.write(fh, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let result = self.rt.block_on(self.handle.0.lock().ops.release(fh));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.handle.0.lock().ops.flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.rt.block_on(self.handle.0.lock().ops.mkdir(&path));
        match result {
            Ok(()) => {
                let attr = self.rt.block_on(self.handle.0.lock().ops.getattr(&path)).unwrap();
                let ino = self.inode_for(&path);
                reply.entry(&self.entry_ttl, &self.to_file_attr(ino, attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.rt.block_on(self.handle.0.lock().ops.rmdir(&path));
        match result {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.rt.block_on(self.handle.0.lock().ops.unlink(&path));
        match result {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (self.child_path(parent, name), self.child_path(newparent, newname)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let result = self.rt.block_on(self.handle.0.lock().ops.rename(&from, &to));
        match result {
            Ok(()) => {
                self.rename_path(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(size) = size {
            let result = self
                .rt
                .block_on(self.handle.0.lock().ops.truncate(&path, size as i64));
            if let Err(e) = result {
                reply.error(e.to_errno());
                return;
            }
        }
        match self.rt.block_on(self.handle.0.lock().ops.getattr(&path)) {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.to_file_attr(ino, attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
