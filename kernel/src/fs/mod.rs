//! Virtual filesystem layer.
//!
//! A thin facade over the mounted ext2 volume: path resolution with
//! bounded symlink following, an open-file table, and the operation set
//! the shell consumes. Paths are absolute here; the shell owns the
//! working directory and joins it before calling in.

pub mod blockdev;
pub mod ext2;
pub mod file;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use blockdev::RamDisk;
use ext2::disk::{self, Inode};
use ext2::Ext2Fs;
use file::{apply_seek, FileTable};

pub use ext2::mode_string;
pub use file::{FileHandle, SeekFrom, MAX_OPEN_FILES};

/// Symlink hops tolerated before resolution reports a loop.
pub const MAX_SYMLINK_DEPTH: usize = 8;

/// What a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

impl FileKind {
    fn from_mode(mode: u16) -> Self {
        match mode & disk::S_IFMT {
            disk::S_IFDIR => FileKind::Dir,
            disk::S_IFLNK => FileKind::Symlink,
            _ => FileKind::File,
        }
    }

    fn from_dirent_type(file_type: u8) -> Self {
        match file_type {
            disk::FT_DIR => FileKind::Dir,
            disk::FT_SYMLINK => FileKind::Symlink,
            _ => FileKind::File,
        }
    }
}

/// Metadata snapshot of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: u32,
    pub kind: FileKind,
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub links: u16,
    pub blocks: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl Stat {
    fn from_inode(ino: u32, inode: &Inode) -> Self {
        Self {
            ino,
            kind: FileKind::from_mode(inode.mode),
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            links: inode.links_count,
            blocks: inode.blocks,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub ino: u32,
    pub kind: FileKind,
}

/// Split an absolute path into its parent directory and final component.
fn split_parent(path: &str) -> KernelResult<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(KernelError::InvalidPath);
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        // the root itself has no parent to operate in
        return Err(KernelError::InvalidPath);
    }
    let idx = trimmed.rfind('/').ok_or(KernelError::InvalidPath)?;
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return Err(KernelError::InvalidPath);
    }
    Ok((parent, name))
}

/// Directory part of an absolute path ("/a/b" -> "/a", "/a" -> "/").
fn dirname(path: &str) -> &str {
    match split_parent(path) {
        Ok((parent, _)) => parent,
        Err(_) => "/",
    }
}

/// The VFS over one mounted volume.
pub struct Vfs {
    fs: Ext2Fs,
    files: FileTable,
}

impl Vfs {
    pub fn new(fs: Ext2Fs) -> Self {
        Self {
            fs,
            files: FileTable::new(),
        }
    }

    // -- resolution -------------------------------------------------------

    /// Resolve a path, following terminal symlinks up to
    /// [`MAX_SYMLINK_DEPTH`] hops. Relative targets resolve against the
    /// symlink's directory; cycles surface as `SymlinkLoop`.
    fn resolve_follow(&self, path: &str) -> KernelResult<u32> {
        let mut current = String::from(path);
        let mut hops = 0usize;
        loop {
            let ino = self.fs.resolve_path(&current)?;
            let inode = self.fs.read_inode(ino)?;
            if !inode.is_symlink() {
                return Ok(ino);
            }
            hops += 1;
            if hops > MAX_SYMLINK_DEPTH {
                return Err(KernelError::SymlinkLoop);
            }
            let target = self.fs.read_symlink(&inode)?;
            current = if target.starts_with('/') {
                target
            } else {
                let mut joined = String::from(dirname(&current));
                if !joined.ends_with('/') {
                    joined.push('/');
                }
                joined.push_str(&target);
                joined
            };
        }
    }

    // -- handles ----------------------------------------------------------

    /// Open a file for reading and writing. Directories are refused.
    pub fn open(&mut self, path: &str) -> KernelResult<FileHandle> {
        let ino = self.resolve_follow(path)?;
        let inode = self.fs.read_inode(ino)?;
        if inode.is_dir() {
            return Err(KernelError::IsDirectory);
        }
        self.files.open(ino, inode.size)
    }

    pub fn close(&mut self, handle: FileHandle) -> KernelResult<()> {
        self.files.close(handle)
    }

    /// Read at the cursor, advancing it. Updates the inode's atime.
    pub fn read(&mut self, handle: FileHandle, out: &mut [u8]) -> KernelResult<usize> {
        let (ino, pos) = {
            let open = self.files.get_mut(handle)?;
            (open.ino, open.pos)
        };
        let inode = self.fs.read_inode(ino)?;
        let n = self.fs.read_file(&inode, pos, out)?;
        if n > 0 {
            let mut inode = inode;
            inode.atime = crate::timer::uptime_secs() as u32;
            self.fs.write_inode(ino, &inode)?;
            self.files.get_mut(handle)?.pos = pos + n as u32;
        }
        Ok(n)
    }

    /// Write at the cursor, advancing it; grows the file as needed. The
    /// returned count is short when the write hits the single-indirect
    /// limit or a full volume.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> KernelResult<usize> {
        let (ino, pos) = {
            let open = self.files.get_mut(handle)?;
            (open.ino, open.pos)
        };
        let mut inode = self.fs.read_inode(ino)?;
        let n = self.fs.write_file(ino, &mut inode, pos, data)?;
        let open = self.files.get_mut(handle)?;
        open.pos = pos + n as u32;
        open.size = inode.size;
        Ok(n)
    }

    /// Move the cursor; the result is clamped to `[0, size]`.
    pub fn seek(&mut self, handle: FileHandle, from: SeekFrom) -> KernelResult<u32> {
        let open = self.files.get_mut(handle)?;
        open.pos = apply_seek(open.pos, open.size, from);
        Ok(open.pos)
    }

    /// Shrink the file behind `handle` to `new_size`; cursors of every
    /// handle on the inode are clamped.
    pub fn truncate(&mut self, handle: FileHandle, new_size: u32) -> KernelResult<()> {
        let ino = self.files.get_mut(handle)?.ino;
        let mut inode = self.fs.read_inode(ino)?;
        self.fs.truncate(ino, &mut inode, new_size)?;
        self.files.clamp_handles(ino, inode.size);
        Ok(())
    }

    // -- namespace --------------------------------------------------------

    /// Create a file (`REG|0644`) or directory (`DIR|0755`).
    pub fn create(&mut self, path: &str, kind: FileKind) -> KernelResult<()> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve_follow(parent_path)?;
        if self.fs.lookup_entry(parent, name).is_ok() {
            return Err(KernelError::Exists);
        }

        let now = crate::timer::uptime_secs() as u32;
        let mut inode = Inode::empty();
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;

        match kind {
            FileKind::File => {
                inode.mode = disk::S_IFREG | 0o644;
                inode.links_count = 1;
                let ino = self.fs.alloc_inode()?;
                self.fs.write_inode(ino, &inode)?;
                self.fs
                    .insert_dirent(parent, name, ino, disk::FT_REG_FILE)?;
            }
            FileKind::Dir => {
                inode.mode = disk::S_IFDIR | 0o755;
                let ino = self.fs.alloc_inode()?;
                self.fs.write_inode(ino, &inode)?;
                // "." and ".." land in the directory's first block; the
                // insert path allocates it and maintains `size`.
                self.fs.insert_dirent(ino, ".", ino, disk::FT_DIR)?;
                self.fs.insert_dirent(ino, "..", parent, disk::FT_DIR)?;
                let mut inode = self.fs.read_inode(ino)?;
                inode.links_count = 2;
                self.fs.write_inode(ino, &inode)?;

                self.fs.insert_dirent(parent, name, ino, disk::FT_DIR)?;
                let mut parent_inode = self.fs.read_inode(parent)?;
                parent_inode.links_count += 1;
                self.fs.write_inode(parent, &parent_inode)?;
            }
            FileKind::Symlink => return Err(KernelError::InvalidArgument),
        }
        Ok(())
    }

    /// Remove a name. Directories must be empty; the last link frees the
    /// inode and all of its data blocks, indirect ones included. For a
    /// fast symlink the block array holds the target string rather than
    /// pointers, so only the inode is released.
    pub fn unlink(&mut self, path: &str) -> KernelResult<()> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve_follow(parent_path)?;
        let target = self.fs.lookup_entry(parent, name)?;
        let mut inode = self.fs.read_inode(target)?;

        if inode.is_dir() {
            if !self.fs.dir_is_empty(target)? {
                return Err(KernelError::NotEmpty);
            }
            self.fs.remove_dirent(parent, name)?;
            let mut parent_inode = self.fs.read_inode(parent)?;
            parent_inode.links_count = parent_inode.links_count.saturating_sub(1);
            self.fs.write_inode(parent, &parent_inode)?;
            self.release_inode(target, &mut inode)?;
        } else {
            self.fs.remove_dirent(parent, name)?;
            inode.links_count = inode.links_count.saturating_sub(1);
            if inode.links_count == 0 {
                self.release_inode(target, &mut inode)?;
            } else {
                self.fs.write_inode(target, &inode)?;
            }
        }
        Ok(())
    }

    fn release_inode(&mut self, ino: u32, inode: &mut Inode) -> KernelResult<()> {
        self.fs.free_file_blocks(inode)?;
        inode.links_count = 0;
        inode.size = 0;
        inode.dtime = crate::timer::uptime_secs() as u32;
        self.fs.write_inode(ino, inode)?;
        self.fs.free_inode(ino)
    }

    /// Create a symlink at `path` pointing at `target`.
    pub fn create_symlink(&mut self, path: &str, target: &str) -> KernelResult<()> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve_follow(parent_path)?;
        if self.fs.lookup_entry(parent, name).is_ok() {
            return Err(KernelError::Exists);
        }
        let ino = self.fs.create_symlink_inode(target)?;
        self.fs.insert_dirent(parent, name, ino, disk::FT_SYMLINK)
    }

    /// Replace the permission bits, preserving the file-type nibble.
    pub fn chmod(&mut self, path: &str, mode: u16) -> KernelResult<()> {
        let ino = self.resolve_follow(path)?;
        let mut inode = self.fs.read_inode(ino)?;
        inode.mode = (inode.mode & disk::S_IFMT) | (mode & 0o777);
        inode.ctime = crate::timer::uptime_secs() as u32;
        self.fs.write_inode(ino, &inode)
    }

    /// Change ownership.
    pub fn chown(&mut self, path: &str, uid: u16, gid: u16) -> KernelResult<()> {
        let ino = self.resolve_follow(path)?;
        let mut inode = self.fs.read_inode(ino)?;
        inode.uid = uid;
        inode.gid = gid;
        inode.ctime = crate::timer::uptime_secs() as u32;
        self.fs.write_inode(ino, &inode)
    }

    /// Metadata of the inode a path resolves to (symlinks followed).
    pub fn stat(&self, path: &str) -> KernelResult<Stat> {
        let ino = self.resolve_follow(path)?;
        let inode = self.fs.read_inode(ino)?;
        Ok(Stat::from_inode(ino, &inode))
    }

    /// Metadata without following a terminal symlink.
    pub fn lstat(&self, path: &str) -> KernelResult<Stat> {
        let ino = self.fs.resolve_path(path)?;
        let inode = self.fs.read_inode(ino)?;
        Ok(Stat::from_inode(ino, &inode))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve_follow(path).is_ok()
    }

    /// Entries of the directory a path resolves to.
    pub fn list_directory(&self, path: &str) -> KernelResult<Vec<DirEntryInfo>> {
        let ino = self.resolve_follow(path)?;
        let inode = self.fs.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(KernelError::NotDirectory);
        }
        Ok(self
            .fs
            .list_dir(ino)?
            .into_iter()
            .map(|e| DirEntryInfo {
                kind: FileKind::from_dirent_type(e.file_type),
                name: e.name,
                ino: e.inode,
            })
            .collect())
    }

    /// Free-space counters for `meminfo`/`df`-style display.
    pub fn volume_stats(&self) -> (u32, u32) {
        (self.fs.sb.free_blocks_count, self.fs.sb.free_inodes_count)
    }
}

lazy_static! {
    static ref ROOT_VFS: Mutex<Option<Vfs>> = Mutex::new(None);
}

/// Install the root filesystem.
pub fn mount_root(fs: Ext2Fs) {
    *ROOT_VFS.lock() = Some(Vfs::new(fs));
}

/// Run `f` against the root filesystem.
pub fn with_root<R>(f: impl FnOnce(&mut Vfs) -> KernelResult<R>) -> KernelResult<R> {
    let mut guard = ROOT_VFS.lock();
    match guard.as_mut() {
        Some(vfs) => f(vfs),
        None => Err(KernelError::NotInitialized { subsystem: "vfs" }),
    }
}

/// Ramdisk geometry for the boot filesystem: 2 MiB, 2048 blocks.
const ROOT_RAMDISK_SECTORS: u64 = 4096;

/// Boot path: create `ramdisk0`, format it, mount it as the root.
pub fn init_root_ramdisk() -> KernelResult<()> {
    let disk: blockdev::SharedBlockDevice = Arc::new(Mutex::new(RamDisk::new(ROOT_RAMDISK_SECTORS)));
    blockdev::register("ramdisk0", disk.clone());

    let opts = ext2::mkfs::MkfsOptions {
        total_blocks: (ROOT_RAMDISK_SECTORS / 2) as u32,
        inode_count: 256,
    };
    ext2::mkfs::format(&mut *disk.lock(), &opts)?;

    let fs = Ext2Fs::mount(disk)?;
    mount_root(fs);
    log::info!("vfs: ramdisk0 formatted and mounted as root");
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn parent_splitting() {
        assert_eq!(split_parent("/a").expect("split"), ("/", "a"));
        assert_eq!(split_parent("/a/b").expect("split"), ("/a", "b"));
        assert_eq!(split_parent("/a/b/").expect("split"), ("/a", "b"));
        assert!(split_parent("/").is_err());
        assert!(split_parent("relative").is_err());
    }

    #[test]
    fn dirname_of_paths() {
        assert_eq!(dirname("/a/b"), "/a");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
    }
}
