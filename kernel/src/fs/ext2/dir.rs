//! Directory entries and path walking.
//!
//! A directory's data blocks are tight sequences of variable-length
//! entries whose `rec_len` fields always sum to the block size. Deletion
//! either extends the predecessor's `rec_len` over the victim or, for a
//! block-leading entry, zeroes its inode number; insertion reuses that
//! slack before appending fresh blocks. Blocks are walked as byte slices
//! with a cursor, never materialized as linked structures.

use ::alloc::string::String;
use ::alloc::vec::Vec;

use super::disk::{
    dirent_actual_len, ru32, DirEntryRaw, Inode, DIRENT_HEADER, NAME_MAX, NDIRECT, ROOT_INODE,
};
use super::Ext2Fs;
use crate::error::{KernelError, KernelResult};

/// A directory entry as surfaced to the VFS.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
    pub name: String,
    pub inode: u32,
    pub file_type: u8,
}

impl Ext2Fs {
    /// Insert `(name -> child)` into directory `dir_ino`. The caller has
    /// already checked for duplicates.
    pub fn insert_dirent(
        &mut self,
        dir_ino: u32,
        name: &str,
        child: u32,
        file_type: u8,
    ) -> KernelResult<()> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(KernelError::InvalidPath);
        }
        let mut dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(KernelError::NotDirectory);
        }

        let bs = self.block_size() as usize;
        let needed = dirent_actual_len(name.len());
        let block_count = dir.size as usize / bs;

        for index in 0..block_count {
            let block = self.block_at_index_pub(&dir, index as u32)?;
            if block == 0 {
                continue;
            }
            let mut buf = self.read_block(block)?;
            let mut off = 0usize;
            while off < bs {
                if off + DIRENT_HEADER > bs {
                    return Err(KernelError::IoError);
                }
                let entry = DirEntryRaw::parse(&buf, off);
                let rec_len = usize::from(entry.rec_len);
                if rec_len < DIRENT_HEADER || off + rec_len > bs {
                    return Err(KernelError::IoError);
                }

                if entry.inode == 0 && rec_len >= needed {
                    // reuse a deleted slot wholesale, keeping its rec_len
                    DirEntryRaw::write(
                        &mut buf,
                        off,
                        child,
                        rec_len as u16,
                        file_type,
                        name.as_bytes(),
                    );
                    return self.write_block(block, &buf);
                }

                if entry.inode != 0 {
                    let actual = dirent_actual_len(usize::from(entry.name_len));
                    if rec_len >= actual + needed {
                        // split: shrink the predecessor to its actual
                        // length and drop the new entry into the slack
                        let slack = (rec_len - actual) as u16;
                        super::disk::wu16(&mut buf, off + 4, actual as u16);
                        DirEntryRaw::write(
                            &mut buf,
                            off + actual,
                            child,
                            slack,
                            file_type,
                            name.as_bytes(),
                        );
                        return self.write_block(block, &buf);
                    }
                }
                off += rec_len;
            }
        }

        // No slack anywhere: append a fresh block holding a single entry
        // that spans it entirely.
        let slot = (0..NDIRECT)
            .find(|&i| dir.block[i] == 0)
            .ok_or(KernelError::NoSpace)?;
        let block = self.alloc_block()?;
        let mut buf = ::alloc::vec![0u8; bs];
        DirEntryRaw::write(&mut buf, 0, child, bs as u16, file_type, name.as_bytes());
        self.write_block(block, &buf)?;

        dir.block[slot] = block;
        dir.size += bs as u32;
        dir.blocks += self.block_size() / crate::fs::blockdev::SECTOR_SIZE as u32;
        self.write_inode(dir_ino, &dir)
    }

    /// Remove the entry named `name`; returns the inode it referenced.
    pub fn remove_dirent(&mut self, dir_ino: u32, name: &str) -> KernelResult<u32> {
        let dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(KernelError::NotDirectory);
        }

        let bs = self.block_size() as usize;
        let block_count = dir.size as usize / bs;

        for index in 0..block_count {
            let block = self.block_at_index_pub(&dir, index as u32)?;
            if block == 0 {
                continue;
            }
            let mut buf = self.read_block(block)?;
            let mut off = 0usize;
            let mut prev: Option<usize> = None;
            while off < bs {
                if off + DIRENT_HEADER > bs {
                    return Err(KernelError::IoError);
                }
                let entry = DirEntryRaw::parse(&buf, off);
                let rec_len = usize::from(entry.rec_len);
                if rec_len < DIRENT_HEADER || off + rec_len > bs {
                    return Err(KernelError::IoError);
                }

                if entry.inode != 0 && entry.name(&buf, off) == name.as_bytes() {
                    let victim = entry.inode;
                    match prev {
                        Some(p) => {
                            // absorb the victim into its predecessor; the
                            // rec_len sum over the block is unchanged
                            let prev_entry = DirEntryRaw::parse(&buf, p);
                            super::disk::wu16(
                                &mut buf,
                                p + 4,
                                prev_entry.rec_len + entry.rec_len,
                            );
                        }
                        None => {
                            // block-leading entry: mark deleted in place
                            super::disk::wu32(&mut buf, off, 0);
                        }
                    }
                    self.write_block(block, &buf)?;
                    return Ok(victim);
                }

                prev = Some(off);
                off += rec_len;
            }
        }
        Err(KernelError::NotFound)
    }

    /// Find `name` in directory `dir_ino`.
    pub fn lookup_entry(&self, dir_ino: u32, name: &str) -> KernelResult<u32> {
        let dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(KernelError::NotDirectory);
        }
        self.walk_entries(&dir, |entry_name, entry| {
            if entry_name == name.as_bytes() {
                Some(entry.inode)
            } else {
                None
            }
        })?
        .ok_or(KernelError::NotFound)
    }

    /// True when the directory holds nothing but `.` and `..`.
    pub fn dir_is_empty(&self, dir_ino: u32) -> KernelResult<bool> {
        let dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(KernelError::NotDirectory);
        }
        let found = self.walk_entries(&dir, |name, _| {
            if name != b"." && name != b".." {
                Some(())
            } else {
                None
            }
        })?;
        Ok(found.is_none())
    }

    /// All live entries of a directory.
    pub fn list_dir(&self, dir_ino: u32) -> KernelResult<Vec<RawDirEntry>> {
        let dir = self.read_inode(dir_ino)?;
        if !dir.is_dir() {
            return Err(KernelError::NotDirectory);
        }
        let mut out = Vec::new();
        self.walk_entries(&dir, |name, entry| {
            out.push(RawDirEntry {
                name: String::from_utf8_lossy(name).into_owned(),
                inode: entry.inode,
                file_type: entry.file_type,
            });
            None::<()>
        })?;
        Ok(out)
    }

    /// Walk every live entry, stopping early when `visit` returns `Some`.
    fn walk_entries<T>(
        &self,
        dir: &Inode,
        mut visit: impl FnMut(&[u8], &DirEntryRaw) -> Option<T>,
    ) -> KernelResult<Option<T>> {
        let bs = self.block_size() as usize;
        let block_count = dir.size as usize / bs;

        for index in 0..block_count {
            let block = self.block_at_index_pub(dir, index as u32)?;
            if block == 0 {
                continue;
            }
            let buf = self.read_block(block)?;
            let mut off = 0usize;
            while off < bs {
                if off + DIRENT_HEADER > bs {
                    return Err(KernelError::IoError);
                }
                let entry = DirEntryRaw::parse(&buf, off);
                let rec_len = usize::from(entry.rec_len);
                if rec_len < DIRENT_HEADER || off + rec_len > bs {
                    return Err(KernelError::IoError);
                }
                if entry.inode != 0 {
                    if let Some(value) = visit(entry.name(&buf, off), &entry) {
                        return Ok(Some(value));
                    }
                }
                off += rec_len;
            }
        }
        Ok(None)
    }

    /// Resolve an absolute path to an inode number. Empty components
    /// (leading or doubled slashes) are skipped; symlink following is the
    /// VFS's job.
    pub fn resolve_path(&self, path: &str) -> KernelResult<u32> {
        if path.is_empty() {
            return Err(KernelError::InvalidPath);
        }
        let mut current = ROOT_INODE;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if component.len() > NAME_MAX {
                return Err(KernelError::InvalidPath);
            }
            let inode = self.read_inode(current)?;
            if !inode.is_dir() {
                return Err(KernelError::NotDirectory);
            }
            current = self.lookup_entry(current, component)?;
        }
        Ok(current)
    }

    /// Expose the read-side index mapping to the directory code.
    fn block_at_index_pub(&self, inode: &Inode, index: u32) -> KernelResult<u32> {
        // Directories in this kernel only ever grow through the direct
        // slots, but going through the shared mapping keeps the walker
        // honest about the format.
        if index < NDIRECT as u32 {
            Ok(inode.block[index as usize])
        } else {
            let indirect = inode.block[super::disk::INDIRECT_SLOT];
            if indirect == 0 {
                return Ok(0);
            }
            let buf = self.read_block(indirect)?;
            Ok(ru32(&buf, ((index - NDIRECT as u32) * 4) as usize))
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use ::alloc::format;
    use ::alloc::sync::Arc;

    use spin::Mutex;

    use super::super::{disk, mkfs, Ext2Fs};
    use super::*;
    use crate::fs::blockdev::{RamDisk, SharedBlockDevice};

    fn fresh_fs() -> Ext2Fs {
        let mut disk = RamDisk::new(2048);
        mkfs::format(&mut disk, &mkfs::MkfsOptions::default()).expect("format");
        let shared: SharedBlockDevice = Arc::new(Mutex::new(disk));
        Ext2Fs::mount(shared).expect("mount")
    }

    fn new_file_inode(fs: &mut Ext2Fs) -> u32 {
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");
        ino
    }

    /// Sum of rec_len over a directory block must equal the block size.
    fn assert_rec_len_invariant(fs: &Ext2Fs, dir_ino: u32) {
        let dir = fs.read_inode(dir_ino).expect("dir inode");
        let bs = fs.block_size() as usize;
        for index in 0..(dir.size as usize / bs) {
            let block = dir.block[index];
            if block == 0 {
                continue;
            }
            let buf = fs.read_block(block).expect("dir block");
            let mut off = 0usize;
            let mut sum = 0usize;
            while off < bs {
                assert!(off + DIRENT_HEADER <= bs, "entry header crosses block end");
                let entry = DirEntryRaw::parse(&buf, off);
                sum += usize::from(entry.rec_len);
                off += usize::from(entry.rec_len);
            }
            assert_eq!(sum, bs);
        }
    }

    #[test]
    fn root_lists_dot_and_dotdot() {
        let fs = fresh_fs();
        let entries = fs.list_dir(ROOT_INODE).expect("list");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", ".."]);
        assert!(fs.dir_is_empty(ROOT_INODE).expect("empty check"));
        assert_rec_len_invariant(&fs, ROOT_INODE);
    }

    #[test]
    fn insert_lookup_remove_cycle() {
        let mut fs = fresh_fs();
        let ino = new_file_inode(&mut fs);
        fs.insert_dirent(ROOT_INODE, "a.txt", ino, disk::FT_REG_FILE)
            .expect("insert");
        assert_rec_len_invariant(&fs, ROOT_INODE);

        assert_eq!(fs.lookup_entry(ROOT_INODE, "a.txt").expect("lookup"), ino);
        assert!(!fs.dir_is_empty(ROOT_INODE).expect("empty check"));

        let removed = fs.remove_dirent(ROOT_INODE, "a.txt").expect("remove");
        assert_eq!(removed, ino);
        assert_rec_len_invariant(&fs, ROOT_INODE);
        assert_eq!(
            fs.lookup_entry(ROOT_INODE, "a.txt"),
            Err(KernelError::NotFound)
        );
        assert!(fs.dir_is_empty(ROOT_INODE).expect("empty check"));
    }

    #[test]
    fn removed_slot_is_reused() {
        let mut fs = fresh_fs();
        let a = new_file_inode(&mut fs);
        let b = new_file_inode(&mut fs);
        let c = new_file_inode(&mut fs);
        fs.insert_dirent(ROOT_INODE, "aa", a, disk::FT_REG_FILE)
            .expect("insert");
        fs.insert_dirent(ROOT_INODE, "bb", b, disk::FT_REG_FILE)
            .expect("insert");

        let dir = fs.read_inode(ROOT_INODE).expect("dir");
        let blocks_before = dir.size;

        fs.remove_dirent(ROOT_INODE, "aa").expect("remove");
        fs.insert_dirent(ROOT_INODE, "cc", c, disk::FT_REG_FILE)
            .expect("reinsert into slack");
        assert_rec_len_invariant(&fs, ROOT_INODE);

        let dir = fs.read_inode(ROOT_INODE).expect("dir");
        assert_eq!(dir.size, blocks_before, "reuse must not grow the directory");
        assert_eq!(fs.lookup_entry(ROOT_INODE, "cc").expect("lookup"), c);
    }

    #[test]
    fn many_entries_spill_into_new_blocks() {
        let mut fs = fresh_fs();
        // each entry takes 8 + round4(7) = 16 bytes; a 1024-byte block
        // holds 64 of them, so 100 entries force a second block.
        for i in 0..100 {
            let ino = new_file_inode(&mut fs);
            let name = format!("f{:05}", i);
            fs.insert_dirent(ROOT_INODE, &name, ino, disk::FT_REG_FILE)
                .expect("insert");
        }
        assert_rec_len_invariant(&fs, ROOT_INODE);
        let dir = fs.read_inode(ROOT_INODE).expect("dir");
        assert!(dir.size > fs.block_size());

        for i in (0..100).step_by(7) {
            let name = format!("f{:05}", i);
            assert!(fs.lookup_entry(ROOT_INODE, &name).is_ok());
        }
    }

    #[test]
    fn max_length_name_round_trips() {
        let mut fs = fresh_fs();
        let ino = new_file_inode(&mut fs);
        let name: String = core::iter::repeat('x').take(NAME_MAX).collect();
        fs.insert_dirent(ROOT_INODE, &name, ino, disk::FT_REG_FILE)
            .expect("insert max-length name");
        assert_rec_len_invariant(&fs, ROOT_INODE);
        assert_eq!(fs.lookup_entry(ROOT_INODE, &name).expect("lookup"), ino);

        let too_long: String = core::iter::repeat('x').take(NAME_MAX + 1).collect();
        assert_eq!(
            fs.insert_dirent(ROOT_INODE, &too_long, ino, disk::FT_REG_FILE),
            Err(KernelError::InvalidPath)
        );
    }

    #[test]
    fn names_are_byte_compared() {
        let mut fs = fresh_fs();
        let ino = new_file_inode(&mut fs);
        fs.insert_dirent(ROOT_INODE, "File", ino, disk::FT_REG_FILE)
            .expect("insert");
        assert_eq!(
            fs.lookup_entry(ROOT_INODE, "file"),
            Err(KernelError::NotFound)
        );
        assert!(fs.lookup_entry(ROOT_INODE, "File").is_ok());
    }

    #[test]
    fn path_resolution() {
        let mut fs = fresh_fs();
        let ino = new_file_inode(&mut fs);
        fs.insert_dirent(ROOT_INODE, "a.txt", ino, disk::FT_REG_FILE)
            .expect("insert");

        assert_eq!(fs.resolve_path("/").expect("root"), ROOT_INODE);
        assert_eq!(fs.resolve_path("/a.txt").expect("file"), ino);
        assert_eq!(fs.resolve_path("//a.txt").expect("doubled slash"), ino);
        assert_eq!(fs.resolve_path("/missing"), Err(KernelError::NotFound));
        assert_eq!(
            fs.resolve_path("/a.txt/deeper"),
            Err(KernelError::NotDirectory)
        );
        assert_eq!(fs.resolve_path(""), Err(KernelError::InvalidPath));
    }
}
