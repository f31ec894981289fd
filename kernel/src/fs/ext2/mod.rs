//! Writable ext2 driver.
//!
//! Revision-0 ext2 over a [`BlockDevice`](crate::fs::blockdev::BlockDevice):
//! superblock and group-descriptor parsing, bitmap allocators, inode table
//! I/O, direct plus single-indirect file data, directory entries with slot
//! reuse, and fast/slow symlinks. Double and triple indirection are out of
//! scope; offsets beyond the single-indirect range error with `TooLarge`.
//!
//! Superblock and group-descriptor counters are written through on every
//! bitmap mutation, so the on-device metadata never lags the in-memory
//! state.

pub mod alloc;
pub mod dir;
pub mod disk;
pub mod mkfs;

use ::alloc::string::String;
use ::alloc::vec;
use ::alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::{SharedBlockDevice, SECTOR_SIZE};

pub use disk::{Inode, Superblock, FAST_SYMLINK_MAX, NDIRECT, ROOT_INODE};

use disk::{
    GroupDesc, GROUP_DESC_SIZE, INDIRECT_SLOT, INODE_SIZE, SUPERBLOCK_OFFSET, S_IFLNK,
};

/// A mounted ext2 volume.
pub struct Ext2Fs {
    dev: SharedBlockDevice,
    pub(super) sb: Superblock,
    pub(super) groups: Vec<GroupDesc>,
    block_size: u32,
}

impl Ext2Fs {
    /// Mount the volume: validate the superblock, cache geometry, load all
    /// group descriptors.
    pub fn mount(dev: SharedBlockDevice) -> KernelResult<Self> {
        let mut sb_area = vec![0u8; 1024];
        dev.lock()
            .read_sectors((SUPERBLOCK_OFFSET / SECTOR_SIZE) as u64, &mut sb_area)?;
        let sb = Superblock::parse(&sb_area)?;
        let block_size = sb.block_size();

        let mut fs = Self {
            dev,
            sb,
            groups: Vec::new(),
            block_size,
        };

        let group_count = fs.sb.group_count();
        let desc_bytes = group_count as usize * GROUP_DESC_SIZE;
        let desc_start = fs.sb.first_data_block + 1;
        let desc_blocks = (desc_bytes as u32).div_ceil(block_size);

        let mut raw = Vec::with_capacity((desc_blocks * block_size) as usize);
        for i in 0..desc_blocks {
            raw.extend_from_slice(&fs.read_block(desc_start + i)?);
        }
        for g in 0..group_count as usize {
            fs.groups
                .push(GroupDesc::parse(&raw[g * GROUP_DESC_SIZE..]));
        }

        log::info!(
            "ext2: mounted, {} blocks of {} bytes, {} groups, {} free blocks",
            fs.sb.blocks_count,
            block_size,
            group_count,
            fs.sb.free_blocks_count,
        );
        Ok(fs)
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn group_count(&self) -> u32 {
        self.groups.len() as u32
    }

    fn sectors_per_block(&self) -> u32 {
        self.block_size / SECTOR_SIZE as u32
    }

    /// Read one filesystem block.
    pub fn read_block(&self, block: u32) -> KernelResult<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size as usize];
        let first = u64::from(block) * u64::from(self.sectors_per_block());
        self.dev.lock().read_sectors(first, &mut buf)?;
        Ok(buf)
    }

    /// Write one filesystem block.
    pub fn write_block(&self, block: u32, data: &[u8]) -> KernelResult<()> {
        debug_assert_eq!(data.len(), self.block_size as usize);
        let first = u64::from(block) * u64::from(self.sectors_per_block());
        self.dev.lock().write_sectors(first, data)
    }

    fn zero_block(&self, block: u32) -> KernelResult<()> {
        let zeros = vec![0u8; self.block_size as usize];
        self.write_block(block, &zeros)
    }

    /// Raw sector read, for areas not aligned to filesystem blocks (the
    /// superblock).
    pub(crate) fn dev_read(&self, first_sector: u64, buf: &mut [u8]) -> KernelResult<()> {
        self.dev.lock().read_sectors(first_sector, buf)
    }

    /// Raw sector write, for areas not aligned to filesystem blocks.
    pub(crate) fn dev_write(&self, first_sector: u64, data: &[u8]) -> KernelResult<()> {
        self.dev.lock().write_sectors(first_sector, data)
    }

    // -- inode table ------------------------------------------------------

    /// Locate inode `n` as (block, byte offset inside the block).
    fn inode_slot(&self, n: u32) -> KernelResult<(u32, usize)> {
        if n == 0 || n > self.sb.inodes_count {
            return Err(KernelError::InvalidArgument);
        }
        let index = n - 1;
        let group = (index / self.sb.inodes_per_group) as usize;
        let slot = index % self.sb.inodes_per_group;
        let inodes_per_block = self.block_size / INODE_SIZE as u32;
        let block = self.groups[group].inode_table + slot / inodes_per_block;
        let offset = (slot % inodes_per_block) as usize * INODE_SIZE;
        Ok((block, offset))
    }

    pub fn read_inode(&self, n: u32) -> KernelResult<Inode> {
        let (block, offset) = self.inode_slot(n)?;
        let buf = self.read_block(block)?;
        Ok(Inode::parse(&buf[offset..offset + INODE_SIZE]))
    }

    pub fn write_inode(&self, n: u32, inode: &Inode) -> KernelResult<()> {
        let (block, offset) = self.inode_slot(n)?;
        let mut buf = self.read_block(block)?;
        inode.encode(&mut buf[offset..offset + INODE_SIZE]);
        self.write_block(block, &buf)
    }

    // -- file data --------------------------------------------------------

    /// Pointers a single indirect block holds.
    fn ptrs_per_block(&self) -> u32 {
        self.block_size / 4
    }

    /// Highest addressable file block index plus one.
    fn max_file_blocks(&self) -> u32 {
        NDIRECT as u32 + self.ptrs_per_block()
    }

    /// Map a file block index to a disk block; 0 means a hole.
    fn block_at_index(&self, inode: &Inode, index: u32) -> KernelResult<u32> {
        if index < NDIRECT as u32 {
            return Ok(inode.block[index as usize]);
        }
        if index < self.max_file_blocks() {
            let indirect = inode.block[INDIRECT_SLOT];
            if indirect == 0 {
                return Ok(0);
            }
            let buf = self.read_block(indirect)?;
            return Ok(disk::ru32(&buf, ((index - NDIRECT as u32) * 4) as usize));
        }
        Err(KernelError::TooLarge)
    }

    /// Map a file block index to a disk block, allocating (and zeroing)
    /// whatever is missing along the way.
    fn ensure_block_at_index(&mut self, inode: &mut Inode, index: u32) -> KernelResult<u32> {
        let spb = self.sectors_per_block();
        if index < NDIRECT as u32 {
            let slot = index as usize;
            if inode.block[slot] == 0 {
                let block = self.alloc_block()?;
                self.zero_block(block)?;
                inode.block[slot] = block;
                inode.blocks += spb;
            }
            return Ok(inode.block[slot]);
        }
        if index >= self.max_file_blocks() {
            return Err(KernelError::TooLarge);
        }

        if inode.block[INDIRECT_SLOT] == 0 {
            let block = self.alloc_block()?;
            self.zero_block(block)?;
            inode.block[INDIRECT_SLOT] = block;
            inode.blocks += spb;
        }
        let indirect = inode.block[INDIRECT_SLOT];
        let mut table = self.read_block(indirect)?;
        let slot = ((index - NDIRECT as u32) * 4) as usize;
        let mut block = disk::ru32(&table, slot);
        if block == 0 {
            block = self.alloc_block()?;
            self.zero_block(block)?;
            disk::wu32(&mut table, slot, block);
            self.write_block(indirect, &table)?;
            inode.blocks += spb;
        }
        Ok(block)
    }

    /// Read file data. Short reads happen at end of file; holes read as
    /// zeros.
    pub fn read_file(&self, inode: &Inode, offset: u32, out: &mut [u8]) -> KernelResult<usize> {
        if offset >= inode.size {
            return Ok(0);
        }
        let total = (out.len() as u32).min(inode.size - offset) as usize;
        let bs = self.block_size;

        let mut done = 0usize;
        while done < total {
            let pos = offset + done as u32;
            let index = pos / bs;
            let in_off = (pos % bs) as usize;
            let chunk = ((bs as usize) - in_off).min(total - done);

            let block = self.block_at_index(inode, index)?;
            if block == 0 {
                out[done..done + chunk].fill(0);
            } else {
                let buf = self.read_block(block)?;
                out[done..done + chunk].copy_from_slice(&buf[in_off..in_off + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    /// Write file data at `offset`, allocating blocks on demand.
    ///
    /// Returns the number of bytes actually written: the count is short
    /// when the write runs past the single-indirect range or the volume
    /// fills up, and whatever made it to disk stays there (no rollback).
    pub fn write_file(
        &mut self,
        ino: u32,
        inode: &mut Inode,
        offset: u32,
        data: &[u8],
    ) -> KernelResult<usize> {
        let bs = self.block_size;
        let mut done = 0usize;

        while done < data.len() {
            let pos = offset + done as u32;
            let index = pos / bs;
            let block = match self.ensure_block_at_index(inode, index) {
                Ok(block) => block,
                Err(err) => {
                    if done == 0 {
                        return Err(err);
                    }
                    break;
                }
            };

            let in_off = (pos % bs) as usize;
            let chunk = ((bs as usize) - in_off).min(data.len() - done);
            let mut buf = self.read_block(block)?;
            buf[in_off..in_off + chunk].copy_from_slice(&data[done..done + chunk]);
            self.write_block(block, &buf)?;
            done += chunk;
        }

        if done > 0 {
            let end = offset + done as u32;
            if end > inode.size {
                inode.size = end;
            }
        }
        inode.mtime = crate::timer::uptime_secs() as u32;
        self.write_inode(ino, inode)?;
        Ok(done)
    }

    /// Shrink a file to `new_size`. Direct blocks past the new end are
    /// freed; data hanging off the indirect block is left alone (the
    /// indirect table itself stays in place), an accepted limitation.
    /// Growing is not supported and is a no-op.
    pub fn truncate(&mut self, ino: u32, inode: &mut Inode, new_size: u32) -> KernelResult<()> {
        if new_size >= inode.size {
            return Ok(());
        }
        let bs = self.block_size;
        let keep = new_size.div_ceil(bs);
        let spb = self.sectors_per_block();

        for slot in (keep as usize)..NDIRECT {
            if inode.block[slot] != 0 {
                self.free_block(inode.block[slot])?;
                inode.block[slot] = 0;
                inode.blocks = inode.blocks.saturating_sub(spb);
            }
        }

        inode.size = new_size;
        inode.mtime = crate::timer::uptime_secs() as u32;
        self.write_inode(ino, inode)
    }

    /// Release every data block of a dying inode: the direct slots, the
    /// blocks listed in the single-indirect table, and the table itself.
    ///
    /// The block array is only pointer data for regular files and
    /// directories. A fast symlink overloads it with the target string,
    /// so there is nothing to free; a slow symlink owns exactly the one
    /// block its target occupies.
    pub fn free_file_blocks(&mut self, inode: &mut Inode) -> KernelResult<()> {
        if inode.is_symlink() {
            if inode.size as usize > FAST_SYMLINK_MAX && inode.block[0] != 0 {
                self.free_block(inode.block[0])?;
            }
            inode.block = [0; 15];
            inode.blocks = 0;
            return Ok(());
        }
        for slot in 0..NDIRECT {
            if inode.block[slot] != 0 {
                self.free_block(inode.block[slot])?;
                inode.block[slot] = 0;
            }
        }
        let indirect = inode.block[INDIRECT_SLOT];
        if indirect != 0 {
            let table = self.read_block(indirect)?;
            for slot in 0..self.ptrs_per_block() as usize {
                let block = disk::ru32(&table, slot * 4);
                if block != 0 {
                    self.free_block(block)?;
                }
            }
            self.free_block(indirect)?;
            inode.block[INDIRECT_SLOT] = 0;
        }
        inode.blocks = 0;
        Ok(())
    }

    // -- symlinks ---------------------------------------------------------

    /// Read a symlink target. Targets up to [`FAST_SYMLINK_MAX`] bytes
    /// live in the inode's block-pointer area; longer ones occupy data
    /// block 0.
    pub fn read_symlink(&self, inode: &Inode) -> KernelResult<String> {
        if !inode.is_symlink() {
            return Err(KernelError::InvalidArgument);
        }
        let len = inode.size as usize;
        let bytes: Vec<u8> = if len <= FAST_SYMLINK_MAX {
            inode.block_area_bytes()[..len].to_vec()
        } else {
            if inode.block[0] == 0 {
                return Err(KernelError::IoError);
            }
            let buf = self.read_block(inode.block[0])?;
            if len > buf.len() {
                return Err(KernelError::IoError);
            }
            buf[..len].to_vec()
        };
        String::from_utf8(bytes).map_err(|_| KernelError::InvalidPath)
    }

    /// Allocate and write a symlink inode for `target`; the caller links
    /// it into a directory.
    pub fn create_symlink_inode(&mut self, target: &str) -> KernelResult<u32> {
        if target.len() > self.block_size as usize {
            return Err(KernelError::TooLarge);
        }
        let now = crate::timer::uptime_secs() as u32;
        let ino = self.alloc_inode()?;
        let mut inode = Inode::empty();
        inode.mode = S_IFLNK | 0o777;
        inode.links_count = 1;
        inode.size = target.len() as u32;
        inode.atime = now;
        inode.ctime = now;
        inode.mtime = now;

        if target.len() <= FAST_SYMLINK_MAX {
            inode.set_block_area_bytes(target.as_bytes());
        } else {
            let block = self.alloc_block()?;
            let mut buf = vec![0u8; self.block_size as usize];
            buf[..target.len()].copy_from_slice(target.as_bytes());
            self.write_block(block, &buf)?;
            inode.block[0] = block;
            inode.blocks = self.sectors_per_block();
        }

        self.write_inode(ino, &inode)?;
        Ok(ino)
    }
}

/// Render mode bits as the classic ten-character permission string.
pub fn mode_string(mode: u16) -> String {
    let mut out = String::with_capacity(10);
    out.push(match mode & disk::S_IFMT {
        disk::S_IFDIR => 'd',
        disk::S_IFLNK => 'l',
        _ => '-',
    });
    for shift in [6u16, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamDisk;
    use ::alloc::sync::Arc;
    use spin::Mutex;

    fn fresh_fs() -> Ext2Fs {
        let mut disk = RamDisk::new(2048); // 1 MiB
        mkfs::format(&mut disk, &mkfs::MkfsOptions::default()).expect("format");
        let shared: SharedBlockDevice = Arc::new(Mutex::new(disk));
        Ext2Fs::mount(shared).expect("mount")
    }

    #[test]
    fn mount_sees_mkfs_geometry() {
        let fs = fresh_fs();
        assert_eq!(fs.block_size(), 1024);
        assert_eq!(fs.group_count(), 1);
        let root = fs.read_inode(ROOT_INODE).expect("root inode");
        assert!(root.is_dir());
        assert_eq!(root.links_count, 2);
        assert_eq!(root.size, 1024);
    }

    #[test]
    fn mount_rejects_garbage() {
        let disk = RamDisk::new(64);
        let shared: SharedBlockDevice = Arc::new(Mutex::new(disk));
        assert!(matches!(
            Ext2Fs::mount(shared),
            Err(KernelError::UnsupportedFilesystem)
        ));
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");

        let n = fs
            .write_file(ino, &mut inode, 0, b"hello")
            .expect("write data");
        assert_eq!(n, 5);
        assert_eq!(inode.size, 5);

        let mut buf = [0u8; 5];
        let n = fs.read_file(&inode, 0, &mut buf).expect("read data");
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");

        // reads past EOF are empty
        let n = fs.read_file(&inode, 5, &mut buf).expect("read at eof");
        assert_eq!(n, 0);
    }

    #[test]
    fn write_spanning_direct_and_indirect() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");

        // 12 direct blocks end at exactly 12 KiB; write across the
        // boundary so the indirect path engages.
        let bs = fs.block_size();
        let boundary = 12 * bs;
        let pattern: Vec<u8> = (0..(2 * bs)).map(|i| (i % 251) as u8).collect();
        let n = fs
            .write_file(ino, &mut inode, boundary - bs, &pattern)
            .expect("boundary write");
        assert_eq!(n, pattern.len());
        assert_ne!(inode.block[INDIRECT_SLOT], 0);
        assert_eq!(inode.size, boundary + bs);

        let mut back = vec![0u8; pattern.len()];
        let n = fs
            .read_file(&inode, boundary - bs, &mut back)
            .expect("boundary read");
        assert_eq!(n, pattern.len());
        assert_eq!(back, pattern);
    }

    #[test]
    fn file_size_exactly_at_direct_boundary() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");

        let bs = fs.block_size() as usize;
        let data = vec![0x7fu8; 12 * bs];
        let n = fs.write_file(ino, &mut inode, 0, &data).expect("write");
        assert_eq!(n, 12 * bs);
        assert_eq!(inode.size, (12 * bs) as u32);
        // exactly at the boundary no indirect block is needed
        assert_eq!(inode.block[INDIRECT_SLOT], 0);
    }

    #[test]
    fn write_beyond_single_indirect_is_truncated() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");

        let bs = fs.block_size();
        let limit = (12 + fs.ptrs_per_block()) * bs;
        // one block before the limit plus one block past it
        let data = vec![1u8; 2 * bs as usize];
        let n = fs
            .write_file(ino, &mut inode, limit - bs, &data)
            .expect("short write");
        assert_eq!(n, bs as usize);
        assert_eq!(inode.size, limit);

        // starting exactly at the limit nothing can be written
        let err = fs.write_file(ino, &mut inode, limit, &data).unwrap_err();
        assert_eq!(err, KernelError::TooLarge);
    }

    #[test]
    fn truncate_shrinks_and_frees() {
        let mut fs = fresh_fs();
        let ino = fs.alloc_inode().expect("inode");
        let mut inode = Inode::empty();
        inode.mode = disk::S_IFREG | 0o644;
        inode.links_count = 1;
        fs.write_inode(ino, &inode).expect("write inode");

        let bs = fs.block_size() as usize;
        let data = vec![0x42u8; 4 * bs];
        fs.write_file(ino, &mut inode, 0, &data).expect("write");
        let free_before = fs.sb.free_blocks_count;

        fs.truncate(ino, &mut inode, bs as u32).expect("truncate");
        assert_eq!(inode.size, bs as u32);
        assert_eq!(fs.sb.free_blocks_count, free_before + 3);
        assert_eq!(inode.block[0] != 0, true);
        assert_eq!(inode.block[1], 0);

        // growing is not supported: size stays put
        fs.truncate(ino, &mut inode, (4 * bs) as u32).expect("no-op");
        assert_eq!(inode.size, bs as u32);
    }

    #[test]
    fn fast_and_slow_symlinks() {
        let mut fs = fresh_fs();

        let fast = fs.create_symlink_inode("/short").expect("fast symlink");
        let inode = fs.read_inode(fast).expect("read");
        assert!(inode.is_symlink());
        assert_eq!(inode.size, 6);
        assert_eq!(fs.read_symlink(&inode).expect("target"), "/short");

        let long_target: String = core::iter::repeat('a').take(100).collect();
        let slow = fs.create_symlink_inode(&long_target).expect("slow symlink");
        let inode = fs.read_inode(slow).expect("read");
        assert_eq!(inode.size, 100);
        assert_ne!(inode.block[0], 0);
        assert_eq!(fs.read_symlink(&inode).expect("target"), long_target);
    }

    #[test]
    fn releasing_a_fast_symlink_frees_no_blocks() {
        let mut fs = fresh_fs();

        // a target longer than 48 bytes fills the block-pointer words past
        // the indirect slot with string bytes; none of them are pointers
        let target: String = core::iter::repeat('a').take(56).collect();
        let ino = fs.create_symlink_inode(&target).expect("fast symlink");
        let free_before = fs.sb.free_blocks_count;

        let mut inode = fs.read_inode(ino).expect("read");
        fs.free_file_blocks(&mut inode).expect("release");
        assert_eq!(fs.sb.free_blocks_count, free_before);
        assert_eq!(inode.block, [0; 15]);
        assert_eq!(inode.blocks, 0);
    }

    #[test]
    fn releasing_a_slow_symlink_frees_its_one_block() {
        let mut fs = fresh_fs();

        let target: String = core::iter::repeat('b').take(100).collect();
        let ino = fs.create_symlink_inode(&target).expect("slow symlink");
        let free_before = fs.sb.free_blocks_count;

        let mut inode = fs.read_inode(ino).expect("read");
        assert_ne!(inode.block[0], 0);
        fs.free_file_blocks(&mut inode).expect("release");
        assert_eq!(fs.sb.free_blocks_count, free_before + 1);
        assert_eq!(inode.block, [0; 15]);
    }

    #[test]
    fn mode_strings() {
        assert_eq!(mode_string(disk::S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(disk::S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(mode_string(disk::S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(mode_string(disk::S_IFREG | 0o700), "-rwx------");
    }
}
