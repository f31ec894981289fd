//! Single-group ext2 formatter.
//!
//! Lays down a fresh revision-0 volume with 1 KiB blocks: superblock,
//! one group descriptor, the two bitmaps, a zeroed inode table and a root
//! directory holding `.` and `..`. The boot path formats the ramdisk with
//! this; tests format their fixtures the same way.

use ::alloc::vec;

use super::disk::{self, DirEntryRaw, Inode, EXT2_MAGIC};
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::{BlockDevice, SECTOR_SIZE};

/// Formatting geometry. The block size is fixed at 1024 and everything
/// must fit one block group (8192 blocks, i.e. 8 MiB).
#[derive(Debug, Clone, Copy)]
pub struct MkfsOptions {
    /// Total filesystem blocks, including the boot block.
    pub total_blocks: u32,
    /// Inode slots to provision.
    pub inode_count: u32,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        Self {
            total_blocks: 1024, // 1 MiB
            inode_count: 128,
        }
    }
}

const BLOCK_SIZE: u32 = 1024;
const BLOCKS_PER_GROUP: u32 = 8 * BLOCK_SIZE; // one bit per byte of bitmap block

// fixed single-group layout
const SUPERBLOCK_BLOCK: u32 = 1;
const DESC_BLOCK: u32 = 2;
const BLOCK_BITMAP_BLOCK: u32 = 3;
const INODE_BITMAP_BLOCK: u32 = 4;
const INODE_TABLE_BLOCK: u32 = 5;

/// Write a fresh filesystem onto `dev`.
pub fn format(dev: &mut dyn BlockDevice, opts: &MkfsOptions) -> KernelResult<()> {
    if opts.total_blocks < 16 || opts.inode_count <= disk::FIRST_FREE_INODE {
        return Err(KernelError::InvalidArgument);
    }
    if opts.total_blocks - 1 > BLOCKS_PER_GROUP {
        return Err(KernelError::InvalidArgument);
    }
    let needed_sectors = u64::from(opts.total_blocks) * u64::from(BLOCK_SIZE / SECTOR_SIZE as u32);
    if needed_sectors > dev.sector_count() {
        return Err(KernelError::IoError);
    }

    let inode_table_blocks =
        (opts.inode_count * disk::INODE_SIZE as u32).div_ceil(BLOCK_SIZE);
    let root_dir_block = INODE_TABLE_BLOCK + inode_table_blocks;
    // blocks 1..=root_dir_block are metadata plus the root directory
    let used_blocks = root_dir_block;
    let free_blocks = (opts.total_blocks - 1) - used_blocks;
    let free_inodes = opts.inode_count - (disk::FIRST_FREE_INODE - 1);
    let now = crate::timer::uptime_secs() as u32;

    let write_block = |dev: &mut dyn BlockDevice, block: u32, data: &[u8]| {
        dev.write_sectors(
            u64::from(block) * u64::from(BLOCK_SIZE / SECTOR_SIZE as u32),
            data,
        )
    };

    // boot block stays zero
    write_block(dev, 0, &vec![0u8; BLOCK_SIZE as usize])?;

    // superblock
    let mut sb = vec![0u8; BLOCK_SIZE as usize];
    disk::wu32(&mut sb, 0, opts.inode_count); // s_inodes_count
    disk::wu32(&mut sb, 4, opts.total_blocks); // s_blocks_count
    disk::wu32(&mut sb, 8, 0); // s_r_blocks_count
    disk::wu32(&mut sb, 12, free_blocks); // s_free_blocks_count
    disk::wu32(&mut sb, 16, free_inodes); // s_free_inodes_count
    disk::wu32(&mut sb, 20, 1); // s_first_data_block
    disk::wu32(&mut sb, 24, 0); // s_log_block_size (1024)
    disk::wu32(&mut sb, 28, 0); // s_log_frag_size
    disk::wu32(&mut sb, 32, BLOCKS_PER_GROUP); // s_blocks_per_group
    disk::wu32(&mut sb, 36, BLOCKS_PER_GROUP); // s_frags_per_group
    disk::wu32(&mut sb, 40, opts.inode_count); // s_inodes_per_group
    disk::wu32(&mut sb, 44, now); // s_mtime
    disk::wu32(&mut sb, 48, now); // s_wtime
    disk::wu16(&mut sb, 56, EXT2_MAGIC); // s_magic
    disk::wu16(&mut sb, 58, 1); // s_state: clean
    disk::wu16(&mut sb, 60, 1); // s_errors: continue
    disk::wu32(&mut sb, 76, 0); // s_rev_level: 0
    write_block(dev, SUPERBLOCK_BLOCK, &sb)?;

    // group descriptor table (one group)
    let mut desc = vec![0u8; BLOCK_SIZE as usize];
    let group = disk::GroupDesc {
        block_bitmap: BLOCK_BITMAP_BLOCK,
        inode_bitmap: INODE_BITMAP_BLOCK,
        inode_table: INODE_TABLE_BLOCK,
        free_blocks_count: free_blocks as u16,
        free_inodes_count: free_inodes as u16,
        used_dirs_count: 1,
    };
    group.encode(&mut desc[..disk::GROUP_DESC_SIZE]);
    write_block(dev, DESC_BLOCK, &desc)?;

    // block bitmap: bit i covers block first_data_block + i
    let mut bitmap = vec![0u8; BLOCK_SIZE as usize];
    for block in 1..=used_blocks {
        let bit = (block - 1) as usize;
        bitmap[bit / 8] |= 1 << (bit % 8);
    }
    // pad bits past the end of the volume are reserved-set
    for bit in (opts.total_blocks - 1)..BLOCKS_PER_GROUP {
        bitmap[bit as usize / 8] |= 1 << (bit % 8);
    }
    write_block(dev, BLOCK_BITMAP_BLOCK, &bitmap)?;

    // inode bitmap: inodes 1..=10 are reserved
    let mut bitmap = vec![0u8; BLOCK_SIZE as usize];
    for bit in 0..(disk::FIRST_FREE_INODE - 1) as usize {
        bitmap[bit / 8] |= 1 << (bit % 8);
    }
    for bit in opts.inode_count..(BLOCK_SIZE * 8) {
        bitmap[bit as usize / 8] |= 1 << (bit % 8);
    }
    write_block(dev, INODE_BITMAP_BLOCK, &bitmap)?;

    // zeroed inode table, with the root inode filled in
    for i in 0..inode_table_blocks {
        write_block(dev, INODE_TABLE_BLOCK + i, &vec![0u8; BLOCK_SIZE as usize])?;
    }
    let mut root = Inode::empty();
    root.mode = disk::S_IFDIR | 0o755;
    root.links_count = 2; // "." plus the parent entry in itself
    root.size = BLOCK_SIZE;
    root.blocks = BLOCK_SIZE / SECTOR_SIZE as u32;
    root.atime = now;
    root.ctime = now;
    root.mtime = now;
    root.block[0] = root_dir_block;

    let mut table_block = vec![0u8; BLOCK_SIZE as usize];
    let root_slot = (disk::ROOT_INODE - 1) as usize * disk::INODE_SIZE;
    root.encode(&mut table_block[root_slot..root_slot + disk::INODE_SIZE]);
    write_block(dev, INODE_TABLE_BLOCK, &table_block)?;

    // root directory data: "." and ".."
    let mut dir = vec![0u8; BLOCK_SIZE as usize];
    let dot_len = disk::dirent_actual_len(1) as u16;
    DirEntryRaw::write(&mut dir, 0, disk::ROOT_INODE, dot_len, disk::FT_DIR, b".");
    DirEntryRaw::write(
        &mut dir,
        usize::from(dot_len),
        disk::ROOT_INODE,
        BLOCK_SIZE as u16 - dot_len,
        disk::FT_DIR,
        b"..",
    );
    write_block(dev, root_dir_block, &dir)?;

    log::info!(
        "mkfs: {} blocks, {} inodes, {} free blocks",
        opts.total_blocks,
        opts.inode_count,
        free_blocks,
    );
    Ok(())
}
