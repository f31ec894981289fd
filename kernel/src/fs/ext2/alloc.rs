//! Block and inode bitmap allocators.
//!
//! Groups are scanned in ascending order, bits within a group in
//! ascending order. Every mutation is followed by a metadata write-back
//! ([`Ext2Fs::sync_metadata`]) so the on-device superblock and group
//! descriptors never go stale.

use ::alloc::vec::Vec;

use super::disk::{GROUP_DESC_SIZE, SUPERBLOCK_OFFSET};
use super::Ext2Fs;
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::SECTOR_SIZE;

impl Ext2Fs {
    /// Blocks covered by group `g`'s bitmap (the last group is short).
    fn blocks_in_group(&self, group: usize) -> u32 {
        let data_blocks = self.sb.blocks_count - self.sb.first_data_block;
        let before = group as u32 * self.sb.blocks_per_group;
        (data_blocks - before).min(self.sb.blocks_per_group)
    }

    /// Inodes covered by group `g`'s bitmap.
    fn inodes_in_group(&self, group: usize) -> u32 {
        let before = group as u32 * self.sb.inodes_per_group;
        (self.sb.inodes_count - before).min(self.sb.inodes_per_group)
    }

    /// Allocate a block: first clear bit, first group with space.
    pub fn alloc_block(&mut self) -> KernelResult<u32> {
        for group in 0..self.groups.len() {
            if self.groups[group].free_blocks_count == 0 {
                continue;
            }
            let bitmap_block = self.groups[group].block_bitmap;
            let mut bitmap = self.read_block(bitmap_block)?;
            let limit = self.blocks_in_group(group);
            if let Some(bit) = first_clear_bit(&bitmap, limit) {
                bitmap[bit / 8] |= 1 << (bit % 8);
                self.write_block(bitmap_block, &bitmap)?;
                self.groups[group].free_blocks_count -= 1;
                self.sb.free_blocks_count -= 1;
                self.sync_metadata()?;
                return Ok(self.sb.first_data_block
                    + group as u32 * self.sb.blocks_per_group
                    + bit as u32);
            }
        }
        Err(KernelError::NoSpace)
    }

    /// Return a block to its group's bitmap. Freeing a free block is
    /// logged and ignored.
    pub fn free_block(&mut self, block: u32) -> KernelResult<()> {
        if block < self.sb.first_data_block || block >= self.sb.blocks_count {
            log::warn!("ext2: free of out-of-range block {}", block);
            return Ok(());
        }
        let rel = block - self.sb.first_data_block;
        let group = (rel / self.sb.blocks_per_group) as usize;
        let bit = (rel % self.sb.blocks_per_group) as usize;

        let bitmap_block = self.groups[group].block_bitmap;
        let mut bitmap = self.read_block(bitmap_block)?;
        if bitmap[bit / 8] & (1 << (bit % 8)) == 0 {
            log::warn!("ext2: double free of block {}", block);
            return Ok(());
        }
        bitmap[bit / 8] &= !(1 << (bit % 8));
        self.write_block(bitmap_block, &bitmap)?;
        self.groups[group].free_blocks_count += 1;
        self.sb.free_blocks_count += 1;
        self.sync_metadata()
    }

    /// Allocate an inode; returns its 1-based number.
    pub fn alloc_inode(&mut self) -> KernelResult<u32> {
        for group in 0..self.groups.len() {
            if self.groups[group].free_inodes_count == 0 {
                continue;
            }
            let bitmap_block = self.groups[group].inode_bitmap;
            let mut bitmap = self.read_block(bitmap_block)?;
            let limit = self.inodes_in_group(group);
            if let Some(bit) = first_clear_bit(&bitmap, limit) {
                bitmap[bit / 8] |= 1 << (bit % 8);
                self.write_block(bitmap_block, &bitmap)?;
                self.groups[group].free_inodes_count -= 1;
                self.sb.free_inodes_count -= 1;
                self.sync_metadata()?;
                return Ok(group as u32 * self.sb.inodes_per_group + bit as u32 + 1);
            }
        }
        Err(KernelError::NoSpace)
    }

    /// Release inode `n` back to its bitmap.
    pub fn free_inode(&mut self, n: u32) -> KernelResult<()> {
        if n == 0 || n > self.sb.inodes_count {
            log::warn!("ext2: free of out-of-range inode {}", n);
            return Ok(());
        }
        let index = n - 1;
        let group = (index / self.sb.inodes_per_group) as usize;
        let bit = (index % self.sb.inodes_per_group) as usize;

        let bitmap_block = self.groups[group].inode_bitmap;
        let mut bitmap = self.read_block(bitmap_block)?;
        if bitmap[bit / 8] & (1 << (bit % 8)) == 0 {
            log::warn!("ext2: double free of inode {}", n);
            return Ok(());
        }
        bitmap[bit / 8] &= !(1 << (bit % 8));
        self.write_block(bitmap_block, &bitmap)?;
        self.groups[group].free_inodes_count += 1;
        self.sb.free_inodes_count += 1;
        self.sync_metadata()
    }

    /// Write the superblock counters and all group descriptors through to
    /// the device.
    pub fn sync_metadata(&self) -> KernelResult<()> {
        // superblock: patch the counters into the on-disk image
        let mut sb_area = ::alloc::vec![0u8; 1024];
        let sb_sector = (SUPERBLOCK_OFFSET / SECTOR_SIZE) as u64;
        self.dev_read(sb_sector, &mut sb_area)?;
        self.sb.patch_counts(&mut sb_area);
        self.dev_write(sb_sector, &sb_area)?;

        // group descriptor table
        let desc_start = self.sb.first_data_block + 1;
        let bs = self.block_size() as usize;
        let desc_bytes = self.groups.len() * GROUP_DESC_SIZE;
        let desc_blocks = desc_bytes.div_ceil(bs);

        let mut raw: Vec<u8> = Vec::with_capacity(desc_blocks * bs);
        for i in 0..desc_blocks {
            raw.extend_from_slice(&self.read_block(desc_start + i as u32)?);
        }
        for (i, group) in self.groups.iter().enumerate() {
            group.encode(&mut raw[i * GROUP_DESC_SIZE..(i + 1) * GROUP_DESC_SIZE]);
        }
        for i in 0..desc_blocks {
            self.write_block(desc_start + i as u32, &raw[i * bs..(i + 1) * bs])?;
        }
        Ok(())
    }
}

/// First clear bit below `limit`, if any.
fn first_clear_bit(bitmap: &[u8], limit: u32) -> Option<usize> {
    for (byte_idx, byte) in bitmap.iter().enumerate() {
        if *byte == 0xff {
            continue;
        }
        for bit in 0..8 {
            let idx = byte_idx * 8 + bit;
            if idx >= limit as usize {
                return None;
            }
            if *byte & (1 << bit) == 0 {
                return Some(idx);
            }
        }
    }
    None
}
