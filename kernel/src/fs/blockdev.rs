//! Block device abstraction.
//!
//! Sector-oriented trait plus a name registry, and the RAM-backed
//! implementation the kernel actually boots on.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Fixed sector size for every device.
pub const SECTOR_SIZE: usize = 512;

/// A device addressed in 512-byte sectors. Buffer lengths define the
/// sector count of a transfer and must be sector-multiples.
pub trait BlockDevice: Send {
    /// Total sectors on the device.
    fn sector_count(&self) -> u64;

    /// Bytes per sector (fixed).
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    /// Read `out.len() / 512` sectors starting at `first_sector`.
    fn read_sectors(&self, first_sector: u64, out: &mut [u8]) -> KernelResult<()>;

    /// Write `data.len() / 512` sectors starting at `first_sector`.
    fn write_sectors(&mut self, first_sector: u64, data: &[u8]) -> KernelResult<()>;
}

/// Shared handle to a registered device.
pub type SharedBlockDevice = Arc<Mutex<dyn BlockDevice + Send>>;

/// Heap-backed volatile disk.
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    /// A zero-filled disk of `sector_count` sectors.
    pub fn new(sector_count: u64) -> Self {
        Self {
            data: vec![0; sector_count as usize * SECTOR_SIZE],
        }
    }

    /// Copy a filesystem image onto the disk, starting at sector 0.
    pub fn load_image(&mut self, blob: &[u8]) -> KernelResult<()> {
        if blob.len() > self.data.len() {
            return Err(KernelError::IoError);
        }
        self.data[..blob.len()].copy_from_slice(blob);
        Ok(())
    }

    fn check_range(&self, first_sector: u64, len: usize) -> KernelResult<(usize, usize)> {
        if len % SECTOR_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let start = first_sector as usize * SECTOR_SIZE;
        let end = start.checked_add(len).ok_or(KernelError::IoError)?;
        if end > self.data.len() {
            return Err(KernelError::IoError);
        }
        Ok((start, end))
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&self, first_sector: u64, out: &mut [u8]) -> KernelResult<()> {
        let (start, end) = self.check_range(first_sector, out.len())?;
        out.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_sectors(&mut self, first_sector: u64, data: &[u8]) -> KernelResult<()> {
        let (start, end) = self.check_range(first_sector, data.len())?;
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

lazy_static! {
    static ref DEVICES: Mutex<BTreeMap<String, SharedBlockDevice>> = Mutex::new(BTreeMap::new());
}

/// Register a device under a name like `"ramdisk0"`.
pub fn register(name: &str, device: SharedBlockDevice) {
    DEVICES.lock().insert(String::from(name), device);
}

/// Look a device up by name.
pub fn lookup(name: &str) -> Option<SharedBlockDevice> {
    DEVICES.lock().get(name).cloned()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mut disk = RamDisk::new(16);
        assert_eq!(disk.sector_count(), 16);
        assert_eq!(disk.sector_size(), SECTOR_SIZE);

        let data = [0x5au8; SECTOR_SIZE * 2];
        disk.write_sectors(3, &data).expect("in-range write");
        let mut out = [0u8; SECTOR_SIZE * 2];
        disk.read_sectors(3, &mut out).expect("in-range read");
        assert_eq!(out, data);
    }

    #[test]
    fn out_of_range_is_io_error() {
        let mut disk = RamDisk::new(4);
        let buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.write_sectors(4, &buf), Err(KernelError::IoError));
        let mut out = [0u8; SECTOR_SIZE * 2];
        assert_eq!(disk.read_sectors(3, &mut out), Err(KernelError::IoError));
    }

    #[test]
    fn partial_sector_is_rejected() {
        let mut disk = RamDisk::new(4);
        assert_eq!(
            disk.write_sectors(0, &[0u8; 100]),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn image_loading_lands_at_sector_zero() {
        let mut disk = RamDisk::new(4);
        disk.load_image(&[1, 2, 3, 4]).expect("image fits");
        let mut out = [0u8; SECTOR_SIZE];
        disk.read_sectors(0, &mut out).expect("read");
        assert_eq!(&out[..4], &[1, 2, 3, 4]);

        let too_big = vec![0u8; SECTOR_SIZE * 5];
        assert_eq!(disk.load_image(&too_big), Err(KernelError::IoError));
    }

    #[test]
    fn registry_lookup() {
        let disk: SharedBlockDevice = Arc::new(Mutex::new(RamDisk::new(4)));
        register("testdisk0", disk);
        assert!(lookup("testdisk0").is_some());
        assert!(lookup("nope").is_none());
    }
}
