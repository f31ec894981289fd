//! Open-file handles.
//!
//! A handle is an index into a fixed table of open files; each entry
//! carries the inode number, a cached size and the position cursor. The
//! cursor is clamped to `[0, size]` on every seek.

use crate::error::{KernelError, KernelResult};

/// Open files the kernel supports at once.
pub const MAX_OPEN_FILES: usize = 16;

/// Index into the open-file table.
pub type FileHandle = usize;

/// Seek origin.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenFile {
    pub ino: u32,
    pub size: u32,
    pub pos: u32,
}

pub(crate) struct FileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_OPEN_FILES],
        }
    }

    pub fn open(&mut self, ino: u32, size: u32) -> KernelResult<FileHandle> {
        let handle = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::NoSpace)?;
        self.slots[handle] = Some(OpenFile { ino, size, pos: 0 });
        Ok(handle)
    }

    pub fn close(&mut self, handle: FileHandle) -> KernelResult<()> {
        let slot = self
            .slots
            .get_mut(handle)
            .ok_or(KernelError::BadHandle)?;
        if slot.take().is_none() {
            return Err(KernelError::BadHandle);
        }
        Ok(())
    }

    pub fn get_mut(&mut self, handle: FileHandle) -> KernelResult<&mut OpenFile> {
        self.slots
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(KernelError::BadHandle)
    }

    /// Clamp cursors (and cached sizes) of every handle on `ino` after a
    /// truncate.
    pub fn clamp_handles(&mut self, ino: u32, new_size: u32) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.ino == ino {
                slot.size = new_size;
                if slot.pos > new_size {
                    slot.pos = new_size;
                }
            }
        }
    }
}

/// Apply a seek to a cursor, clamped to `[0, size]`.
pub(crate) fn apply_seek(pos: u32, size: u32, from: SeekFrom) -> u32 {
    let target: i64 = match from {
        SeekFrom::Start(n) => i64::from(n),
        SeekFrom::Current(delta) => i64::from(pos) + i64::from(delta),
        SeekFrom::End(delta) => i64::from(size) + i64::from(delta),
    };
    target.clamp(0, i64::from(size)) as u32
}
