//! Kernel-wide error types.
//!
//! Every fallible VFS, ext2, IPC and scheduler primitive returns a
//! [`KernelError`] discriminator; user-visible text is the shell's problem.

use core::fmt;

/// Result alias used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Error discriminators surfaced by the kernel core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Path component or file does not exist.
    NotFound,
    /// A path component that must be a directory is not one.
    NotDirectory,
    /// The operation refuses directories (e.g. `open`).
    IsDirectory,
    /// Directory removal attempted on a non-empty directory.
    NotEmpty,
    /// Creation target already exists.
    Exists,
    /// Block or inode bitmap exhausted.
    NoSpace,
    /// File offset beyond the single-indirect addressing range.
    TooLarge,
    /// Symlink resolution exceeded the depth limit.
    SymlinkLoop,
    /// Malformed path (empty, or a component longer than 255 bytes).
    InvalidPath,
    /// Argument outside its domain.
    InvalidArgument,
    /// Block device failure or out-of-range access.
    IoError,
    /// Destination mailbox ring is full.
    QueueFull,
    /// No task with the given pid.
    NoSuchPid,
    /// Mailbox is empty (non-blocking receive).
    Empty,
    /// Stale or never-opened file handle.
    BadHandle,
    /// Superblock magic or geometry check failed at mount.
    UnsupportedFilesystem,
    /// Subsystem used before its `init`.
    NotInitialized { subsystem: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::NotDirectory => write!(f, "not a directory"),
            Self::IsDirectory => write!(f, "is a directory"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::Exists => write!(f, "file exists"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::TooLarge => write!(f, "file too large"),
            Self::SymlinkLoop => write!(f, "too many levels of symbolic links"),
            Self::InvalidPath => write!(f, "invalid path"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::IoError => write!(f, "I/O error"),
            Self::QueueFull => write!(f, "message queue full"),
            Self::NoSuchPid => write!(f, "no such task"),
            Self::Empty => write!(f, "mailbox empty"),
            Self::BadHandle => write!(f, "bad file handle"),
            Self::UnsupportedFilesystem => write!(f, "unsupported filesystem"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}
