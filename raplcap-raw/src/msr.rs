//! MSR (Model-Specific Register) device access
//!
//! Registers are reached through the per-CPU character devices exported by
//! the `msr_safe` kernel module (`/dev/cpu/<n>/msr_safe`, usable without
//! root when allow-listed) or the stock `msr` module (`/dev/cpu/<n>/msr`).
//! Every read and write is a single positioned 8-byte access; nothing is
//! cached.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, MsrError>;

/// Default directory holding one subdirectory per logical CPU
pub const DEFAULT_DEVICE_ROOT: &str = "/dev/cpu";

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error(
        "Failed to open MSR device for CPU {cpu}: msr_safe: {msr_safe_error}; msr: {msr_error}"
    )]
    OpenFailed {
        cpu: u32,
        msr_safe_error: std::io::Error,
        msr_error: std::io::Error,
    },

    #[error("Invalid MSR offset {offset} on CPU {cpu}")]
    InvalidOffset { cpu: u32, offset: i64 },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Short read of MSR 0x{msr:X} on CPU {cpu}: got {len} of 8 bytes")]
    ShortRead { cpu: u32, msr: u64, len: usize },

    #[error("Short write of MSR 0x{msr:X} on CPU {cpu}: wrote {len} of 8 bytes")]
    ShortWrite { cpu: u32, msr: u64, len: usize },

    #[error("Failed to close MSR device for CPU {cpu}: {source}")]
    CloseFailed { cpu: u32, source: std::io::Error },

    #[error("MSR device for CPU {cpu} is closed")]
    Closed { cpu: u32 },
}

/// Path of the `msr_safe` device for `cpu` under `root`
pub fn msr_safe_path(root: &Path, cpu: u32) -> PathBuf {
    root.join(cpu.to_string()).join("msr_safe")
}

/// Path of the standard `msr` device for `cpu` under `root`
pub fn msr_path(root: &Path, cpu: u32) -> PathBuf {
    root.join(cpu.to_string()).join("msr")
}

/// An open register file for one logical CPU
///
/// The file is closed on drop; [`MsrHandle::close`] closes it explicitly and
/// reports the error that drop would swallow.
#[derive(Debug)]
pub struct MsrHandle {
    file: Option<File>,
    cpu: u32,
    path: PathBuf,
}

impl MsrHandle {
    /// Open the register file of `cpu` under [`DEFAULT_DEVICE_ROOT`]
    pub fn open(cpu: u32) -> Result<Self> {
        Self::open_in(Path::new(DEFAULT_DEVICE_ROOT), cpu, false)
    }

    /// Open the register file of `cpu` under `root`
    ///
    /// `msr_safe` is tried first, then the standard `msr` device. With
    /// `read_only` set the device is opened without write access.
    ///
    /// # Errors
    ///
    /// [`MsrError::OpenFailed`] carrying both open errors if neither device
    /// can be opened.
    pub fn open_in(root: &Path, cpu: u32, read_only: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(!read_only);

        let safe_path = msr_safe_path(root, cpu);
        let safe_err = match options.open(&safe_path) {
            Ok(file) => return Ok(Self::from_file(file, cpu, safe_path)),
            Err(e) => e,
        };

        let path = msr_path(root, cpu);
        match options.open(&path) {
            Ok(file) => Ok(Self::from_file(file, cpu, path)),
            Err(e) => Err(MsrError::OpenFailed {
                cpu,
                msr_safe_error: safe_err,
                msr_error: e,
            }),
        }
    }

    /// Wrap an already-open register file
    pub fn from_file(file: File, cpu: u32, path: PathBuf) -> Self {
        Self {
            file: Some(file),
            cpu,
            path,
        }
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(MsrError::Closed { cpu: self.cpu })
    }

    fn check_offset(&self, offset: i64) -> Result<u64> {
        u64::try_from(offset).map_err(|_| MsrError::InvalidOffset {
            cpu: self.cpu,
            offset,
        })
    }

    /// Read the 64-bit register at `offset`
    pub fn read(&self, offset: i64) -> Result<u64> {
        let msr = self.check_offset(offset)?;
        let mut buffer = [0u8; 8];
        let len = self
            .file()?
            .read_at(&mut buffer, msr)
            .map_err(|e| MsrError::ReadFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;
        if len != buffer.len() {
            return Err(MsrError::ShortRead {
                cpu: self.cpu,
                msr,
                len,
            });
        }
        Ok(u64::from_ne_bytes(buffer))
    }

    /// Write the 64-bit register at `offset`
    ///
    /// # Safety
    ///
    /// Not `unsafe` in the Rust sense, but writing incorrect values to MSRs
    /// can cause system instability. Callers should only modify the fields
    /// they own (see [`crate::RegisterLayout::apply_to`]).
    pub fn write(&self, offset: i64, value: u64) -> Result<()> {
        let msr = self.check_offset(offset)?;
        let buffer = value.to_ne_bytes();
        let len = self
            .file()?
            .write_at(&buffer, msr)
            .map_err(|e| MsrError::WriteFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;
        if len != buffer.len() {
            return Err(MsrError::ShortWrite {
                cpu: self.cpu,
                msr,
                len,
            });
        }
        Ok(())
    }

    /// Close the register file; a no-op if already closed
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        nix::unistd::close(file.into_raw_fd()).map_err(|e| MsrError::CloseFailed {
            cpu: self.cpu,
            source: e.into(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
