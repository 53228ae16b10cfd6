//! Absolute-position file I/O for the per-tree store files.
//!
//! Each B+ tree keeps three files: a 12-byte header, a node file, and a
//! value file. All of them are held open with a mixed read/write cursor;
//! every access positions the cursor explicitly, so interleaved reads and
//! writes never depend on where the cursor was left.

use interlock_common::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// An open store file addressed by `i32` offsets.
pub struct StoreFile {
    file: File,
}

impl StoreFile {
    /// Opens (creating if missing) a store file. `truncate` discards any
    /// existing content.
    pub fn open(path: &Path, truncate: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?;
        Ok(Self { file })
    }

    /// Current file length as an offset.
    pub fn end_offset(&mut self) -> Result<i32> {
        let len = self.file.seek(SeekFrom::End(0))?;
        Ok(len as i32)
    }

    /// Reads `buf.len()` bytes starting at `pos`.
    pub fn read_at(&mut self, pos: i32, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` starting at `pos`.
    pub fn write_at(&mut self, pos: i32, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Extends the file with `size` zero bytes, returning the offset of
    /// the new region. Used when allocating node slots so the offset is
    /// always reachable on restart.
    pub fn append_zeroed(&mut self, size: usize) -> Result<i32> {
        let pos = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&vec![0u8; size])?;
        Ok(pos as i32)
    }

    /// Discards all content.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Flushes buffered writes to the OS.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
