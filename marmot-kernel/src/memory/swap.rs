//! Swap file I/O.
//!
//! Each page has a deterministic on-disk name derived from its page number
//! and virtual address: `page{N}-{V}.swap`. The record is a fixed binary
//! header followed by the page bytes; swap files never outlive a run, so
//! the format owes nothing to other implementations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::clock::Timestamp;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct SwapHeader {
    access_count: u64,
    last_accessed: u64,
    len: u64,
}

/// What comes back from a swap-in.
pub struct SwapRecord {
    pub bytes: Vec<u8>,
    pub access_count: u64,
    pub last_accessed: Timestamp,
}

/// The directory swap files live in.
#[derive(Debug)]
pub struct SwapDir {
    dir: PathBuf,
}

impl SwapDir {
    /// Open a swap directory, deleting any swap files a previous run left
    /// behind.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<SwapDir> {
        let swap = SwapDir { dir: dir.into() };
        swap.sweep()?;
        Ok(swap)
    }

    fn sweep(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_swap_file(&path) {
                debug!("removing stale swap file {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn path_for(&self, page_number: usize, virtual_address: usize) -> PathBuf {
        self.dir.join(format!("page{page_number}-{virtual_address}.swap"))
    }

    /// Write a page's bytes and counters.
    pub fn write(
        &self,
        page_number: usize,
        virtual_address: usize,
        bytes: &[u8],
        access_count: u64,
        last_accessed: Timestamp,
    ) -> io::Result<()> {
        let header = SwapHeader {
            access_count,
            last_accessed: last_accessed.as_u64(),
            len: bytes.len() as u64,
        };
        let mut record = Vec::with_capacity(size_of::<SwapHeader>() + bytes.len());
        record.extend_from_slice(header.as_bytes());
        record.extend_from_slice(bytes);
        fs::write(self.path_for(page_number, virtual_address), record)
    }

    /// Read a page's record and delete the file. Returns `None` when no
    /// swap file exists, which callers treat as a zero-filled page.
    pub fn take(
        &self,
        page_number: usize,
        virtual_address: usize,
        page_size: usize,
    ) -> io::Result<Option<SwapRecord>> {
        let path = self.path_for(page_number, virtual_address);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let (header, bytes) = SwapHeader::read_from_prefix(&data)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "swap record too short"))?;
        if header.len as usize != page_size || bytes.len() != page_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "swap record for page {page_number} holds {} bytes, expected {page_size}",
                    bytes.len()
                ),
            ));
        }
        let record = SwapRecord {
            bytes: bytes.to_vec(),
            access_count: header.access_count,
            last_accessed: Timestamp::from_u64(header.last_accessed),
        };
        fs::remove_file(&path)?;
        Ok(Some(record))
    }

    /// Delete a page's swap file if one exists.
    pub fn remove(&self, page_number: usize, virtual_address: usize) -> io::Result<()> {
        match fs::remove_file(self.path_for(page_number, virtual_address)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn is_swap_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("page") && name.ends_with(".swap"))
}
