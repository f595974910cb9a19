//! Memory management.
//!
//! This module owns everything between a process-virtual byte address and
//! the physical store:
//! - the page table, one entry per virtual page for the machine's lifetime
//! - the free-frame bitmap over physical frames
//! - demand paging with least-recently-used victim selection and swap I/O
//! - heap allocation over contiguous page runs
//! - shared-memory regions reserved at boot

mod page;
mod physical;
mod swap;

pub use page::{MemoryPage, SharedOwner};
pub use physical::PhysicalStore;
pub use swap::SwapDir;

use std::io;
use std::path::PathBuf;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::Config;
use crate::process::{Pid, Process};

#[derive(Debug, Error)]
pub enum MemoryError {
    /// `pid` accessed an offset outside every page it owns or shares.
    #[error("pid {pid}: unmapped address {address:#x}")]
    Unmapped { pid: Pid, address: usize },

    /// Swap I/O failed underneath a paging operation.
    #[error("swap i/o failed for page {page_number}: {source}")]
    Swap {
        page_number: usize,
        source: io::Error,
    },
}

/// Raised when a process map cannot be covered by free pages. The virtual
/// address space is sized at boot and cannot grow, so this is host-fatal.
#[derive(Debug, Error)]
#[error("out of memory: pid {pid} needs {requested_pages} pages, {available} free")]
pub struct OutOfMemoryError {
    pub pid: Pid,
    pub requested_pages: usize,
    pub available: usize,
}

/// Round `bytes` up to a whole number of pages.
pub fn round_to_page(bytes: usize, page_size: usize) -> usize {
    bytes.div_ceil(page_size) * page_size
}

#[derive(Debug)]
pub struct MemoryManager {
    page_size: usize,
    physical: PhysicalStore,
    /// True bits are free frames; the complement of the valid page set.
    free_frames: Vec<bool>,
    pages: Vec<MemoryPage>,
    swap: SwapDir,
    clock: Clock,
}

impl MemoryManager {
    /// Build the page table and physical store, sweep stale swap files,
    /// and reserve the configured shared-memory regions.
    pub fn new(
        config: &Config,
        virtual_bytes: usize,
        swap_dir: impl Into<PathBuf>,
    ) -> io::Result<MemoryManager> {
        let page_size = config.memory_page_size;
        let virtual_bytes = round_to_page(virtual_bytes, page_size);
        let physical_bytes = round_to_page(config.physical_memory, page_size);
        let page_count = virtual_bytes / page_size;
        let frame_count = physical_bytes / page_size;

        let mut pages: Vec<MemoryPage> = (0..page_count)
            .map(|number| MemoryPage::new(number, page_size))
            .collect();

        // The first frame_count pages boot valid, identity-mapped to their
        // frames; the rest start invalid and fault in on first touch.
        let resident = page_count.min(frame_count);
        for (frame, page) in pages.iter_mut().enumerate().take(resident) {
            page.valid = true;
            page.physical_address = frame * page_size;
        }
        let mut free_frames = vec![false; frame_count];
        for slot in free_frames.iter_mut().skip(resident) {
            *slot = true;
        }

        let mut manager = MemoryManager {
            page_size,
            physical: PhysicalStore::new(physical_bytes),
            free_frames,
            pages,
            swap: SwapDir::new(swap_dir)?,
            clock: Clock::new(),
        };
        manager.reserve_shared_regions(
            config.num_of_shared_memory_regions,
            config.shared_memory_region_size,
        );
        debug!(
            "memory manager up: {page_count} virtual pages, {frame_count} frames, page size {page_size}"
        );
        Ok(manager)
    }

    /// Walk the first free pages and stamp them with descending region
    /// ids, one region's worth at a time, so every region occupies
    /// contiguous pages. Shared mapping relies on that contiguity.
    fn reserve_shared_regions(&mut self, regions: usize, region_bytes: usize) {
        let pages_per_region = round_to_page(region_bytes, self.page_size) / self.page_size;
        let total = regions * pages_per_region;
        let mut assigned = 0;
        for page in &mut self.pages {
            if assigned == total {
                return;
            }
            if page.is_assignable() {
                page.shared_region_id = (regions - assigned / pages_per_region) as u32;
                assigned += 1;
            }
        }
        if assigned < total {
            warn!(
                "only {assigned} of {total} pages available for shared regions; \
                 later regions are truncated"
            );
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Read-only view of the page table, for statistics and tests.
    pub fn pages(&self) -> &[MemoryPage] {
        &self.pages
    }

    /// Read-only view of the physical store, for diagnostics.
    pub fn physical(&self) -> &PhysicalStore {
        &self.physical
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_frames.iter().filter(|f| **f).count()
    }

    // -------------------------------------------------------------------
    // Byte-granular access
    // -------------------------------------------------------------------

    pub fn read(&mut self, pid: Pid, offset: usize) -> Result<u8, MemoryError> {
        let physical = self.translate(pid, offset, false)?;
        Ok(self.physical.byte(physical))
    }

    pub fn write(&mut self, pid: Pid, offset: usize, value: u8) -> Result<(), MemoryError> {
        let physical = self.translate(pid, offset, true)?;
        self.physical.set_byte(physical, value);
        Ok(())
    }

    pub fn read_u32(&mut self, pid: Pid, offset: usize) -> Result<u32, MemoryError> {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read(pid, offset + i)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32(&mut self, pid: Pid, offset: usize, value: u32) -> Result<(), MemoryError> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write(pid, offset + i, byte)?;
        }
        Ok(())
    }

    pub fn set_range(
        &mut self,
        pid: Pid,
        offset: usize,
        len: usize,
        fill: u8,
    ) -> Result<(), MemoryError> {
        for i in 0..len {
            self.write(pid, offset + i, fill)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Translation and paging
    // -------------------------------------------------------------------

    /// Translate a process-virtual offset to a physical one, faulting the
    /// page in if needed and marking access metadata.
    fn translate(
        &mut self,
        pid: Pid,
        offset: usize,
        will_write: bool,
    ) -> Result<usize, MemoryError> {
        let page_size = self.page_size;
        let (index, base) = self
            .pages
            .iter()
            .enumerate()
            .find_map(|(i, p)| p.mapping_base(pid, offset, page_size).map(|b| (i, b)))
            .ok_or(MemoryError::Unmapped {
                pid,
                address: offset,
            })?;

        if !self.pages[index].valid {
            self.resolve_fault(index)?;
        }

        let now = self.clock.tick();
        let page = &mut self.pages[index];
        page.dirty |= will_write;
        page.access_count += 1;
        page.last_accessed = now;
        Ok(page.physical_address + (offset - base))
    }

    /// Give the faulting page a frame (free, or stolen from the
    /// least-recently-used valid page) and swap its contents in.
    fn resolve_fault(&mut self, index: usize) -> Result<(), MemoryError> {
        let frame = match self.free_frames.iter().position(|f| *f) {
            Some(frame) => {
                self.free_frames[frame] = false;
                frame
            }
            None => self.evict_victim(index)?,
        };
        self.pages[index].physical_address = frame * self.page_size;
        self.swap_in(index)?;
        let page = &mut self.pages[index];
        page.page_faults += 1;
        page.valid = true;
        trace!(
            "page fault: page {} now in frame {frame}",
            page.page_number()
        );
        Ok(())
    }

    /// Pick the valid page with the oldest access (ties to the lowest
    /// page number), write it out if dirty, and return its freed frame.
    fn evict_victim(&mut self, faulting: usize) -> Result<usize, MemoryError> {
        let victim = self
            .pages
            .iter()
            .enumerate()
            .filter(|(i, p)| p.valid && *i != faulting)
            .min_by_key(|(i, p)| (p.last_accessed, *i))
            .map(|(i, _)| i)
            .expect("no valid page to evict; physical memory smaller than one frame");

        if self.pages[victim].dirty {
            self.swap_out(victim)?;
        }
        let page = &mut self.pages[victim];
        page.valid = false;
        let frame = page.physical_address / self.page_size;
        trace!("evicted page {} from frame {frame}", page.page_number());
        Ok(frame)
    }

    fn swap_out(&self, index: usize) -> Result<(), MemoryError> {
        let page = &self.pages[index];
        let bytes = self.physical.slice(page.physical_address, self.page_size);
        self.swap
            .write(
                page.page_number(),
                page.virtual_address(),
                bytes,
                page.access_count,
                page.last_accessed,
            )
            .map_err(|source| MemoryError::Swap {
                page_number: page.page_number(),
                source,
            })
    }

    /// Fill the page's frame from its swap file, restoring the counters
    /// the file carries, or from zeroes when no file exists. A restored
    /// page is marked dirty so its contents survive the next eviction;
    /// a zero-filled page is clean because zeroes are reproducible.
    fn swap_in(&mut self, index: usize) -> Result<(), MemoryError> {
        let (number, virtual_address, physical_address) = {
            let page = &self.pages[index];
            (
                page.page_number(),
                page.virtual_address(),
                page.physical_address,
            )
        };
        let record = self
            .swap
            .take(number, virtual_address, self.page_size)
            .map_err(|source| MemoryError::Swap {
                page_number: number,
                source,
            })?;
        let page_size = self.page_size;
        match record {
            Some(record) => {
                self.physical.copy_in(physical_address, &record.bytes);
                let page = &mut self.pages[index];
                page.access_count = record.access_count;
                page.last_accessed = record.last_accessed;
                page.dirty = true;
            }
            None => {
                self.physical.fill(physical_address, page_size, 0);
                self.pages[index].dirty = false;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Process address spaces
    // -------------------------------------------------------------------

    /// Assign enough free pages to cover `bytes` of address space for
    /// `pid`, with consecutive process-virtual indices.
    pub fn map_process(&mut self, bytes: usize, pid: Pid) -> Result<(), OutOfMemoryError> {
        let page_size = self.page_size;
        let requested_pages = round_to_page(bytes, page_size) / page_size;
        let free: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_assignable())
            .map(|(i, _)| i)
            .collect();
        if free.len() < requested_pages {
            return Err(OutOfMemoryError {
                pid,
                requested_pages,
                available: free.len(),
            });
        }
        for (nth, &index) in free.iter().take(requested_pages).enumerate() {
            let page = &mut self.pages[index];
            page.owner_pid = pid;
            page.process_virtual_index = nth * page_size;
        }
        debug!("mapped {requested_pages} pages to pid {pid}");
        Ok(())
    }

    /// Map a shared region into `pid`'s address space, one page past its
    /// current maximum mapped index. Returns the process-virtual address
    /// the region starts at, or `None` for a region that was never
    /// reserved.
    pub fn map_shared_to_process(&mut self, region_id: u32, pid: Pid) -> Option<usize> {
        let region: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.shared_region_id == region_id)
            .map(|(i, _)| i)
            .collect();
        if region.is_empty() {
            return None;
        }

        let page_size = self.page_size;
        let mut start = 0;
        for page in &self.pages {
            if page.owner_pid == pid {
                start = start.max(page.process_virtual_index + page_size);
            }
            for owner in &page.shared_owners {
                if owner.pid == pid {
                    start = start.max(owner.process_virtual_index + page_size);
                }
            }
        }

        for (nth, &index) in region.iter().enumerate() {
            self.pages[index].shared_owners.push(SharedOwner {
                pid,
                process_virtual_index: start + nth * page_size,
            });
        }
        debug!(
            "mapped shared region {region_id} into pid {pid} at {start:#x} ({} pages)",
            region.len()
        );
        Some(start)
    }

    /// Tear down a process's address space: zero its resident pages,
    /// return them to the OS, and detach it from every shared page.
    pub fn release_process(&mut self, pid: Pid) {
        let page_size = self.page_size;
        for index in 0..self.pages.len() {
            if self.pages[index].owner_pid == pid {
                if self.pages[index].valid {
                    let physical = self.pages[index].physical_address;
                    self.physical.fill(physical, page_size, 0);
                } else if let Err(e) = self
                    .swap
                    .remove(self.pages[index].page_number(), self.pages[index].virtual_address())
                {
                    warn!("failed to drop swap file while releasing pid {pid}: {e}");
                }
                self.pages[index].reset();
            }
            self.pages[index].shared_owners.retain(|o| o.pid != pid);
        }
        debug!("released address space of pid {pid}");
    }

    /// Indices of the pages backing `pid`'s address space in
    /// `[start, end)`, in ascending process-virtual order.
    pub fn pages_in_range(&self, pid: Pid, start: usize, end: usize) -> Vec<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.owner_pid == pid
                    && p.process_virtual_index >= start
                    && p.process_virtual_index < end
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn page_faults_for_process(&self, pid: Pid) -> u64 {
        self.pages
            .iter()
            .filter(|p| p.owner_pid == pid)
            .map(|p| p.page_faults)
            .sum()
    }

    // -------------------------------------------------------------------
    // Heap
    // -------------------------------------------------------------------

    /// Claim a contiguous run of free heap pages covering `bytes`.
    /// Returns the process-virtual address of the run, or `None` when no
    /// run is long enough. A zero-byte request claims nothing and yields
    /// address 0.
    pub fn heap_alloc(&mut self, process: &Process, bytes: usize) -> Option<usize> {
        let pages_needed = bytes.div_ceil(self.page_size);
        if pages_needed == 0 {
            return Some(0);
        }
        let heap = process.heap_pages();
        let run = heap
            .windows(pages_needed)
            .find(|window| {
                window
                    .iter()
                    .all(|&index| self.pages[index].heap_allocation_start == 0)
            })?
            .to_vec();

        let start = self.pages[run[0]].process_virtual_index;
        for index in run {
            self.pages[index].heap_allocation_start = start;
        }
        debug!(
            "pid {}: heap alloc of {bytes} bytes at {start:#x} ({pages_needed} pages)",
            process.id()
        );
        Some(start)
    }

    /// Release every heap page claimed at `start` and zero its contents.
    /// An address that was never allocated matches no pages. Returns how
    /// many pages were freed.
    pub fn heap_free(&mut self, process: &Process, start: usize) -> usize {
        if start == 0 {
            return 0;
        }
        let page_size = self.page_size;
        let mut freed = 0;
        for &index in process.heap_pages() {
            if self.pages[index].heap_allocation_start != start {
                continue;
            }
            let page = &mut self.pages[index];
            page.heap_allocation_start = 0;
            page.dirty = false;
            if page.valid {
                let physical = page.physical_address;
                self.physical.fill(physical, page_size, 0);
            } else {
                let (number, address) = (page.page_number(), page.virtual_address());
                if let Err(e) = self.swap.remove(number, address) {
                    warn!("failed to drop swap file for freed heap page {number}: {e}");
                }
            }
            freed += 1;
        }
        debug!(
            "pid {}: heap free at {start:#x} released {freed} pages",
            process.id()
        );
        freed
    }
}
