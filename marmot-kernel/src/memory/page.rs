//! Page-table entries.

use crate::clock::Timestamp;
use crate::process::Pid;

/// A process that has mapped a shared page, and where in its own address
/// space the page appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedOwner {
    pub pid: Pid,
    pub process_virtual_index: usize,
}

/// One entry of the page table.
///
/// Entries are created once per virtual page at boot and never destroyed,
/// only re-assigned. `virtual_address` and `page_number` are fixed for the
/// lifetime of the machine; everything else is paging state.
#[derive(Debug)]
pub struct MemoryPage {
    virtual_address: usize,
    page_number: usize,
    /// True iff this page currently occupies a physical frame.
    pub valid: bool,
    /// Base of the occupied frame. Meaningful only when valid.
    pub physical_address: usize,
    /// `Pid::OS` means the page belongs to the OS / is free.
    pub owner_pid: Pid,
    /// Offset within the owner's address space that this page backs.
    pub process_virtual_index: usize,
    /// 0 when free on the heap, else the process-virtual address of the
    /// allocation that claimed it.
    pub heap_allocation_start: usize,
    pub dirty: bool,
    pub access_count: u64,
    pub last_accessed: Timestamp,
    pub page_faults: u64,
    /// 0 means not shared; otherwise the region this page was reserved for.
    pub shared_region_id: u32,
    pub shared_owners: Vec<SharedOwner>,
}

impl MemoryPage {
    pub fn new(page_number: usize, page_size: usize) -> MemoryPage {
        MemoryPage {
            virtual_address: page_number * page_size,
            page_number,
            valid: false,
            physical_address: 0,
            owner_pid: Pid::OS,
            process_virtual_index: 0,
            heap_allocation_start: 0,
            dirty: false,
            access_count: 0,
            last_accessed: Timestamp::zero(),
            page_faults: 0,
            shared_region_id: 0,
            shared_owners: Vec::new(),
        }
    }

    pub fn virtual_address(&self) -> usize {
        self.virtual_address
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    /// Whether this page backs `offset` in `pid`'s address space, either
    /// as its owner or through a shared mapping. Returns the base of the
    /// process-virtual window it maps.
    pub fn mapping_base(&self, pid: Pid, offset: usize, page_size: usize) -> Option<usize> {
        if self.owner_pid == pid {
            let base = self.process_virtual_index;
            if base <= offset && offset < base + page_size {
                return Some(base);
            }
        }
        self.shared_owners.iter().find_map(|owner| {
            let base = owner.process_virtual_index;
            (owner.pid == pid && base <= offset && offset < base + page_size).then_some(base)
        })
    }

    /// Whether the page can be handed to a process: OS-owned and not part
    /// of a shared region.
    pub fn is_assignable(&self) -> bool {
        self.owner_pid == Pid::OS && self.shared_region_id == 0
    }

    /// Return the page to the OS. Frame residency is untouched; an
    /// invalid page stays invalid and a valid one keeps its frame so the
    /// next owner can reuse it without a fault.
    pub fn reset(&mut self) {
        self.owner_pid = Pid::OS;
        self.process_virtual_index = 0;
        self.heap_allocation_start = 0;
        self.dirty = false;
        self.access_count = 0;
        self.last_accessed = Timestamp::zero();
        self.page_faults = 0;
    }
}
