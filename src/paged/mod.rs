//! Concurrent, append-only paged byte storage.
//!
//! A [`PageAllocator`] hands out exclusive write capability over fixed-size
//! pages to many threads at once. Reserving a slice is one compare-and-swap
//! on the current page's top in the common path; rolling over to a fresh
//! page takes a write lock. Writing inside a granted [`PageSlice`] needs no
//! synchronization at all, because reserved ranges never overlap and a
//! slice never spans two pages. Pages are never reclaimed or rewritten;
//! once the load finishes they freeze into an immutable
//! [`AdjacencyList`](list::AdjacencyList).

pub mod list;
pub mod vlong;

pub use list::{AdjacencyCursor, AdjacencyList, PropertyCursor};

use crate::{
    config::PageBacking,
    error::{Error, Result},
    types::Address,
};
use memmap::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// The byte storage of one page, on the heap or in an anonymous
/// temp-file mapping.
pub enum PageBuf {
    Mem(Box<[u8]>),
    Mmap(MmapMut),
}

impl PageBuf {
    fn new_mem(size: usize) -> Self {
        PageBuf::Mem(vec![0u8; size].into_boxed_slice())
    }

    fn new_mmap(size: usize) -> Result<Self> {
        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;
        Ok(PageBuf::Mmap(unsafe { MmapMut::map_mut(&file)? }))
    }

    pub fn len(&self) -> usize {
        match self {
            PageBuf::Mem(buf) => buf.len(),
            PageBuf::Mmap(mmap) => mmap.len(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            PageBuf::Mem(buf) => buf,
            PageBuf::Mmap(mmap) => mmap,
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            PageBuf::Mem(buf) => buf.as_mut_ptr(),
            PageBuf::Mmap(mmap) => mmap.as_mut_ptr(),
        }
    }
}

/// One fixed-capacity, append-only page.
pub struct Page {
    buf: UnsafeCell<PageBuf>,
    top: AtomicUsize,
    index: usize,
}

// Writers only touch the disjoint ranges reserved for them by
// `PageAllocator::allocate`, so concurrent `write` calls never alias.
unsafe impl Sync for Page {}

impl Page {
    fn new(index: usize, buf: PageBuf) -> Self {
        Self {
            buf: UnsafeCell::new(buf),
            top: AtomicUsize::new(0),
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Copies `bytes` to `offset`.
    ///
    /// Callers must hold the reservation of `[offset, offset + len)` and
    /// stay within it.
    unsafe fn write(&self, offset: usize, bytes: &[u8]) {
        let buf = &mut *self.buf.get();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.as_mut_ptr().add(offset), bytes.len());
    }
}

/// An exclusively owned write capability over `[offset, offset + len)` of
/// one page.
pub struct PageSlice {
    page: Arc<Page>,
    offset: usize,
    len: usize,
    written: usize,
    page_shift: u32,
}

impl PageSlice {
    pub fn page_index(&self) -> usize {
        self.page.index
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The global address of the start of this slice.
    pub fn address(&self) -> Address {
        ((self.page.index as u64) << self.page_shift) | self.offset as u64
    }

    pub fn bytes_written(&self) -> usize {
        self.written
    }

    pub fn remaining(&self) -> usize {
        self.len - self.written
    }

    /// Copies `bytes` into the slice and advances the write cursor.
    pub fn insert(&mut self, bytes: &[u8]) {
        assert!(
            self.written + bytes.len() <= self.len,
            "write of {} bytes overruns slice of {} bytes at {}",
            bytes.len(),
            self.len,
            self.written
        );
        unsafe { self.page.write(self.offset + self.written, bytes) };
        self.written += bytes.len();
    }
}

/// Allocates slices of shared paged storage under concurrency.
pub struct PageAllocator {
    page_size: usize,
    page_shift: u32,
    backing: PageBacking,
    current: RwLock<Arc<Page>>,
    pages: Mutex<Vec<Arc<Page>>>,
}

impl PageAllocator {
    /// `page_size` must be a power of two.
    pub fn new(page_size: usize, backing: PageBacking) -> Result<Self> {
        assert!(
            page_size.is_power_of_two(),
            "page size must be a power of two"
        );
        let first = Arc::new(Page::new(0, new_buf(page_size, backing)?));
        Ok(Self {
            page_size,
            page_shift: page_size.trailing_zeros(),
            backing,
            current: RwLock::new(first.clone()),
            pages: Mutex::new(vec![first]),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reserves `len` bytes of one page and returns the owning slice.
    ///
    /// A request never spans two pages; `len > page_size` is a caller
    /// error and fails with [`Error::SliceTooLarge`].
    pub fn allocate(&self, len: usize) -> Result<PageSlice> {
        if len > self.page_size {
            return Err(Error::SliceTooLarge {
                requested: len,
                page_size: self.page_size,
            });
        }
        loop {
            let page = self.current.read().clone();
            let mut top = page.top.load(Ordering::Relaxed);
            while top + len <= self.page_size {
                match page.top.compare_exchange_weak(
                    top,
                    top + len,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        return Ok(PageSlice {
                            page,
                            offset: top,
                            len,
                            written: 0,
                            page_shift: self.page_shift,
                        })
                    }
                    Err(observed) => top = observed,
                }
            }
            self.roll_over(&page)?;
        }
    }

    /// Installs a fresh current page if `full` is still the current one;
    /// losers of the race simply retry on the winner's page.
    fn roll_over(&self, full: &Arc<Page>) -> Result<()> {
        let mut current = self.current.write();
        if Arc::ptr_eq(&current, full) {
            let mut pages = self.pages.lock();
            let page = Arc::new(Page::new(
                pages.len(),
                new_buf(self.page_size, self.backing)?,
            ));
            pages.push(page.clone());
            *current = page;
        }
        Ok(())
    }

    /// Freezes the allocator into an immutable page list.
    ///
    /// Every granted slice must have been dropped by now.
    pub fn into_list(self) -> AdjacencyList {
        drop(self.current);
        let pages = self
            .pages
            .into_inner()
            .into_iter()
            .map(|page| {
                Arc::try_unwrap(page)
                    .ok()
                    .expect("page still referenced by an outstanding slice")
                    .buf
                    .into_inner()
            })
            .collect();
        AdjacencyList::new(pages, self.page_shift)
    }
}

fn new_buf(page_size: usize, backing: PageBacking) -> Result<PageBuf> {
    match backing {
        PageBacking::Mem => Ok(PageBuf::new_mem(page_size)),
        PageBacking::Mmap => PageBuf::new_mmap(page_size),
        PageBacking::Auto => {
            if available_memory() > 4 * page_size as u64 {
                Ok(PageBuf::new_mem(page_size))
            } else {
                PageBuf::new_mmap(page_size)
            }
        }
    }
}

fn available_memory() -> u64 {
    // mem_info reports kilobytes; assume plenty if the probe fails
    sys_info::mem_info().map_or(u64::MAX, |info| info.avail * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_allocate_and_read_back() {
        let allocator = PageAllocator::new(64, PageBacking::Mem).unwrap();
        let mut slice = allocator.allocate(5).unwrap();
        assert_eq!(slice.page_index(), 0);
        assert_eq!(slice.offset(), 0);
        assert_eq!(slice.address(), 0);
        slice.insert(&[1, 2]);
        slice.insert(&[3, 4, 5]);
        assert_eq!(slice.bytes_written(), 5);
        assert_eq!(slice.remaining(), 0);
        drop(slice);
        let list = allocator.into_list();
        assert_eq!(&list.slice_at(0)[..5], [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_roll_over_to_new_page() {
        let allocator = PageAllocator::new(8, PageBacking::Mem).unwrap();
        let a = allocator.allocate(6).unwrap();
        let b = allocator.allocate(6).unwrap();
        assert_eq!(a.page_index(), 0);
        assert_eq!(b.page_index(), 1);
        assert_eq!(b.address(), 8);
    }

    #[test]
    fn test_oversized_request_fails() {
        let allocator = PageAllocator::new(16, PageBacking::Mem).unwrap();
        match allocator.allocate(17) {
            Err(Error::SliceTooLarge {
                requested,
                page_size,
            }) => {
                assert_eq!((requested, page_size), (17, 16));
            }
            _ => panic!("expected SliceTooLarge"),
        }
    }

    #[test]
    fn test_mmap_backed_pages() {
        let allocator = PageAllocator::new(32, PageBacking::Mmap).unwrap();
        let mut slice = allocator.allocate(4).unwrap();
        slice.insert(&[9, 8, 7, 6]);
        drop(slice);
        let list = allocator.into_list();
        assert_eq!(&list.slice_at(0)[..4], [9, 8, 7, 6]);
    }

    #[test]
    fn test_concurrent_allocations_do_not_overlap() {
        let allocator = PageAllocator::new(1 << 10, PageBacking::Mem).unwrap();
        let addresses: Vec<(Address, usize)> = (0..1000u64)
            .into_par_iter()
            .map(|i| {
                let len = (i % 13 + 1) as usize;
                let mut slice = allocator.allocate(len).unwrap();
                slice.insert(&vec![(i % 251) as u8; len]);
                (slice.address(), len)
            })
            .collect();
        let mut ranges: Vec<(Address, u64)> = addresses
            .iter()
            .map(|&(address, len)| (address, address + len as u64))
            .collect();
        ranges.sort_unstable();
        for window in ranges.windows(2) {
            assert!(window[0].1 <= window[1].0, "overlapping allocations");
        }
    }
}
