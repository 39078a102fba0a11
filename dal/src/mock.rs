// SPDX-License-Identifier: MPL-2.0

//! Test doubles for the host abstraction layer.
//!
//! `MockHost` models host physical memory as a leaked arena addressed by
//! frame number, so "physical" pages handed to the layer are real,
//! writable memory and fragmentation patterns can be dialed in per test.

use alloc::collections::{BTreeMap, BTreeSet};
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use spin::Mutex;

use crate::{
    hal::{Clock, HostMem, IrqChip, IrqDispatchFn, MsiConfig},
    mm::PAGE_SIZE,
    prelude::*,
};

/// The fake physical base all mock frames sit above.
const PHYS_BASE: Paddr = 0x1000_0000;

/// Frame indices free in a host where pages are free in adjacent pairs
/// separated by allocated pairs: 0, 1, 4, 5, 8, 9, ...
pub(crate) fn pairs_pattern(num_frames: usize) -> Vec<usize> {
    (0..num_frames).filter(|i| i % 4 < 2).collect()
}

struct FrameState {
    free: BTreeSet<usize>,
    allocated: BTreeSet<usize>,
    reserved: BTreeSet<usize>,
}

/// A mock host backing `num_frames` fake physical frames with heap
/// memory.
pub(crate) struct MockHost {
    arena_base: Vaddr,
    num_frames: usize,
    state: Mutex<FrameState>,
}

impl MockHost {
    /// A host whose frames are all free.
    pub(crate) fn new(num_frames: usize) -> Self {
        Self::with_free_frames(num_frames, &(0..num_frames).collect::<Vec<_>>())
    }

    /// A host reporting `num_frames` frames of RAM of which only `free`
    /// are actually allocatable.
    pub(crate) fn with_free_frames(num_frames: usize, free: &[usize]) -> Self {
        let arena = alloc::vec![0u8; num_frames * PAGE_SIZE].leak();
        Self {
            arena_base: arena.as_mut_ptr() as Vaddr,
            num_frames,
            state: Mutex::new(FrameState {
                free: free.iter().copied().collect(),
                allocated: BTreeSet::new(),
                reserved: BTreeSet::new(),
            }),
        }
    }

    fn frame_of(&self, paddr: Paddr) -> usize {
        (paddr - PHYS_BASE) / PAGE_SIZE
    }

    /// Frames currently held by the layer under test.
    pub(crate) fn outstanding_pages(&self) -> usize {
        self.state.lock().allocated.len()
    }

    /// Frames currently pinned as non-reclaimable.
    pub(crate) fn reserved_pages(&self) -> usize {
        self.state.lock().reserved.len()
    }
}

impl HostMem for MockHost {
    fn alloc_pages(&self, order: u32) -> Option<Paddr> {
        let group = 1usize << order;
        let mut state = self.state.lock();
        let start = (0..self.num_frames).step_by(group).find(|&start| {
            start + group <= self.num_frames
                && (start..start + group).all(|f| state.free.contains(&f))
        })?;
        for frame in start..start + group {
            state.free.remove(&frame);
            state.allocated.insert(frame);
        }
        Some(PHYS_BASE + start * PAGE_SIZE)
    }

    fn free_pages(&self, paddr: Paddr, order: u32) {
        let start = self.frame_of(paddr);
        let mut state = self.state.lock();
        for frame in start..start + (1 << order) {
            assert!(
                state.allocated.remove(&frame),
                "freeing frame {} that was not allocated",
                frame
            );
            assert!(
                !state.reserved.contains(&frame),
                "freeing frame {} while still reserved",
                frame
            );
            state.free.insert(frame);
        }
    }

    fn reserve_pages(&self, paddr: Paddr, order: u32) {
        let start = self.frame_of(paddr);
        let mut state = self.state.lock();
        for frame in start..start + (1 << order) {
            assert!(state.allocated.contains(&frame));
            state.reserved.insert(frame);
        }
    }

    fn unreserve_pages(&self, paddr: Paddr, order: u32) {
        let start = self.frame_of(paddr);
        let mut state = self.state.lock();
        for frame in start..start + (1 << order) {
            state.reserved.remove(&frame);
        }
    }

    fn total_ram(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    fn map_uncached(&self, paddr: Paddr, _len: usize) -> Vaddr {
        self.arena_base + (paddr - PHYS_BASE)
    }

    fn unmap(&self, _vaddr: Vaddr, _len: usize) {}
}

/// A mock interrupt controller that records shim installs and lets tests
/// fire lines.
///
/// Delivery through [`Self::fire`] is deliberately not gated on the mask
/// state, so tests can simulate the trigger storms the dispatch shim has
/// to coalesce.
pub(crate) struct MockChip {
    shims: Mutex<BTreeMap<u32, Arc<IrqDispatchFn>>>,
    masked: Mutex<BTreeSet<u32>>,
    installs: AtomicUsize,
    removals: AtomicUsize,
}

impl MockChip {
    pub(crate) fn new() -> Self {
        Self {
            shims: Mutex::new(BTreeMap::new()),
            masked: Mutex::new(BTreeSet::new()),
            installs: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
        }
    }

    /// Delivers one physical trigger on `irq`.
    pub(crate) fn fire(&self, irq: u32) {
        let shim = self.shims.lock().get(&irq).cloned();
        if let Some(shim) = shim {
            shim();
        }
    }

    pub(crate) fn installs(&self) -> usize {
        self.installs.load(Ordering::Relaxed)
    }

    pub(crate) fn removals(&self) -> usize {
        self.removals.load(Ordering::Relaxed)
    }

    pub(crate) fn is_masked(&self, irq: u32) -> bool {
        self.masked.lock().contains(&irq)
    }
}

impl IrqChip for MockChip {
    fn install(&self, irq: u32, shim: Arc<IrqDispatchFn>) -> Result<()> {
        self.shims.lock().insert(irq, shim);
        self.installs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, irq: u32) {
        self.shims.lock().remove(&irq);
        self.masked.lock().remove(&irq);
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    fn mask(&self, irq: u32) {
        self.masked.lock().insert(irq);
    }

    fn unmask(&self, irq: u32) {
        self.masked.lock().remove(&irq);
    }
}

/// A mock MSI capability honoring a fixed set of vector counts.
pub(crate) struct MockMsi {
    supported: Vec<u32>,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

const MSI_BASE_VECTOR: u32 = 0x20;

impl MockMsi {
    pub(crate) fn new(supported: &[u32]) -> Self {
        Self {
            supported: supported.to_vec(),
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
        }
    }

    pub(crate) fn enables(&self) -> usize {
        self.enables.load(Ordering::Relaxed)
    }

    pub(crate) fn disables(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

impl MsiConfig for MockMsi {
    fn enable(&self, count: u32) -> Result<u32> {
        if !self.supported.contains(&count) {
            return Err(Error::Unsupported);
        }
        self.enables.fetch_add(1, Ordering::Relaxed);
        Ok(MSI_BASE_VECTOR)
    }

    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::Relaxed);
    }
}

/// A clock backed by the std monotonic clock.
pub(crate) struct MockClock {
    origin: std::time::Instant,
}

impl MockClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Clock for MockClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}
