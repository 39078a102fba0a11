// SPDX-License-Identifier: MPL-2.0

//! The sub-pool allocator slicing one DMA region into zones.
//!
//! A pool divides its region into a descriptor zone (the first
//! [`DESC_ZONE_MAX`] bytes at most) and a data zone (the remainder), next
//! to a legacy combined zone spanning the whole region. Each zone is an
//! address-ordered list of allocated intervals bounded by two zero-size
//! sentinels; the gaps between consecutive intervals are the only
//! allocatable space, claimed first-fit. The lists are arena-backed with
//! index links, so a node can never dangle.

use align_ext::AlignExt;
use spin::Mutex;

use super::{Vaddr, CACHE_LINE_SIZE};
use crate::prelude::*;

/// The capacity cap of the descriptor zone in bytes.
pub const DESC_ZONE_MAX: usize = 256 * 1024;

/// The zone an interval belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ZoneKind {
    /// The legacy combined zone spanning the whole pool.
    Unclassified,
    /// The descriptor zone.
    Descriptor,
    /// The data zone.
    Data,
}

const NIL: usize = usize::MAX;

#[derive(Clone, Copy, Debug)]
struct IntervalNode {
    addr: Vaddr,
    size: usize,
    next: usize,
}

/// One address-ordered interval list over `[base, limit)`.
///
/// Index 0 is the head sentinel at `base`, index 1 the tail sentinel at
/// `limit`; both are zero-size and never unlinked.
#[derive(Debug)]
struct IntervalList {
    kind: ZoneKind,
    nodes: Vec<IntervalNode>,
    free_slots: Vec<usize>,
}

const HEAD: usize = 0;
const TAIL: usize = 1;

impl IntervalList {
    fn new(kind: ZoneKind, base: Vaddr, limit: Vaddr) -> Self {
        let nodes = alloc::vec![
            IntervalNode {
                addr: base,
                size: 0,
                next: TAIL,
            },
            IntervalNode {
                addr: limit,
                size: 0,
                next: NIL,
            },
        ];
        Self {
            kind,
            nodes,
            free_slots: Vec::new(),
        }
    }

    /// First-fit search over the inter-node gaps.
    fn alloc(&mut self, size: usize) -> Option<Vaddr> {
        let mut prev = HEAD;
        loop {
            let cur = self.nodes[prev].next;
            if cur == NIL {
                return None;
            }
            let gap_start = self.nodes[prev].addr + self.nodes[prev].size;
            if self.nodes[cur].addr - gap_start >= size {
                let slot = self.insert_slot(IntervalNode {
                    addr: gap_start,
                    size,
                    next: cur,
                });
                self.nodes[prev].next = slot;
                return Some(gap_start);
            }
            prev = cur;
        }
    }

    /// Unlinks the interval starting at `addr`. Unknown addresses are
    /// ignored.
    fn free(&mut self, addr: Vaddr) {
        let mut prev = HEAD;
        loop {
            let cur = self.nodes[prev].next;
            if cur == NIL || cur == TAIL {
                return;
            }
            if self.nodes[cur].addr == addr {
                self.nodes[prev].next = self.nodes[cur].next;
                self.nodes[cur].next = NIL;
                self.free_slots.push(cur);
                return;
            }
            prev = cur;
        }
    }

    fn usage(&self) -> usize {
        let mut total = 0;
        let mut cur = self.nodes[HEAD].next;
        while cur != NIL && cur != TAIL {
            total += self.nodes[cur].size;
            cur = self.nodes[cur].next;
        }
        total
    }

    /// Drops every interval and collapses the span, leaving the list
    /// unusable for further allocation.
    fn clear(&mut self) {
        self.nodes.truncate(2);
        self.nodes[HEAD].next = TAIL;
        self.nodes[HEAD].addr = self.nodes[TAIL].addr;
        self.free_slots.clear();
    }

    fn dump(&self) {
        let mut cur = self.nodes[HEAD].next;
        while cur != NIL && cur != TAIL {
            let node = &self.nodes[cur];
            log::debug!(
                "mpool {:?}: [{:#x}, {:#x}) {} bytes",
                self.kind,
                node.addr,
                node.addr + node.size,
                node.size
            );
            cur = node.next;
        }
    }

    fn insert_slot(&mut self, node: IntervalNode) -> usize {
        match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }
}

#[derive(Debug)]
struct MpoolInner {
    combined: IntervalList,
    descriptor: IntervalList,
    data: IntervalList,
}

impl MpoolInner {
    fn zone_mut(&mut self, kind: ZoneKind) -> &mut IntervalList {
        match kind {
            ZoneKind::Unclassified => &mut self.combined,
            ZoneKind::Descriptor => &mut self.descriptor,
            ZoneKind::Data => &mut self.data,
        }
    }
}

/// A sub-pool allocator over one DMA region.
#[derive(Debug)]
pub struct Mpool {
    inner: Mutex<MpoolInner>,
}

impl Mpool {
    /// Builds the three zone lists over `[base, base + size)`.
    ///
    /// The base is cache-line-aligned upward and the size truncated
    /// downward to a cache-line multiple; any sub-cache-line remainder is
    /// dropped. Fails with [`Error::InvalidArgs`] if nothing remains.
    pub fn create(base: Vaddr, size: usize) -> Result<Self> {
        let aligned_base = base.align_up(CACHE_LINE_SIZE);
        let end = base + size;
        let aligned_size = end.saturating_sub(aligned_base).align_down(CACHE_LINE_SIZE);
        if aligned_size == 0 {
            return Err(Error::InvalidArgs);
        }
        let desc_len = aligned_size.min(DESC_ZONE_MAX);
        let inner = MpoolInner {
            combined: IntervalList::new(
                ZoneKind::Unclassified,
                aligned_base,
                aligned_base + aligned_size,
            ),
            descriptor: IntervalList::new(
                ZoneKind::Descriptor,
                aligned_base,
                aligned_base + desc_len,
            ),
            data: IntervalList::new(
                ZoneKind::Data,
                aligned_base + desc_len,
                aligned_base + aligned_size,
            ),
        };
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Claims the first gap of the zone wide enough for `size` bytes,
    /// rounded up to a cache-line multiple.
    ///
    /// Returns `None` on exhaustion; callers must treat `None` as
    /// failure, never as address zero.
    pub fn alloc(&self, zone: ZoneKind, size: usize) -> Option<Vaddr> {
        if size == 0 {
            return None;
        }
        let size = size.align_up(CACHE_LINE_SIZE);
        self.inner.lock().zone_mut(zone).alloc(size)
    }

    /// Releases the interval of the zone starting at `addr`.
    ///
    /// Freeing an address that was never allocated, or was already freed,
    /// is a silent no-op and leaves the list intact.
    pub fn free(&self, zone: ZoneKind, addr: Vaddr) {
        self.inner.lock().zone_mut(zone).free(addr);
    }

    /// Sums the allocated bytes of one zone, or of all zones.
    pub fn usage(&self, zone: Option<ZoneKind>) -> usize {
        let inner = self.inner.lock();
        match zone {
            Some(ZoneKind::Unclassified) => inner.combined.usage(),
            Some(ZoneKind::Descriptor) => inner.descriptor.usage(),
            Some(ZoneKind::Data) => inner.data.usage(),
            None => inner.combined.usage() + inner.descriptor.usage() + inner.data.usage(),
        }
    }

    /// Releases every interval in all three zones. The pool allocates
    /// nothing afterwards.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        inner.combined.clear();
        inner.descriptor.clear();
        inner.data.clear();
    }

    /// Logs every live interval in address order.
    pub fn debug_dump(&self) {
        let inner = self.inner.lock();
        inner.combined.dump();
        inner.descriptor.dump();
        inner.data.dump();
    }
}
