// SPDX-License-Identifier: MPL-2.0

//! Caller-visible DMA regions.
//!
//! A region wraps exactly one assembled [`Segment`] behind an uncached,
//! device-visible virtual mapping. Live regions are kept in a list keyed
//! by their virtual base so that `free` can map the pointer back to its
//! segment; the list is scanned linearly, which is fine for a region
//! count bounded by the chip count.

use super::{Segment, Vaddr};
use crate::{hal::HostMem, prelude::*};

/// A caller-visible DMA allocation.
///
/// The allocation may be shorter than requested (see
/// [`Self::is_partial`]); callers that cannot tolerate a short region
/// must check [`Self::size`] before use.
#[derive(Clone, Copy, Debug)]
pub struct DmaRegion {
    vaddr: Vaddr,
    paddr: Paddr,
    size: usize,
    requested_size: usize,
}

impl DmaRegion {
    /// The uncached virtual base of the region.
    pub fn vaddr(&self) -> Vaddr {
        self.vaddr
    }

    /// The physical base of the assembled run.
    pub fn paddr(&self) -> Paddr {
        self.paddr
    }

    /// The assembled size, a multiple of the block size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The size originally requested.
    pub fn requested_size(&self) -> usize {
        self.requested_size
    }

    /// Whether the assembly came up short of the request.
    pub fn is_partial(&self) -> bool {
        self.size < self.requested_size
    }
}

#[derive(Debug)]
struct RegionNode {
    vaddr: Vaddr,
    segment: Segment,
}

/// The per-device list of live DMA regions.
#[derive(Debug, Default)]
pub(crate) struct RegionList {
    regions: Vec<RegionNode>,
}

impl RegionList {
    pub(crate) fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Assembles a segment, maps it for the device and records the
    /// region.
    pub(crate) fn alloc(
        &mut self,
        mem: &dyn HostMem,
        size: usize,
        block_hint: usize,
    ) -> Result<DmaRegion> {
        let segment = Segment::allocate(mem, size, block_hint)?;
        let vaddr = mem.map_uncached(segment.begin_paddr(), segment.current_size());
        log::debug!(
            "dma region: [{:#x}, {:#x}) in {}-byte blocks, mapped at {:#x}",
            segment.begin_paddr(),
            segment.end_paddr(),
            segment.block_size(),
            vaddr
        );
        let region = DmaRegion {
            vaddr,
            paddr: segment.begin_paddr(),
            size: segment.current_size(),
            requested_size: segment.requested_size(),
        };
        self.regions.push(RegionNode { vaddr, segment });
        Ok(region)
    }

    /// Unmaps and frees the region with the given virtual base.
    pub(crate) fn free(&mut self, mem: &dyn HostMem, vaddr: Vaddr) -> Result<()> {
        let pos = self
            .regions
            .iter()
            .position(|node| node.vaddr == vaddr)
            .ok_or(Error::NotFound)?;
        let node = self.regions.swap_remove(pos);
        mem.unmap(node.vaddr, node.segment.current_size());
        node.segment.free(mem);
        Ok(())
    }

    /// Total bytes held by live regions.
    pub(crate) fn usage(&self) -> usize {
        self.regions.iter().map(|n| n.segment.current_size()).sum()
    }

    pub(crate) fn len(&self) -> usize {
        self.regions.len()
    }

    /// Frees every live region, for the device teardown path.
    pub(crate) fn free_all(&mut self, mem: &dyn HostMem) {
        for node in self.regions.drain(..) {
            mem.unmap(node.vaddr, node.segment.current_size());
            node.segment.free(mem);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{mm::PAGE_SIZE, mock::MockHost};

    #[test]
    fn alloc_then_free_round_trips() {
        let mem = MockHost::new(64);
        let mut list = RegionList::new();
        let region = list.alloc(&mem, 8 * PAGE_SIZE, PAGE_SIZE).unwrap();
        assert!(!region.is_partial());
        assert_eq!(region.size(), 8 * PAGE_SIZE);
        assert_eq!(list.usage(), 8 * PAGE_SIZE);

        list.free(&mem, region.vaddr()).unwrap();
        assert_eq!(list.len(), 0);
        assert_eq!(mem.outstanding_pages(), 0);
    }

    #[test]
    fn freeing_an_unknown_base_fails_with_not_found() {
        let mem = MockHost::new(64);
        let mut list = RegionList::new();
        let region = list.alloc(&mem, PAGE_SIZE, PAGE_SIZE).unwrap();
        assert_eq!(
            list.free(&mem, region.vaddr() + 1).unwrap_err(),
            Error::NotFound
        );
        // A second free of a base already released is NotFound as well.
        list.free(&mem, region.vaddr()).unwrap();
        assert_eq!(list.free(&mem, region.vaddr()).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn regions_do_not_overlap() {
        let mem = MockHost::new(64);
        let mut list = RegionList::new();
        let a = list.alloc(&mem, 4 * PAGE_SIZE, PAGE_SIZE).unwrap();
        let b = list.alloc(&mem, 4 * PAGE_SIZE, PAGE_SIZE).unwrap();
        let a_range = a.paddr()..a.paddr() + a.size();
        assert!(!a_range.contains(&b.paddr()));
        assert!(!a_range.contains(&(b.paddr() + b.size() - 1)));
        list.free_all(&mem);
        assert_eq!(mem.outstanding_pages(), 0);
    }
}
