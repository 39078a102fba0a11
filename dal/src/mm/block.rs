// SPDX-License-Identifier: MPL-2.0

//! The pool of raw physical blocks backing a [`Segment`].
//!
//! [`Segment`]: super::Segment

use align_ext::AlignExt;

use super::{Paddr, PAGE_SIZE};
use crate::{hal::HostMem, prelude::*};

/// The number of blocks added per growth step while a segment is still
/// short of its requested size.
pub(super) const GROW_BATCH: usize = 8;

/// The classification of a block during and after the contiguous-run
/// search.
///
/// Tags live next to the block address instead of being encoded in its
/// low bits, so no alignment of the address is assumed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BlockTag {
    /// Not part of any run.
    Untagged,
    /// Returned to the host allocator.
    Discarded,
    /// Part of the run currently being extended.
    Candidate,
    /// Part of the largest run found so far.
    MatchedLargest,
}

/// One physically contiguous unit of memory obtained from the host page
/// allocator. Blocks are never split.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Block {
    pub(crate) paddr: Paddr,
    pub(crate) size: usize,
    pub(crate) tag: BlockTag,
}

/// A dynamically grown pool of equally sized blocks.
#[derive(Debug)]
pub(crate) struct BlockPool {
    block_size: usize,
    block_order: u32,
    max_blocks: usize,
    blocks: Vec<Block>,
}

impl BlockPool {
    /// Creates an empty pool whose block size is derived from the
    /// caller's transfer-unit hint.
    ///
    /// The hint is rounded up to a whole number of pages and then widened
    /// to the power-of-two page batch the host allocator actually grants,
    /// so that the adjacency stride of the run search equals the grant
    /// size. The pool refuses to grow beyond `total_ram / block_size`
    /// blocks.
    pub(super) fn new(mem: &dyn HostMem, block_hint: usize) -> Result<Self> {
        if block_hint == 0 {
            return Err(Error::InvalidArgs);
        }
        let pages = block_hint.align_up(PAGE_SIZE) / PAGE_SIZE;
        let block_order = pages.next_power_of_two().trailing_zeros();
        let block_size = PAGE_SIZE << block_order;
        let max_blocks = mem.total_ram() / block_size;
        Ok(Self {
            block_size,
            block_order,
            max_blocks,
            blocks: Vec::new(),
        })
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn block_order(&self) -> u32 {
        self.block_order
    }

    pub(crate) fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// Obtains up to `count` more blocks from the host allocator, bounded
    /// by the pool ceiling. Returns the number actually obtained.
    pub(super) fn fill(&mut self, mem: &dyn HostMem, count: usize) -> usize {
        let want = count.min(self.max_blocks.saturating_sub(self.blocks.len()));
        let mut got = 0;
        for _ in 0..want {
            let Some(paddr) = mem.alloc_pages(self.block_order) else {
                break;
            };
            self.blocks.push(Block {
                paddr,
                size: self.block_size,
                tag: BlockTag::Untagged,
            });
            got += 1;
        }
        if got < want {
            log::debug!(
                "block pool: host allocator exhausted after {}/{} blocks",
                got,
                want
            );
        }
        got
    }

    /// Grows the pool by one batch. Returns the number of blocks obtained.
    pub(super) fn grow(&mut self, mem: &dyn HostMem) -> usize {
        self.fill(mem, GROW_BATCH)
    }

    /// Releases every block that did not make it into the winning run and
    /// retains the winners.
    pub(super) fn release_losers(&mut self, mem: &dyn HostMem) {
        let order = self.block_order;
        for block in &mut self.blocks {
            if block.tag != BlockTag::MatchedLargest {
                block.tag = BlockTag::Discarded;
                mem.free_pages(block.paddr, order);
            }
        }
        self.blocks.retain(|b| b.tag == BlockTag::MatchedLargest);
    }

    /// Releases every remaining block. Only meaningful once the owning
    /// segment is being torn down.
    pub(super) fn release_all(&mut self, mem: &dyn HostMem) {
        let order = self.block_order;
        for block in self.blocks.drain(..) {
            mem.free_pages(block.paddr, order);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockHost;

    #[test]
    fn block_size_is_widened_to_the_page_grant() {
        let mem = MockHost::new(64);
        // 3 pages round up to a 4-page (order-2) grant.
        let pool = BlockPool::new(&mem, 3 * PAGE_SIZE).unwrap();
        assert_eq!(pool.block_order(), 2);
        assert_eq!(pool.block_size(), 4 * PAGE_SIZE);

        let pool = BlockPool::new(&mem, 1).unwrap();
        assert_eq!(pool.block_order(), 0);
        assert_eq!(pool.block_size(), PAGE_SIZE);
    }

    #[test]
    fn pool_growth_is_bounded_by_host_ram() {
        let mem = MockHost::new(16);
        let mut pool = BlockPool::new(&mem, PAGE_SIZE).unwrap();
        assert_eq!(pool.max_blocks(), 16);
        assert_eq!(pool.fill(&mem, 1000), 16);
        assert_eq!(pool.grow(&mem), 0);
    }

    #[test]
    fn zero_hint_is_rejected() {
        let mem = MockHost::new(16);
        assert_eq!(BlockPool::new(&mem, 0).unwrap_err(), Error::InvalidArgs);
    }
}
