// SPDX-License-Identifier: MPL-2.0

//! Assembly of physically contiguous segments out of independently
//! allocated blocks.

use super::{
    block::{Block, BlockPool, BlockTag},
    Paddr,
};
use crate::{hal::HostMem, prelude::*};

/// The largest contiguous run of address-adjacent blocks discovered for
/// one allocation request.
///
/// A segment owns its blocks. It is torn down with [`Segment::free`],
/// never implicitly: dropping a segment without freeing it leaks the
/// reserved pages by design.
#[derive(Debug)]
pub(crate) struct Segment {
    requested_size: usize,
    current_size: usize,
    begin_paddr: Paddr,
    end_paddr: Paddr,
    pool: BlockPool,
}

impl Segment {
    /// Assembles a segment of at least `requested_size` bytes if the host
    /// allows, growing the block pool batch by batch until the largest
    /// run is big enough or no more blocks can be obtained.
    ///
    /// A short assembly is not an error: the segment is returned with
    /// `current_size < requested_size` and a warning is logged. Callers
    /// that cannot tolerate a short allocation must check
    /// [`Self::current_size`].
    pub(crate) fn allocate(
        mem: &dyn HostMem,
        requested_size: usize,
        block_hint: usize,
    ) -> Result<Self> {
        if requested_size == 0 {
            return Err(Error::InvalidArgs);
        }
        let mut pool = BlockPool::new(mem, block_hint)?;
        let block_size = pool.block_size();

        let want = requested_size.div_ceil(block_size);
        if pool.fill(mem, want) == 0 {
            return Err(Error::NoMemory);
        }

        let (mut begin, mut size) = largest_run(pool.blocks_mut(), block_size);
        while size < requested_size {
            if pool.grow(mem) == 0 {
                break;
            }
            (begin, size) = largest_run(pool.blocks_mut(), block_size);
        }

        pool.release_losers(mem);
        let order = pool.block_order();
        for block in pool.blocks_mut() {
            mem.reserve_pages(block.paddr, order);
        }

        let segment = Self {
            requested_size,
            current_size: size,
            begin_paddr: begin,
            end_paddr: begin + size,
            pool,
        };
        if segment.is_partial() {
            log::warn!(
                "dma segment: partial allocation, assembled {} of {} bytes ({} blocks kept, ceiling {})",
                size,
                requested_size,
                segment.pool.len(),
                segment.pool.max_blocks()
            );
        }
        Ok(segment)
    }

    /// Unreserves and frees every block of the segment.
    pub(crate) fn free(mut self, mem: &dyn HostMem) {
        let order = self.pool.block_order();
        for block in self.pool.blocks_mut() {
            mem.unreserve_pages(block.paddr, order);
        }
        self.pool.release_all(mem);
    }

    pub(crate) fn requested_size(&self) -> usize {
        self.requested_size
    }

    pub(crate) fn current_size(&self) -> usize {
        self.current_size
    }

    pub(crate) fn begin_paddr(&self) -> Paddr {
        self.begin_paddr
    }

    pub(crate) fn end_paddr(&self) -> Paddr {
        self.end_paddr
    }

    pub(crate) fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    pub(crate) fn is_partial(&self) -> bool {
        self.current_size < self.requested_size
    }
}

/// Finds the largest run of address-adjacent blocks.
///
/// Every untagged block seeds a candidate run which is extended in both
/// directions by scanning the remaining untagged blocks for one ending
/// exactly at the run's begin or starting exactly at its end. A candidate
/// that beats the best run so far demotes the old winners back to
/// untagged and is promoted to [`BlockTag::MatchedLargest`]; ties keep
/// the earliest-found run. Quadratic in the block count, which stays
/// small (a few hundred at most).
fn largest_run(blocks: &mut [Block], block_size: usize) -> (Paddr, usize) {
    for block in blocks.iter_mut() {
        block.tag = BlockTag::Untagged;
    }

    let mut best_begin = 0;
    let mut best_size = 0;
    for seed in 0..blocks.len() {
        if blocks[seed].tag != BlockTag::Untagged {
            continue;
        }
        blocks[seed].tag = BlockTag::Candidate;
        let mut run_begin = blocks[seed].paddr;
        let mut run_end = run_begin + block_size;

        let mut extended = true;
        while extended {
            extended = false;
            for i in 0..blocks.len() {
                if blocks[i].tag != BlockTag::Untagged {
                    continue;
                }
                if run_begin >= block_size && blocks[i].paddr == run_begin - block_size {
                    blocks[i].tag = BlockTag::Candidate;
                    run_begin -= block_size;
                    extended = true;
                } else if blocks[i].paddr == run_end {
                    blocks[i].tag = BlockTag::Candidate;
                    run_end += block_size;
                    extended = true;
                }
            }
        }

        let run_size = run_end - run_begin;
        if run_size > best_size {
            for block in blocks.iter_mut() {
                match block.tag {
                    BlockTag::MatchedLargest => block.tag = BlockTag::Untagged,
                    BlockTag::Candidate => block.tag = BlockTag::MatchedLargest,
                    _ => {}
                }
            }
            best_begin = run_begin;
            best_size = run_size;
        } else {
            for block in blocks.iter_mut() {
                if block.tag == BlockTag::Candidate {
                    block.tag = BlockTag::Untagged;
                }
            }
        }
    }
    (best_begin, best_size)
}
