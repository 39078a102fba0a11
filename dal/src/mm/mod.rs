// SPDX-License-Identifier: MPL-2.0

//! DMA memory management.

mod block;
pub mod dma;
pub mod mpool;
mod segment;

pub use self::{
    dma::DmaRegion,
    mpool::{Mpool, ZoneKind},
};
pub(crate) use self::{dma::RegionList, segment::Segment};

/// Virtual addresses.
pub type Vaddr = usize;

/// Physical addresses.
pub type Paddr = usize;

/// The size of a host page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The size of a cache line in bytes, the allocation quantum of [`Mpool`].
pub const CACHE_LINE_SIZE: usize = 64;
