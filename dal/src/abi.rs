// SPDX-License-Identifier: MPL-2.0

//! Plain-old-data descriptors for the control-plane boundary.
//!
//! Callers of the subsystem include 32-bit user-space tooling addressing
//! 64-bit physical memory, so physical bases cross the boundary as
//! separate low/high halves. The structs are byte-transmutable so they
//! can be copied to and from caller buffers verbatim.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{irq::msi::MsiInfo, mm::DmaRegion};

/// The wire form of one DMA region.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DmaRegionDesc {
    /// The uncached virtual base.
    pub vaddr: u64,
    /// The assembled size in bytes.
    pub size: u64,
    /// The size originally requested in bytes.
    pub requested_size: u64,
    /// Bits 31:0 of the physical base.
    pub paddr_lo: u32,
    /// Bits 63:32 of the physical base.
    pub paddr_hi: u32,
}

impl DmaRegionDesc {
    /// Reassembles the split physical base.
    pub fn paddr(&self) -> u64 {
        (u64::from(self.paddr_hi) << 32) | u64::from(self.paddr_lo)
    }
}

impl From<DmaRegion> for DmaRegionDesc {
    fn from(region: DmaRegion) -> Self {
        let paddr = region.paddr() as u64;
        Self {
            vaddr: region.vaddr() as u64,
            size: region.size() as u64,
            requested_size: region.requested_size() as u64,
            paddr_lo: paddr as u32,
            paddr_hi: (paddr >> 32) as u32,
        }
    }
}

/// The wire form of the MSI vector assignment.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MsiInfoDesc {
    /// The first vector of the active range, 0 when disabled.
    pub base: u32,
    /// The number of vectors, 0 when disabled.
    pub count: u32,
}

impl From<MsiInfo> for MsiInfoDesc {
    fn from(info: MsiInfo) -> Self {
        Self {
            base: info.base,
            count: info.count,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn physical_base_splits_and_rejoins() {
        let desc = DmaRegionDesc {
            vaddr: 0xffff_8000_0000_1000,
            size: 0x40000,
            requested_size: 0x40000,
            paddr_lo: 0x2000_1000,
            paddr_hi: 0x1,
        };
        assert_eq!(desc.paddr(), 0x1_2000_1000);
    }

    #[test]
    fn descriptors_round_trip_through_bytes() {
        let desc = DmaRegionDesc {
            vaddr: 0x1000,
            size: 0x2000,
            requested_size: 0x3000,
            paddr_lo: 0xdead_beef,
            paddr_hi: 0x7,
        };
        let bytes = desc.as_bytes();
        assert_eq!(bytes.len(), core::mem::size_of::<DmaRegionDesc>());
        let back = DmaRegionDesc::read_from_bytes(bytes).unwrap();
        assert_eq!(back, desc);
    }
}
