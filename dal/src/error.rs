// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A malformed request that will never succeed on retry.
    InvalidArgs,
    /// The host physical-page allocator is exhausted.
    NoMemory,
    /// The referenced object was never handed out by this crate.
    NotFound,
    /// The referenced interrupt line has no live registration.
    NotRegistered,
    /// The interrupt line already has a primary handler installed.
    AlreadyRegistered,
    /// A fixed capacity (such as the interrupt slot table) is exhausted.
    NotEnoughResources,
    /// The device cannot honor the request, typically permanently.
    Unsupported,
}
