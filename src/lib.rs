//! # persist-mem
//!
//! A self-describing heap you bring your own bytes to. Give it a contiguous
//! region — a byte slice, an `mmap`ed file, a chunk carved out of shared
//! memory — and it turns that region into a free-list-allocated arena whose
//! offset-based [`PPtr<T>`](ptr::PPtr) references survive the region being
//! saved, reloaded, and rebound at a completely different host address.
//!
//! ## Quick start
//!
//! ```rust
//! use persist_mem::Manager;
//!
//! let mut region = vec![0u8; 64 * 1024];
//! let mgr = Manager::global();
//! unsafe {
//!     mgr.create(region.as_mut_ptr(), region.len() as u64).unwrap();
//! }
//!
//! let ptr = mgr.allocate_typed::<u64>(1);
//! unsafe {
//!     *ptr.resolve(mgr) = 42;
//! }
//! mgr.deallocate_typed(ptr);
//! mgr.destroy();
//! ```
//!
//! ## What this crate is not
//!
//! It does not support concurrent access from multiple processes, does not
//! guarantee transactional durability across a crash mid-`save`, does not
//! grow a region once bound, and never compacts live allocations to close
//! fragmentation gaps. See the per-module docs for what it does guarantee.
//!
//! ## Features
//!
//! - `std` (default): enables the image-file I/O in [`mod@image`], which
//!   depends on `std::fs`.
//! - `logging` (default, implies `std`): structured diagnostics via
//!   `tracing` on error paths.

#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
// Cast truncation/sign-loss in offset/size arithmetic is reviewed per-site.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod allocator;
pub mod config;
pub mod error;
pub mod header;
#[cfg(feature = "std")]
pub mod image;
pub mod manager;
pub mod ptr;
pub mod validator;

pub use crate::config::{layout, ManagerConfig};
pub use crate::error::{PersistMemError, PersistMemResult, Result};
pub use crate::manager::Manager;
pub use crate::ptr::PPtr;

/// Convenient re-exports of the crate's primary surface.
pub mod prelude {
    //! `use persist_mem::prelude::*;` pulls in everything most callers need.

    pub use crate::config::{layout, ManagerConfig};
    pub use crate::error::{PersistMemError, PersistMemResult, Result};
    pub use crate::manager::Manager;
    pub use crate::ptr::PPtr;
}

#[cfg(feature = "logging")]
use tracing::info;

/// Binds the process-wide [`Manager`] to a freshly-initialized region.
/// A thin, logged wrapper over [`Manager::create`] for callers who prefer a
/// free function at startup (spec §4.3).
///
/// # Safety
/// Same obligations as [`Manager::create`].
pub unsafe fn init(base: *mut u8, region_size: u64) -> PersistMemResult<()> {
    #[cfg(feature = "logging")]
    info!(region_size, "binding persist-mem region");
    Manager::global().create(base, region_size)
}

/// Unbinds the process-wide [`Manager`], leaving the region's bytes
/// untouched. A thin wrapper over [`Manager::destroy`].
pub fn shutdown() {
    #[cfg(feature = "logging")]
    info!("unbinding persist-mem region");
    Manager::global().destroy();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_shutdown_round_trip() {
        let mut region = vec![0u8; 8192];
        unsafe {
            init(region.as_mut_ptr(), region.len() as u64).unwrap();
        }
        assert!(Manager::global().is_bound());
        shutdown();
        assert!(!Manager::global().is_bound());
    }
}
