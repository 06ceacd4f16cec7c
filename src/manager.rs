//! Process-wide manager: binds a byte region, exposes allocate / deallocate /
//! reallocate / save / load / destroy, and validates structural integrity
//! (spec §4.3, §4.4).
//!
//! Spec §9 weighs a re-entrant mutex against "lock once at the outer API,
//! keep the inner helpers lock-free" and recommends the latter. We follow
//! that here: every mutating public method takes the single
//! [`parking_lot::Mutex`] exactly once, then calls into
//! [`crate::allocator::RegionView`], whose methods assume the lock is already
//! held and never take it themselves — the same split the teacher draws
//! between `AllocatorManager`'s public surface and the plain (unsynchronized)
//! methods on the allocator it wraps, and the same single-`Mutex`-around-the-
//! core shape as `disk-dlmalloc`'s `DiskDlmalloc(Arc<Mutex<Dlmalloc<System>>>)`.
//! `validate`, `save`, and `PPtr::resolve`/`resolve_at` are the read-only
//! exception spec §5 carves out: they never touch the mutex at all (see the
//! struct doc below).

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::allocator::{init_region, RegionView};
use crate::config::{layout, ManagerConfig};
use crate::error::{PersistMemError, PersistMemResult};
use crate::header::RegionHeader;
#[cfg(feature = "std")]
use crate::image;
use crate::ptr::PPtr;
use crate::validator;

/// Process-wide singleton slot. Spec §4.3 requires a single process-wide
/// instance; binding a second region while one is already bound is an error
/// rather than silently replacing it (`PersistMemError::DoubleBind`).
static MANAGER: OnceLock<Manager> = OnceLock::new();

/// The process-wide memory manager (spec §4.3 "Manager").
///
/// Obtain the singleton via [`Manager::global`]. Spec §5 draws a hard line:
/// every mutating entry point (`create`, `load`, `destroy`, `allocate`,
/// `deallocate`, `reallocate`, their typed facades) takes `lock` once for its
/// whole duration, but `validate`, `save`, `resolve`, and `resolve_at` are
/// pure reads over the current base/size and must not lock at all — callers
/// are responsible for quiescing mutators before calling those. To make that
/// possible without the read side ever touching the mutex, the bound state
/// (`base`, `region_size`, `checksum_on_save`) lives in plain atomics that
/// `lock` serializes writes to; `base` is only ever published (stored)
/// *after* everything else it depends on, and cleared *first* on unbind, so
/// an unlocked reader either sees a fully-initialized region or none at all.
pub struct Manager {
    lock: Mutex<()>,
    base: AtomicPtr<u8>,
    region_size: AtomicU64,
    checksum_on_save: AtomicBool,
}

impl Manager {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            base: AtomicPtr::new(std::ptr::null_mut()),
            region_size: AtomicU64::new(0),
            checksum_on_save: AtomicBool::new(ManagerConfig::default().checksum_on_save),
        }
    }

    /// Returns the process-wide singleton, creating it on first access.
    #[must_use]
    pub fn global() -> &'static Manager {
        MANAGER.get_or_init(Manager::new)
    }

    /// Binds a freshly-initialized region over `base[..region_size]`
    /// (spec §4.3 "Create").
    ///
    /// # Safety
    /// `base` must be valid for reads and writes for `region_size` bytes for
    /// as long as the manager stays bound, and must not alias any other
    /// live reference.
    pub unsafe fn create(&self, base: *mut u8, region_size: u64) -> PersistMemResult<()> {
        self.create_with_config(base, region_size, ManagerConfig::default())
    }

    /// Like [`Manager::create`], with an explicit [`ManagerConfig`].
    ///
    /// # Safety
    /// Same obligations as [`Manager::create`].
    pub unsafe fn create_with_config(
        &self,
        base: *mut u8,
        region_size: u64,
        config: ManagerConfig,
    ) -> PersistMemResult<()> {
        if base.is_null() {
            return Err(PersistMemError::invalid_region("base pointer is null"));
        }
        if region_size < layout::MIN_REGION_SIZE as u64 {
            return Err(PersistMemError::invalid_region(format!(
                "region size {region_size} is below the minimum of {}",
                layout::MIN_REGION_SIZE
            )));
        }
        if (base as usize) % layout::ALIGN != 0 {
            return Err(PersistMemError::invalid_region("base pointer is misaligned"));
        }

        let _guard = self.lock.lock();
        if !self.base.load(Ordering::Acquire).is_null() {
            return Err(PersistMemError::DoubleBind);
        }

        init_region(base, region_size);
        self.region_size.store(region_size, Ordering::Release);
        self.checksum_on_save
            .store(config.checksum_on_save, Ordering::Release);
        // Publish `base` last: an unlocked reader (resolve/validate/save)
        // that observes a non-null base must also observe a consistent
        // region_size/checksum_on_save.
        self.base.store(base, Ordering::Release);
        Ok(())
    }

    /// Binds an existing, previously-saved region image already resident at
    /// `base[..region_size]` (spec §4.4 "Load").
    ///
    /// # Safety
    /// Same pointer obligations as [`Manager::create`]; additionally, the
    /// bytes at `base` must have been produced by this crate's `save` (or be
    /// a byte-exact copy of such an image).
    pub unsafe fn load(&self, base: *mut u8, region_size: u64) -> PersistMemResult<()> {
        if base.is_null() {
            return Err(PersistMemError::invalid_region("base pointer is null"));
        }
        if (base as usize) % layout::ALIGN != 0 {
            return Err(PersistMemError::invalid_region("base pointer is misaligned"));
        }

        let header = RegionHeader::read(base);
        if !header.is_recognized() {
            return Err(PersistMemError::image_mismatch("unrecognized magic or version"));
        }
        if header.region_size != region_size {
            return Err(PersistMemError::image_mismatch(format!(
                "image region size {} does not match supplied buffer size {region_size}",
                header.region_size
            )));
        }

        let _guard = self.lock.lock();
        if !self.base.load(Ordering::Acquire).is_null() {
            return Err(PersistMemError::DoubleBind);
        }

        let view = RegionView { base, region_size };
        if let Err(reason) = validator::check(&view) {
            return Err(PersistMemError::corruption(reason));
        }

        self.region_size.store(region_size, Ordering::Release);
        self.checksum_on_save
            .store(ManagerConfig::default().checksum_on_save, Ordering::Release);
        self.base.store(base, Ordering::Release);
        Ok(())
    }

    /// Reads an image from `path` into `base[..region_size]`, then
    /// [`Manager::load`]s it (spec §4.4 "load_from_file").
    ///
    /// # Safety
    /// Same pointer obligations as [`Manager::load`].
    #[cfg(feature = "std")]
    pub unsafe fn load_from_file(
        &self,
        path: impl AsRef<std::path::Path>,
        base: *mut u8,
        region_size: u64,
    ) -> PersistMemResult<()> {
        image::read_into(path.as_ref(), base, region_size)?;
        self.load(base, region_size)
    }

    /// Unbinds the current region without touching its bytes (spec §4.4
    /// "Destroy"). A later `create`/`load` may bind a new region.
    pub fn destroy(&self) {
        let _guard = self.lock.lock();
        // Clear `base` first so an unlocked reader never sees a null'd
        // region_size paired with a still-live base.
        self.base.store(std::ptr::null_mut(), Ordering::Release);
        self.region_size.store(0, Ordering::Release);
    }

    /// Writes the bound region, byte for byte, to `path` (spec §4.4 "Save").
    /// Returns `false` rather than propagating I/O errors, per spec §7.
    ///
    /// Per spec §5, `save` is documented as read-only in this revision and
    /// does **not** take `lock`; callers must quiesce mutators (stop calling
    /// `allocate`/`deallocate`/`reallocate`) before calling this.
    #[cfg(feature = "std")]
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> bool {
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            return false;
        }
        let region_size = self.region_size.load(Ordering::Acquire);
        if self.checksum_on_save.load(Ordering::Acquire) {
            let view = RegionView { base, region_size };
            unsafe {
                let mut header = view.read_header();
                header.checksum = checksum(base, region_size);
                view.write_header(&header);
            }
        }
        image::write_from(path.as_ref(), base, region_size).is_ok()
    }

    /// Allocates `size` bytes, returning the payload offset, or `0` (the null
    /// offset) if no block has a fitting free chunk or the manager is
    /// unbound (spec §4.2 "Allocate", spec §7).
    pub fn allocate(&self, size: u64) -> u64 {
        if size == 0 {
            return 0;
        }
        let _guard = self.lock.lock();
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            let _ = PersistMemError::unbound();
            return 0;
        }
        let region_size = self.region_size.load(Ordering::Acquire);
        let view = RegionView { base, region_size };
        match unsafe { view.allocate(size) } {
            Some(offset) => offset,
            None => {
                let available = unsafe { view.read_header() }.free_size;
                // Constructed for its logging side effect (spec §10.2 "OOM
                // events"); the public surface still returns the null offset.
                let _ = PersistMemError::out_of_memory(size, available);
                0
            }
        }
    }

    /// Frees the allocation at `offset`. A no-op if `offset` is `0` or the
    /// manager is unbound (spec §4.2 "Deallocate").
    pub fn deallocate(&self, offset: u64) {
        if offset == 0 {
            return;
        }
        let _guard = self.lock.lock();
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            let _ = PersistMemError::unbound();
            return;
        }
        let region_size = self.region_size.load(Ordering::Acquire);
        let view = RegionView { base, region_size };
        unsafe { view.deallocate(offset) }
    }

    /// Resizes the allocation at `offset` to `new_size` bytes, returning the
    /// (possibly unchanged) payload offset, or `0` on failure (spec §4.2
    /// "Reallocate").
    pub fn reallocate(&self, offset: u64, new_size: u64) -> u64 {
        if offset == 0 {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            self.deallocate(offset);
            return 0;
        }
        let _guard = self.lock.lock();
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            let _ = PersistMemError::unbound();
            return 0;
        }
        let region_size = self.region_size.load(Ordering::Acquire);
        let view = RegionView { base, region_size };
        match unsafe { view.reallocate(offset, new_size) } {
            Some(offset) => offset,
            None => {
                let available = unsafe { view.read_header() }.free_size;
                let _ = PersistMemError::out_of_memory(new_size, available);
                0
            }
        }
    }

    /// Typed convenience over [`Manager::allocate`]: reserves space for
    /// `count` `T`s and returns a [`PPtr<T>`] (null on failure). Spec §4.3
    /// treats a single `T` (`count = 1`) as the default, but Rust has no
    /// default arguments, so callers pass it explicitly — mirroring
    /// [`Manager::reallocate_typed`]'s `n` parameter.
    pub fn allocate_typed<T>(&self, count: usize) -> PPtr<T> {
        let size = std::mem::size_of::<T>() as u64 * count as u64;
        let offset = self.allocate(size);
        PPtr::from_offset(offset)
    }

    /// Typed convenience over [`Manager::deallocate`].
    pub fn deallocate_typed<T>(&self, ptr: PPtr<T>) {
        self.deallocate(ptr.offset());
    }

    /// Typed convenience over [`Manager::reallocate`] for a new element count
    /// `n` of `T`s.
    pub fn reallocate_typed<T>(&self, ptr: PPtr<T>, n: usize) -> PPtr<T> {
        let new_size = std::mem::size_of::<T>() as u64 * n as u64;
        let offset = self.reallocate(ptr.offset(), new_size);
        PPtr::from_offset(offset)
    }

    /// Runs the structural validator over the bound region (spec §4.5).
    /// Returns `false` if unbound or any invariant is violated.
    ///
    /// Per spec §5, not lock-protected; quiesce mutators first.
    pub fn validate(&self) -> bool {
        let Some((base, region_size)) = self.bound_snapshot() else {
            return false;
        };
        let view = RegionView { base, region_size };
        match validator::check(&view) {
            Ok(()) => true,
            Err(reason) => {
                // Constructed for its logging side effect (spec §10.2
                // "validator failures"); the public surface stays a bool.
                let _ = PersistMemError::corruption(reason);
                false
            }
        }
    }

    /// Bytes of free capacity across all blocks, or `0` if unbound.
    pub fn free_size(&self) -> u64 {
        self.bound_snapshot()
            .map_or(0, |(base, region_size)| unsafe {
                RegionView { base, region_size }.read_header().free_size
            })
    }

    /// Total region size in bytes, or `0` if unbound.
    pub fn region_size(&self) -> u64 {
        self.region_size.load(Ordering::Acquire)
    }

    /// Number of live (used) allocations, or `0` if unbound.
    pub fn allocated_blocks(&self) -> u64 {
        self.bound_snapshot()
            .map_or(0, |(base, region_size)| unsafe {
                RegionView { base, region_size }
                    .read_header()
                    .allocated_block_count
            })
    }

    /// True iff a region is currently bound.
    pub fn is_bound(&self) -> bool {
        !self.base.load(Ordering::Acquire).is_null()
    }

    /// The base pointer of the bound region, or `None` if unbound. Used by
    /// [`PPtr::resolve`](crate::ptr::PPtr::resolve) to turn offsets into host
    /// pointers. Lock-free, per spec §5's "`resolve` does not lock".
    pub(crate) fn base_ptr(&self) -> Option<*mut u8> {
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            None
        } else {
            Some(base)
        }
    }

    /// Lock-free `(base, region_size)` snapshot, or `None` if unbound.
    fn bound_snapshot(&self) -> Option<(*mut u8, u64)> {
        let base = self.base.load(Ordering::Acquire);
        if base.is_null() {
            None
        } else {
            Some((base, self.region_size.load(Ordering::Acquire)))
        }
    }
}

/// A simple additive checksum over the region's dynamic area, good enough to
/// catch truncated or bit-flipped image files (spec §3: checksum is optional
/// and its algorithm is left to the implementation). Not cryptographic.
#[cfg(feature = "std")]
unsafe fn checksum(base: *mut u8, region_size: u64) -> u64 {
    let bytes = std::slice::from_raw_parts(base, region_size as usize);
    let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
    for chunk in bytes.chunks(8) {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        acc = acc.wrapping_mul(0x0000_0100_0000_01b3) ^ u64::from_le_bytes(word);
    }
    acc
}
