//! End-to-end scenarios against the public API only, the way
//! `crates/memory/tests/safety_check.rs` exercises a real allocator without
//! reaching into its internals.

use std::sync::Mutex;
use std::thread;

use persist_mem::Manager;

// `Manager::global()` is one process-wide singleton; these tests run as
// separate functions in the same test binary and would otherwise race to
// bind it. `SERIAL` keeps the scenarios from interleaving.
static SERIAL: Mutex<()> = Mutex::new(());

fn with_region<F: FnOnce(&'static Manager)>(size: usize, f: F) {
    let _guard = SERIAL.lock().unwrap();
    let mgr = Manager::global();
    let mut region = vec![0u8; size];
    unsafe {
        mgr.create(region.as_mut_ptr(), region.len() as u64).unwrap();
    }
    f(mgr);
    mgr.destroy();
    drop(region);
}

#[test]
fn array_access_through_typed_pointers() {
    with_region(256 * 1024, |mgr| {
        let count = 10usize;
        let ptr = mgr.allocate_typed::<i32>(count);
        assert!(!ptr.is_null());

        unsafe {
            for i in 0..count {
                *ptr.resolve_at(mgr, i) = (i * 10) as i32;
            }
            for i in 0..count {
                assert_eq!(*ptr.resolve_at(mgr, i), (i * 10) as i32);
            }
        }
        mgr.deallocate_typed(ptr);
        assert!(mgr.validate());
    });
}

#[test]
fn persistence_across_save_destroy_reload_at_a_new_address() {
    let _guard = SERIAL.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.pmem");
    let size = 64 * 1024;

    let mgr = Manager::global();
    let mut region_a = vec![0u8; size];
    unsafe {
        mgr.create(region_a.as_mut_ptr(), size as u64).unwrap();
    }
    let offset = mgr.allocate(128);
    assert_ne!(offset, 0);
    let ptr: persist_mem::PPtr<[u8; 128]> = persist_mem::PPtr::from_offset(offset);
    unsafe {
        (*ptr.resolve(mgr))[..5].copy_from_slice(b"hello");
    }
    assert!(mgr.save(&path));
    mgr.destroy();
    drop(region_a);

    // Reload into a distinct buffer at a different host address.
    let mut region_b = vec![0u8; size];
    unsafe {
        mgr.load_from_file(&path, region_b.as_mut_ptr(), size as u64).unwrap();
    }
    unsafe {
        assert_eq!(&(*ptr.resolve(mgr))[..5], b"hello");
    }
    assert!(mgr.validate());
    mgr.deallocate(offset);
    mgr.destroy();
}

#[test]
fn concurrent_allocations_from_multiple_threads() {
    // `Manager` serializes every mutating call behind its own lock (spec
    // §4.3), so concurrent callers observe a consistent region without any
    // external synchronization.
    with_region(4 * 1024 * 1024, |mgr| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                thread::spawn(move || {
                    let mut offsets = Vec::with_capacity(200);
                    for _ in 0..200 {
                        let offset = mgr.allocate(64);
                        assert_ne!(offset, 0);
                        offsets.push(offset);
                    }
                    for offset in offsets {
                        mgr.deallocate(offset);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(mgr.validate());
        assert_eq!(mgr.allocated_blocks(), 0);
    });
}

#[test]
fn allocation_larger_than_the_region_reports_out_of_memory() {
    with_region(4096, |mgr| {
        let offset = mgr.allocate(1024 * 1024);
        assert_eq!(offset, 0);
        assert!(mgr.validate());
    });
}

#[test]
fn reallocate_grows_in_place_when_room_allows() {
    with_region(64 * 1024, |mgr| {
        let offset = mgr.allocate(64);
        assert_ne!(offset, 0);
        let grown = mgr.reallocate(offset, 96);
        assert_ne!(grown, 0);
        assert_eq!(grown, offset, "growing into trailing free space should not move the payload");
        mgr.deallocate(grown);
        assert!(mgr.validate());
    });
}

#[test]
fn reallocate_moves_when_the_neighbor_is_occupied() {
    with_region(64 * 1024, |mgr| {
        let a = mgr.allocate(64);
        let b = mgr.allocate(64);
        let c = mgr.allocate(64);
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(c, 0);

        let ptr_b: persist_mem::PPtr<[u8; 64]> = persist_mem::PPtr::from_offset(b);
        unsafe {
            (*ptr_b.resolve(mgr))[..4].copy_from_slice(b"data");
        }

        // `c` sits directly after `b`, so growing `b` past its own chunk
        // cannot absorb a free neighbor and must move.
        let moved = mgr.reallocate(b, 1024);
        assert_ne!(moved, 0);
        assert_ne!(moved, b, "growing into an occupied neighbor must relocate the payload");

        let moved_ptr: persist_mem::PPtr<[u8; 64]> = persist_mem::PPtr::from_offset(moved);
        unsafe {
            assert_eq!(&(*moved_ptr.resolve(mgr))[..4], b"data");
        }

        mgr.deallocate(a);
        mgr.deallocate(moved);
        mgr.deallocate(c);
        assert!(mgr.validate());
        assert_eq!(mgr.allocated_blocks(), 0);
    });
}
