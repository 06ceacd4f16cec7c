//! Property-based tests over the universal invariants from spec §8, in the
//! style of `resource/tests/pool_property.rs` (`proptest!` block, a handful
//! of bounded `with_cases`, one invariant per block).

use std::sync::Mutex;

use persist_mem::Manager;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// `Manager::global()` is one process-wide singleton shared with the other
// integration test binaries' scenarios; serialize access the same way
// `tests/scenarios.rs` does so proptest's repeated cases (and `cargo test`'s
// parallel test threads) don't interleave two bindings.
static SERIAL: Mutex<()> = Mutex::new(());

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Spec §8 invariant 1 (`validate()` true after every successful mutating
    /// operation) and invariant 3 (`allocated_blocks` == count of USED
    /// chunks), exercised over an arbitrary interleaving of allocate/free.
    #[test]
    fn validate_holds_after_arbitrary_allocate_deallocate_sequence(
        sizes in proptest::collection::vec(1usize..512, 1..60),
    ) {
        let _guard = SERIAL.lock().unwrap();
        let mgr = Manager::global();
        let mut region = vec![0u8; 512 * 1024];
        unsafe {
            mgr.create(region.as_mut_ptr(), region.len() as u64).unwrap();
        }

        let mut live = Vec::new();
        for size in sizes {
            let offset = mgr.allocate(size as u64);
            if offset != 0 {
                live.push(offset);
            }
            prop_assert!(mgr.validate());
            // Periodically free the oldest live allocation so the sequence
            // exercises coalescing, not just growth.
            if live.len() > 4 {
                let freed = live.remove(0);
                mgr.deallocate(freed);
                prop_assert!(mgr.validate());
            }
        }

        let expected_remaining = live.len() as u64;
        prop_assert_eq!(mgr.allocated_blocks(), expected_remaining);
        for offset in live {
            mgr.deallocate(offset);
        }
        prop_assert!(mgr.validate());
        prop_assert_eq!(mgr.allocated_blocks(), 0);

        mgr.destroy();
        drop(region);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Spec §8 "Round-trip law": an arbitrary payload survives
    /// `save -> destroy -> load` into a region at a different host address.
    #[test]
    #[cfg(feature = "std")]
    fn save_load_round_trip_preserves_arbitrary_payload_bytes(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
    ) {
        let _guard = SERIAL.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prop.pmem");
        let size = 64 * 1024;

        let mgr = Manager::global();
        let mut region_a = vec![0u8; size];
        unsafe {
            mgr.create(region_a.as_mut_ptr(), size as u64).unwrap();
        }
        let offset = mgr.allocate(payload.len() as u64);
        prop_assert_ne!(offset, 0);
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                region_a.as_mut_ptr().add(offset as usize),
                payload.len(),
            );
        }
        prop_assert!(mgr.save(&path));
        mgr.destroy();
        drop(region_a);

        // Reload into a distinct buffer: a different host address entirely.
        let mut region_b = vec![0u8; size];
        unsafe {
            mgr.load_from_file(&path, region_b.as_mut_ptr(), size as u64).unwrap();
        }
        let restored = region_b[offset as usize..offset as usize + payload.len()].to_vec();
        assert_eq!(restored, payload);
        prop_assert!(mgr.validate());

        mgr.deallocate(offset);
        mgr.destroy();
        drop(region_b);
    }
}
