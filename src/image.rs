//! Byte-exact image I/O: writing a bound region out to a file and reading it
//! back in (spec §4.4 "Save"/"Load", spec §6 "Image format").
//!
//! No serialization framework is involved — the region's bytes already are
//! the wire format (spec §3), so this module is a thin, unbuffered wrapper
//! around `std::fs`/`std::io`, matching `disk-dlmalloc`'s direct
//! `File`/`Read`/`Write` use for its own backing store.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::slice;

use crate::error::{PersistMemError, PersistMemResult};

/// Writes `region_size` bytes starting at `base` to `path`, truncating any
/// existing file. Best-effort: data is flushed to the OS but not `fsync`ed
/// (spec's Non-goals exclude transactional durability).
pub(crate) fn write_from(path: &Path, base: *mut u8, region_size: u64) -> PersistMemResult<()> {
    // SAFETY: caller (Manager::save) holds the region lock for the duration
    // of this call, and `base` is valid for `region_size` bytes by the
    // invariant established at bind time.
    let bytes = unsafe { slice::from_raw_parts(base, region_size as usize) };
    let mut file = File::create(path).map_err(|e| PersistMemError::io(&e))?;
    file.write_all(bytes).map_err(|e| PersistMemError::io(&e))?;
    file.flush().map_err(|e| PersistMemError::io(&e))?;
    Ok(())
}

/// Reads exactly `region_size` bytes from `path` into `base`. The file must
/// be at least `region_size` bytes long; any trailing bytes are ignored.
pub(crate) fn read_into(path: &Path, base: *mut u8, region_size: u64) -> PersistMemResult<()> {
    let mut file = File::open(path).map_err(|e| PersistMemError::io(&e))?;
    // SAFETY: caller (Manager::load_from_file) guarantees `base` is valid for
    // `region_size` writable bytes before this call resolves.
    let bytes = unsafe { slice::from_raw_parts_mut(base, region_size as usize) };
    file.read_exact(bytes).map_err(|e| PersistMemError::io(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::init_region;
    use crate::config::layout;

    #[test]
    fn round_trips_a_freshly_initialized_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.pmem");

        let size = layout::MIN_REGION_SIZE * 4;
        let mut original = vec![0u8; size];
        unsafe {
            init_region(original.as_mut_ptr(), size as u64);
        }
        write_from(&path, original.as_mut_ptr(), size as u64).unwrap();

        let mut restored = vec![0u8; size];
        read_into(&path, restored.as_mut_ptr(), size as u64).unwrap();

        assert_eq!(original, restored);
    }

    #[test]
    fn read_into_reports_io_error_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.pmem");
        let mut buf = vec![0u8; layout::MIN_REGION_SIZE];
        let err = read_into(&path, buf.as_mut_ptr(), buf.len() as u64).unwrap_err();
        assert!(matches!(err, PersistMemError::Io(_)));
    }
}
