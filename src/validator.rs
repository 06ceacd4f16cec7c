//! Structural validation of a bound region (spec §4.5 "Validate", spec §8
//! "Invariants").
//!
//! Walks every block's chunk chain and free list and checks the invariants
//! the spec lists as always-true: chunk sizes sum to the owning block's
//! size, the free list is a correctly-linked subset of those chunks in
//! offset order, and the header's `free_size`/`allocated_block_count`
//! bookkeeping agrees with what's actually on disk. Grounded on the same
//! kind of pass `rarena-allocator` runs in its own arena sanity checks
//! before trusting an existing arena.

use crate::allocator::RegionView;
use crate::config::layout;
use crate::header::{BlockDescriptor, ChunkHeader, ChunkState, RegionHeader};

/// Runs every structural check against `view`'s current header, returning
/// `Ok(())` if the region is internally consistent or `Err(reason)`
/// naming the first violation found.
pub(crate) fn check(view: &RegionView) -> Result<(), String> {
    // SAFETY: `view` is only constructed over a region the manager holds a
    // lock on for the duration of this call.
    unsafe { check_inner(view) }
}

unsafe fn check_inner(view: &RegionView) -> Result<(), String> {
    let header = view.read_header();
    if !header.is_recognized() {
        return Err(format!(
            "unrecognized magic {:?} or version {}",
            header.magic, header.version
        ));
    }
    if header.region_size == 0 || header.region_size > view.region_size {
        return Err(format!(
            "header region_size {} exceeds bound buffer size {}",
            header.region_size, view.region_size
        ));
    }

    let mut total_free_capacity = 0u64;
    let mut total_allocated = 0u64;

    for i in 0..header.block_count as u64 {
        let desc_off = header.first_block_desc_offset + i * layout::BLOCK_DESC_SIZE as u64;
        let block = BlockDescriptor::read(view.base.add(desc_off as usize));
        check_block(view, &header, &block, &mut total_free_capacity, &mut total_allocated)?;
    }

    if total_free_capacity != header.free_size {
        return Err(format!(
            "header free_size {} disagrees with walked total {total_free_capacity}",
            header.free_size
        ));
    }
    if total_allocated != header.allocated_block_count {
        return Err(format!(
            "header allocated_block_count {} disagrees with walked total {total_allocated}",
            header.allocated_block_count
        ));
    }

    Ok(())
}

unsafe fn check_block(
    view: &RegionView,
    header: &RegionHeader,
    block: &BlockDescriptor,
    total_free_capacity: &mut u64,
    total_allocated: &mut u64,
) -> Result<(), String> {
    if block.base_offset < header.first_block_desc_offset
        || block.end_offset() > header.region_size
    {
        return Err(format!(
            "block at {} (size {}) falls outside the region",
            block.base_offset, block.size
        ));
    }

    // Walk the chunk chain by physical adjacency, verifying sizes sum to
    // exactly the block's span and every Free chunk appears in the free list
    // exactly once.
    let mut free_chunks_seen = std::collections::HashSet::new();
    let mut cursor = block.base_offset;
    while cursor < block.end_offset() {
        if cursor + layout::CHUNK_HEADER_SIZE as u64 > block.end_offset() {
            return Err(format!("chunk header at {cursor} overruns block end"));
        }
        let Some(chunk) = ChunkHeader::read(view.base.add(cursor as usize)) else {
            return Err(format!("chunk header at {cursor} has an unrecognized state byte"));
        };
        if chunk.size < layout::CHUNK_HEADER_SIZE as u64 {
            return Err(format!("chunk at {cursor} has size {} smaller than its header", chunk.size));
        }
        if cursor + chunk.size > block.end_offset() {
            return Err(format!("chunk at {cursor} (size {}) overruns block end", chunk.size));
        }
        match chunk.state {
            ChunkState::Free => {
                free_chunks_seen.insert(cursor);
            }
            ChunkState::Used => {
                *total_allocated += 1;
            }
        }
        cursor += chunk.size;
    }
    if cursor != block.end_offset() {
        return Err(format!(
            "block at {} chunk chain ends at {cursor}, expected {}",
            block.base_offset,
            block.end_offset()
        ));
    }

    // Walk the free list itself, in the order the offsets claim, checking
    // doubly-linked consistency and that it covers exactly the Free chunks
    // the chain walk found.
    let mut prev_offset = 0u64;
    let mut cur = block.free_list_head;
    let mut free_chunks_linked = std::collections::HashSet::new();
    while cur != 0 {
        if !free_chunks_seen.contains(&cur) {
            return Err(format!("free list references offset {cur} not seen as a Free chunk"));
        }
        let Some(chunk) = ChunkHeader::read(view.base.add(cur as usize)) else {
            return Err(format!("free list offset {cur} has an unrecognized state byte"));
        };
        if chunk.state != ChunkState::Free {
            return Err(format!("free list offset {cur} is not marked Free"));
        }
        if chunk.prev_free != prev_offset {
            return Err(format!(
                "free chunk at {cur} has prev_free {} but predecessor in list was {prev_offset}",
                chunk.prev_free
            ));
        }
        if cur <= prev_offset && prev_offset != 0 {
            return Err(format!("free list is not in ascending offset order at {cur}"));
        }
        free_chunks_linked.insert(cur);
        *total_free_capacity += chunk.payload_capacity();
        prev_offset = cur;
        cur = chunk.next_free;
    }

    if free_chunks_linked.len() != free_chunks_seen.len() {
        return Err(format!(
            "block at {} has {} Free chunks but only {} reachable from its free list",
            block.base_offset,
            free_chunks_seen.len(),
            free_chunks_linked.len()
        ));
    }

    Ok(())
}
