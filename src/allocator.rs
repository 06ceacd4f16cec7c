//! Free-list allocator over one or more blocks (spec §4.2).
//!
//! These functions are the "lock-free helpers" spec §9 recommends over a
//! re-entrant mutex: every function here assumes the caller ([`Manager`](crate::manager::Manager))
//! already holds the process-wide lock, and none of them locks anything
//! themselves — mirroring the teacher's `allocator::manager::AllocatorManager`,
//! whose `with_active_allocator`/`with_allocator` closures are the only
//! synchronization boundary, with the allocator operations themselves being
//! plain (unsynchronized) methods. Coalescing follows the address-ordered
//! free list technique used by `gifnksm-onix`'s `linked_list` allocator: the
//! free list is kept sorted by offset, so a newly freed chunk's physical
//! neighbors are exactly its neighbors in that list when (and only when)
//! their byte ranges touch — no boundary-tag footer is needed.

use crate::config::layout::{align_up, CHUNK_HEADER_SIZE, MIN_CHUNK_SIZE};
use crate::header::{BlockDescriptor, ChunkHeader, ChunkState, RegionHeader};

/// Raw, unsynchronized view over a region's bytes. Every method here
/// operates directly on the bytes at `base`; the caller is responsible for
/// holding the manager's lock for the duration of any mutating call.
pub(crate) struct RegionView {
    pub(crate) base: *mut u8,
    pub(crate) region_size: u64,
}

impl RegionView {
    #[inline]
    unsafe fn at(&self, offset: u64) -> *mut u8 {
        self.base.add(offset as usize)
    }

    pub(crate) unsafe fn read_header(&self) -> RegionHeader {
        RegionHeader::read(self.base)
    }

    pub(crate) unsafe fn write_header(&self, header: &RegionHeader) {
        header.write(self.base);
    }

    unsafe fn read_block(&self, block_desc_offset: u64) -> BlockDescriptor {
        BlockDescriptor::read(self.at(block_desc_offset))
    }

    unsafe fn write_block(&self, block_desc_offset: u64, desc: &BlockDescriptor) {
        desc.write(self.at(block_desc_offset));
    }

    /// Panics if the chunk header is unreadable; callers operate only on
    /// regions that `validator::check` has already passed, so a failure here
    /// means the region was mutated out from under us rather than loaded
    /// corrupt.
    unsafe fn read_chunk(&self, chunk_offset: u64) -> ChunkHeader {
        ChunkHeader::read(self.at(chunk_offset))
            .expect("chunk header corrupt; region should have been validated before mutation")
    }

    unsafe fn write_chunk(&self, chunk_offset: u64, chunk: &ChunkHeader) {
        chunk.write(self.at(chunk_offset));
    }

    /// Offsets of every block descriptor, in on-disk (creation) order.
    unsafe fn block_desc_offsets(&self, header: &RegionHeader) -> Vec<u64> {
        (0..header.block_count as u64)
            .map(|i| header.first_block_desc_offset + i * crate::config::layout::BLOCK_DESC_SIZE as u64)
            .collect()
    }

    /// Walks a block's free list in offset order, returning
    /// `(chunk_offset, header)` pairs.
    unsafe fn free_list(&self, block: &BlockDescriptor) -> Vec<(u64, ChunkHeader)> {
        let mut out = Vec::new();
        let mut cur = block.free_list_head;
        while cur != 0 {
            let chunk = self.read_chunk(cur);
            debug_assert_eq!(chunk.state, ChunkState::Free);
            out.push((cur, chunk));
            cur = chunk.next_free;
        }
        out
    }

    /// Unlinks the chunk at `offset` from `block`'s free list, patching its
    /// neighbors' links (and the block's head, if it was first).
    unsafe fn unlink_free(&self, block: &mut BlockDescriptor, offset: u64, chunk: &ChunkHeader) {
        if chunk.prev_free != 0 {
            let mut prev = self.read_chunk(chunk.prev_free);
            prev.next_free = chunk.next_free;
            self.write_chunk(chunk.prev_free, &prev);
        } else {
            block.free_list_head = chunk.next_free;
        }
        if chunk.next_free != 0 {
            let mut next = self.read_chunk(chunk.next_free);
            next.prev_free = chunk.prev_free;
            self.write_chunk(chunk.next_free, &next);
        }
    }

    /// Inserts a free chunk at `offset` into `block`'s offset-ordered free
    /// list, returning the (possibly-now-stale) neighbor offsets so the
    /// caller can check for physical adjacency.
    unsafe fn link_free(
        &self,
        block: &mut BlockDescriptor,
        offset: u64,
        size: u64,
    ) -> (Option<u64>, Option<u64>) {
        let mut prev_offset: u64 = 0;
        let mut cur = block.free_list_head;
        while cur != 0 && cur < offset {
            prev_offset = cur;
            let chunk = self.read_chunk(cur);
            cur = chunk.next_free;
        }
        // `cur` is now the first free chunk with offset > ours (or 0); `prev_offset` is the one before it.
        let next_offset = cur;

        let new_chunk = ChunkHeader {
            size,
            state: ChunkState::Free,
            next_free: next_offset,
            prev_free: prev_offset,
        };
        self.write_chunk(offset, &new_chunk);

        if prev_offset != 0 {
            let mut prev = self.read_chunk(prev_offset);
            prev.next_free = offset;
            self.write_chunk(prev_offset, &prev);
        } else {
            block.free_list_head = offset;
        }
        if next_offset != 0 {
            let mut next = self.read_chunk(next_offset);
            next.prev_free = offset;
            self.write_chunk(next_offset, &next);
        }

        (
            if prev_offset != 0 { Some(prev_offset) } else { None },
            if next_offset != 0 { Some(next_offset) } else { None },
        )
    }

    /// Finds the block whose byte range contains `chunk_offset`.
    unsafe fn block_containing(&self, header: &RegionHeader, chunk_offset: u64) -> (u64, BlockDescriptor) {
        for desc_off in self.block_desc_offsets(header) {
            let block = self.read_block(desc_off);
            if chunk_offset >= block.base_offset && chunk_offset < block.end_offset() {
                return (desc_off, block);
            }
        }
        unreachable!("chunk offset {chunk_offset} not contained in any block")
    }

    /// First-fit search across every block, in creation order.
    unsafe fn find_fit(&self, header: &RegionHeader, total_needed: u64) -> Option<(u64, BlockDescriptor, u64, ChunkHeader)> {
        for desc_off in self.block_desc_offsets(header) {
            let block = self.read_block(desc_off);
            for (offset, chunk) in self.free_list(&block) {
                if chunk.size >= total_needed {
                    return Some((desc_off, block, offset, chunk));
                }
            }
        }
        None
    }

    /// Services one allocation request. Returns the payload offset, or
    /// `None` if no block has a fitting free chunk.
    pub(crate) unsafe fn allocate(&self, requested: u64) -> Option<u64> {
        let mut header = self.read_header();
        let total_needed = align_up(
            (CHUNK_HEADER_SIZE as u64 + requested) as usize,
            crate::config::layout::ALIGN,
        ) as u64;

        let (desc_off, mut block, chunk_offset, chunk) = self.find_fit(&header, total_needed)?;
        let old_capacity = chunk.size - CHUNK_HEADER_SIZE as u64;

        self.unlink_free(&mut block, chunk_offset, &chunk);

        let mut remainder_capacity = 0u64;
        if chunk.size >= total_needed + MIN_CHUNK_SIZE as u64 {
            // Split: lower part becomes used, upper remainder stays free.
            let used = ChunkHeader {
                size: total_needed,
                state: ChunkState::Used,
                next_free: 0,
                prev_free: 0,
            };
            self.write_chunk(chunk_offset, &used);

            let remainder_offset = chunk_offset + total_needed;
            let remainder_size = chunk.size - total_needed;
            self.link_free(&mut block, remainder_offset, remainder_size);
            remainder_capacity = remainder_size - CHUNK_HEADER_SIZE as u64;
        } else {
            // Whole chunk becomes used; up to MIN_CHUNK_SIZE - 1 bytes wasted.
            let used = ChunkHeader {
                size: chunk.size,
                state: ChunkState::Used,
                next_free: 0,
                prev_free: 0,
            };
            self.write_chunk(chunk_offset, &used);
        }

        self.write_block(desc_off, &block);

        header.free_size = header.free_size - old_capacity + remainder_capacity;
        header.allocated_block_count += 1;
        self.write_header(&header);

        Some(chunk_offset + CHUNK_HEADER_SIZE as u64)
    }

    /// Frees the chunk at `payload_offset`, coalescing with physically
    /// adjacent free neighbors.
    pub(crate) unsafe fn deallocate(&self, payload_offset: u64) {
        let mut header = self.read_header();
        let chunk_offset = payload_offset - CHUNK_HEADER_SIZE as u64;
        let chunk = self.read_chunk(chunk_offset);
        debug_assert_eq!(chunk.state, ChunkState::Used);

        let (desc_off, mut block) = self.block_containing(&header, chunk_offset);
        let freed_capacity = chunk.size - CHUNK_HEADER_SIZE as u64;
        let mut reclaimed_headers = 0u64;

        let (prev_off, next_off) = self.link_free(&mut block, chunk_offset, chunk.size);
        let final_offset = chunk_offset;

        // Merge forward: the next free-list neighbor physically touches us.
        if let Some(next_off) = next_off {
            let mut ours = self.read_chunk(final_offset);
            if final_offset + ours.size == next_off {
                let next = self.read_chunk(next_off);
                self.unlink_free(&mut block, next_off, &next);
                ours = self.read_chunk(final_offset);
                ours.size += next.size;
                self.write_chunk(final_offset, &ours);
                reclaimed_headers += 1;
            }
        }

        // Merge backward: the previous free-list neighbor physically touches us.
        if let Some(prev_off) = prev_off {
            let prev = self.read_chunk(prev_off);
            if prev_off + prev.size == final_offset {
                let merged = self.read_chunk(final_offset);
                self.unlink_free(&mut block, final_offset, &merged);
                let mut new_prev = self.read_chunk(prev_off);
                new_prev.size += merged.size;
                self.write_chunk(prev_off, &new_prev);
                reclaimed_headers += 1;
            }
        }

        self.write_block(desc_off, &block);

        header.free_size = header.free_size + freed_capacity + reclaimed_headers * CHUNK_HEADER_SIZE as u64;
        header.allocated_block_count -= 1;
        self.write_header(&header);
    }

    /// Reallocates the chunk at `payload_offset` to hold `new_size` bytes,
    /// per spec §4.2 "Reallocate".
    pub(crate) unsafe fn reallocate(&self, payload_offset: u64, new_size: u64) -> Option<u64> {
        let chunk_offset = payload_offset - CHUNK_HEADER_SIZE as u64;
        let chunk = self.read_chunk(chunk_offset);
        debug_assert_eq!(chunk.state, ChunkState::Used);

        let total_needed = align_up(
            (CHUNK_HEADER_SIZE as u64 + new_size) as usize,
            crate::config::layout::ALIGN,
        ) as u64;

        if total_needed <= chunk.size {
            // Fits already; shrink by splitting off the tail if it's worth it.
            if chunk.size - total_needed >= MIN_CHUNK_SIZE as u64 {
                let mut header = self.read_header();
                let (desc_off, mut block) = self.block_containing(&header, chunk_offset);

                let remainder_offset = chunk_offset + total_needed;
                let remainder_size = chunk.size - total_needed;
                self.write_chunk(chunk_offset, &ChunkHeader {
                    size: total_needed,
                    state: ChunkState::Used,
                    next_free: 0,
                    prev_free: 0,
                });
                self.link_free(&mut block, remainder_offset, remainder_size);
                self.write_block(desc_off, &block);

                header.free_size += remainder_size - CHUNK_HEADER_SIZE as u64;
                self.write_header(&header);
            }
            return Some(payload_offset);
        }

        // Attempt in-place grow by absorbing a physically adjacent free successor.
        let mut header = self.read_header();
        let (desc_off, mut block) = self.block_containing(&header, chunk_offset);
        let following_offset = chunk_offset + chunk.size;
        if following_offset < block.end_offset() {
            let following = self.read_chunk(following_offset);
            if following.state == ChunkState::Free && chunk.size + following.size >= total_needed {
                self.unlink_free(&mut block, following_offset, &following);

                let combined_size = chunk.size + following.size;
                let old_capacity = following.size - CHUNK_HEADER_SIZE as u64;
                let mut new_free_capacity = 0u64;

                if combined_size - total_needed >= MIN_CHUNK_SIZE as u64 {
                    self.write_chunk(chunk_offset, &ChunkHeader {
                        size: total_needed,
                        state: ChunkState::Used,
                        next_free: 0,
                        prev_free: 0,
                    });
                    let remainder_offset = chunk_offset + total_needed;
                    let remainder_size = combined_size - total_needed;
                    self.link_free(&mut block, remainder_offset, remainder_size);
                    new_free_capacity = remainder_size - CHUNK_HEADER_SIZE as u64;
                } else {
                    self.write_chunk(chunk_offset, &ChunkHeader {
                        size: combined_size,
                        state: ChunkState::Used,
                        next_free: 0,
                        prev_free: 0,
                    });
                }

                self.write_block(desc_off, &block);
                header.free_size = header.free_size - old_capacity + new_free_capacity;
                self.write_header(&header);
                return Some(payload_offset);
            }
        }

        // Move: allocate new, copy, free old.
        let new_offset = self.allocate(new_size)?;
        let old_payload_size = chunk.size - CHUNK_HEADER_SIZE as u64;
        let copy_len = old_payload_size.min(new_size) as usize;
        std::ptr::copy_nonoverlapping(self.at(payload_offset), self.at(new_offset), copy_len);
        self.deallocate(payload_offset);
        Some(new_offset)
    }
}

/// Initializes a freshly-created region: one block spanning the dynamic
/// area, one free chunk spanning the block (spec §3 "Create").
pub(crate) unsafe fn init_region(base: *mut u8, region_size: u64) {
    use crate::config::layout::{BLOCK_DESC_SIZE, HEADER_SIZE, MAGIC, VERSION};

    let first_block_desc_offset = HEADER_SIZE as u64;
    let dynamic_area_offset = first_block_desc_offset + BLOCK_DESC_SIZE as u64;
    let dynamic_area_size = region_size - dynamic_area_offset;

    let block = BlockDescriptor {
        base_offset: dynamic_area_offset,
        size: dynamic_area_size,
        free_list_head: dynamic_area_offset,
    };
    block.write(base.add(first_block_desc_offset as usize));

    let chunk = ChunkHeader {
        size: dynamic_area_size,
        state: ChunkState::Free,
        next_free: 0,
        prev_free: 0,
    };
    chunk.write(base.add(dynamic_area_offset as usize));

    let header = RegionHeader {
        magic: MAGIC,
        version: VERSION,
        header_size: HEADER_SIZE as u16,
        region_size,
        free_size: dynamic_area_size - CHUNK_HEADER_SIZE as u64,
        allocated_block_count: 0,
        block_count: 1,
        first_block_desc_offset,
        checksum: 0,
    };
    header.write(base);
}
