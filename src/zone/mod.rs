//! Tagged, segregated-free-list general-purpose allocator.
//!
//! A [`Zone`] owns one or more OS-backed segments and threads every
//! block in them into a single address-ordered list (see
//! [`block::BlockHeader`]). Free blocks are additionally linked into
//! one of a handful of segregated free lists by size class
//! ([`freelist::FreeLists`]), so a request can usually be satisfied
//! without walking the whole heap.
//!
//! Two independent `Zone`s exist at runtime — a large "main" zone for
//! general allocations and a small, normally-growth-free "small" zone
//! for tiny long-lived strings — wired up by [`crate::init`].

pub mod block;
pub mod freelist;
pub mod static_strings;
pub mod tag;

use crate::config::SearchDirection;
use crate::error::{DropError, ErrorSink};
use crate::os::Reservation;
use crate::stats::ZoneStats;
use block::{payload_ptr, read_trash, write_trash, BlockHeader, FREE_LINK_SIZE, HEADER_SIZE, ZONEID};
use freelist::FreeLists;
use std::mem;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use tag::Tag;

fn pad(size: usize, align: usize) -> usize {
    let rem = size % align;
    if rem == 0 {
        size
    } else {
        size + (align - rem)
    }
}

const WORD: usize = mem::size_of::<usize>();

/// How far a multi-segment zone is allowed to claim it has available:
/// the upstream code returns this sentinel rather than an exact count
/// since an unbounded zone can always grow.
pub const UNBOUNDED_AVAILABLE: usize = 1024 * 1024 * 1024;

/// One zone instance: a chain of OS-backed segments, threaded into a
/// single block list, with segregated free lists for fast reuse.
pub struct Zone {
    segments: Vec<Reservation>,
    free_lists: FreeLists,
    first_block: Option<NonNull<BlockHeader>>,
    last_block: Option<NonNull<BlockHeader>>,
    used: usize,
    size: usize,
    min_fragment: usize,
    multi_segment: bool,
    sink: Rc<dyn ErrorSink>,
    pub stats: ZoneStats,
}

impl Zone {
    pub fn new(
        initial_bytes: usize,
        min_fragment: usize,
        multi_segment: bool,
        direction: SearchDirection,
        sink: Rc<dyn ErrorSink>,
    ) -> Zone {
        let boundaries = match direction {
            SearchDirection::Forward => {
                vec![crate::config::FORWARD_SMALL_SIZE, crate::config::FORWARD_MEDIUM_SIZE]
            }
            SearchDirection::Backward => vec![
                crate::config::BACKWARD_TINY_SIZE,
                crate::config::BACKWARD_SMALL_SIZE,
                crate::config::BACKWARD_MEDIUM_SIZE,
            ],
        };
        // A split remainder must always be large enough to host a
        // header plus a free-list link, or it couldn't be reinserted
        // as a free block of its own; pad the caller's tuning value up
        // to that floor rather than trusting it blindly.
        let min_fragment = pad(min_fragment.max(HEADER_SIZE + FREE_LINK_SIZE), WORD);
        let mut zone = Zone {
            segments: Vec::new(),
            free_lists: FreeLists::new(boundaries, direction),
            first_block: None,
            last_block: None,
            used: 0,
            size: 0,
            min_fragment,
            multi_segment,
            sink,
            stats: ZoneStats::default(),
        };
        unsafe {
            zone.add_segment(initial_bytes, false);
        }
        zone
    }

    /// Reserves a new OS segment large enough to hold `min_payload`
    /// bytes (rounded up to the growth chunk when this isn't the
    /// zone's first segment), formats it as one giant free block, and
    /// links it onto the end of the block list. When `separator` is
    /// set, a zero-payload in-use block is inserted first so the new
    /// free block can never coalesce backward into the previous
    /// segment's tail.
    unsafe fn add_segment(&mut self, min_payload: usize, separator: bool) {
        let payload = if separator {
            pad(min_payload.max(crate::config::SEGMENT_GROW_BYTES), crate::config::SEGMENT_GROW_BYTES)
        } else {
            min_payload
        };
        let sep_bytes = if separator { HEADER_SIZE } else { 0 };
        let reserve_len = sep_bytes + payload;
        let mut reservation = match Reservation::new(reserve_len) {
            Some(r) => r,
            None => self.sink.fatal("out of memory reserving a zone segment"),
        };
        let base = reservation.as_mut_ptr();

        let prev_tail = self.last_block;
        let free_block_ptr;
        if separator {
            let sep_ptr = base as *mut BlockHeader;
            let sep = NonNull::new_unchecked(sep_ptr);
            ptr::write(
                sep_ptr,
                BlockHeader {
                    next: None,
                    prev: prev_tail,
                    size: HEADER_SIZE,
                    tag: Tag::General,
                    id: -ZONEID,
                },
            );
            if let Some(last) = prev_tail {
                (*last.as_ptr()).next = Some(sep);
            } else {
                self.first_block = Some(sep);
            }
            free_block_ptr = base.add(HEADER_SIZE) as *mut BlockHeader;
            ptr::write(
                free_block_ptr,
                BlockHeader {
                    next: None,
                    prev: Some(sep),
                    size: payload,
                    tag: Tag::Free,
                    id: ZONEID,
                },
            );
            (*sep_ptr).next = Some(NonNull::new_unchecked(free_block_ptr));
        } else {
            free_block_ptr = base as *mut BlockHeader;
            ptr::write(
                free_block_ptr,
                BlockHeader {
                    next: None,
                    prev: None,
                    size: payload,
                    tag: Tag::Free,
                    id: ZONEID,
                },
            );
            self.first_block = Some(NonNull::new_unchecked(free_block_ptr));
        }
        let free_block = NonNull::new_unchecked(free_block_ptr);
        self.last_block = Some(free_block);
        self.size += payload;
        self.free_lists.insert(free_block);
        self.stats.segments.increase(1);
        self.segments.push(reservation);
    }

    /// Total bytes requested at the header level, given a caller's
    /// payload size: headered, sentineled, floored at whatever a
    /// free-list node needs so a future free can always re-link it,
    /// and only then rounded up to a word — matching `Z_TagMalloc`'s
    /// `PAD(size, sizeof(intptr_t))` as the last step, so every block's
    /// total size (and therefore every following block's address)
    /// stays word-aligned regardless of whether the trash sentinel is
    /// compiled in.
    fn block_size_for(&self, size: usize) -> usize {
        let mut total = size + HEADER_SIZE;
        if cfg!(feature = "trash-sentinel") {
            total += 4;
        }
        total = total.max(HEADER_SIZE + FREE_LINK_SIZE);
        pad(total, WORD)
    }

    /// Allocates `size` bytes tagged `tag`. Never returns a null
    /// pointer — running out of segment room is fatal for a
    /// non-growing zone, and a growing zone always succeeds by
    /// reserving another segment.
    pub fn alloc(&mut self, size: usize, tag: Tag) -> NonNull<u8> {
        if tag == Tag::Free {
            self.sink.fatal("zone_alloc called with the free tag");
        }
        let total = self.block_size_for(size);
        let block = unsafe {
            match self.free_lists.find(total) {
                Some(b) => b,
                None => {
                    if !self.multi_segment {
                        self.sink.fatal("zone exhausted and growth is disabled");
                    }
                    self.add_segment(total, true);
                    self.free_lists
                        .find(total)
                        .expect("segment growth must satisfy the requesting allocation")
                }
            }
        };
        unsafe {
            self.free_lists.remove(block);
            let extra = block.as_ref().size - total;
            if extra >= self.min_fragment {
                self.split(block, total, extra);
            }
            (*block.as_ptr()).tag = tag;
            (*block.as_ptr()).id = ZONEID;
            if cfg!(feature = "trash-sentinel") {
                write_trash(block);
            }
            self.used += block.as_ref().size;
            self.stats.used.update(block.as_ref().size as i64);
            NonNull::new_unchecked(payload_ptr(block))
        }
    }

    /// Splits `extra` trailing bytes off `block` (whose size is
    /// shrunk to `keep`) into a new free block reinserted into the
    /// free lists.
    unsafe fn split(&mut self, block: NonNull<BlockHeader>, keep: usize, extra: usize) {
        let new_ptr = (block.as_ptr() as *mut u8).add(keep) as *mut BlockHeader;
        let next = block.as_ref().next;
        ptr::write(
            new_ptr,
            BlockHeader {
                next,
                prev: Some(block),
                size: extra,
                tag: Tag::Free,
                id: ZONEID,
            },
        );
        let new_block = NonNull::new_unchecked(new_ptr);
        match next {
            Some(n) => (*n.as_ptr()).prev = Some(new_block),
            None => self.last_block = Some(new_block),
        }
        (*block.as_ptr()).next = Some(new_block);
        (*block.as_ptr()).size = keep;
        self.free_lists.insert(new_block);
        self.stats.blocks_split.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Allocates zero-filled memory tagged [`Tag::General`].
    pub fn alloc_clear(&mut self, size: usize) -> NonNull<u8> {
        let p = self.alloc(size, Tag::General);
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0, size);
        }
        p
    }

    /// Allocates memory tagged [`Tag::Small`], not zero-filled.
    pub fn small_alloc(&mut self, size: usize) -> NonNull<u8> {
        self.alloc(size, Tag::Small)
    }

    /// Frees a pointer previously returned by this zone. A null
    /// pointer is reported through the drop sink and otherwise
    /// ignored; anything indicating corruption is fatal.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), DropError> {
        if ptr.is_null() {
            self.sink.drop_error(DropError::FreeNull);
            return Err(DropError::FreeNull);
        }
        unsafe {
            let mut block = NonNull::new_unchecked(ptr.sub(HEADER_SIZE) as *mut BlockHeader);
            if block.as_ref().id != ZONEID {
                self.sink.fatal("zone_free: bad block id, heap corruption or wild pointer");
            }
            if block.as_ref().tag == Tag::Free {
                self.sink.fatal("zone_free: double free");
            }
            if block.as_ref().tag == Tag::Static {
                return Ok(());
            }
            if cfg!(feature = "trash-sentinel") && read_trash(block) != ZONEID as u32 {
                self.sink.fatal("zone_free: trash sentinel corrupted, buffer overrun");
            }

            let payload_len = block.as_ref().size - HEADER_SIZE
                - if cfg!(feature = "trash-sentinel") { 4 } else { 0 };
            ptr::write_bytes(payload_ptr(block), 0xAA, payload_len);

            self.used -= block.as_ref().size;
            self.stats.used.update(-(block.as_ref().size as i64));
            (*block.as_ptr()).tag = Tag::Free;

            if let Some(prev) = block.as_ref().prev {
                if prev.as_ref().is_free() {
                    self.free_lists.remove(prev);
                    self.merge(prev, block);
                    block = prev;
                    self.stats.blocks_coalesced.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            if let Some(next) = block.as_ref().next {
                if next.as_ref().is_free() {
                    self.free_lists.remove(next);
                    self.merge(block, next);
                    self.stats.blocks_coalesced.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            self.free_lists.insert(block);
        }
        Ok(())
    }

    /// Absorbs `right` into `left`, which must immediately precede it
    /// in the block list. Neither side may currently be in a free
    /// list; the caller removes them first.
    unsafe fn merge(&mut self, left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) {
        let right_next = right.as_ref().next;
        (*left.as_ptr()).size += right.as_ref().size;
        (*left.as_ptr()).next = right_next;
        match right_next {
            Some(n) => (*n.as_ptr()).prev = Some(left),
            None => self.last_block = Some(left),
        }
    }

    /// Frees every live block tagged `tag`, returning how many were
    /// freed. The walk survives the coalescing that [`Zone::free`]
    /// performs by resuming from whichever neighbour absorbed the
    /// freed block, exactly as [`Zone::free`] itself decides.
    pub fn free_tags(&mut self, tag: Tag) -> usize {
        if tag == Tag::Static {
            self.sink.fatal("zone_free_tags: cannot bulk-free static blocks");
        }
        let mut count = 0usize;
        let mut cursor = self.first_block;
        unsafe {
            while let Some(block) = cursor {
                let next_in_list = block.as_ref().next;
                if block.as_ref().id == ZONEID && block.as_ref().tag == tag {
                    let resume = match block.as_ref().prev {
                        Some(p) if p.as_ref().is_free() => p,
                        _ => block,
                    };
                    let _ = self.free(payload_ptr(block));
                    count += 1;
                    cursor = resume.as_ref().next;
                } else {
                    cursor = next_in_list;
                }
            }
        }
        count
    }

    /// Bytes free for allocation. A growing zone reports a large
    /// sentinel instead of an exact count, since it can always reserve
    /// another segment.
    pub fn available(&self) -> usize {
        if self.multi_segment {
            UNBOUNDED_AVAILABLE
        } else {
            self.size - self.used
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Debug validator: walks the block list checking address
    /// contiguity (skipped across segment separators), backlink
    /// consistency, and the no-two-consecutive-free invariant, then
    /// cross-checks every free block against the segregated free
    /// lists in both directions (every free block tracked exactly
    /// once, nothing tracked that isn't actually free). Returns the
    /// first violation found, if any; does not itself call the fatal
    /// sink, so tests and diagnostics can inspect the result.
    pub fn check(&self) -> Result<(), String> {
        let mut free_in_list = std::collections::HashSet::new();
        unsafe {
            self.free_lists.validate()?;
            for b in self.free_lists.iter_all() {
                if !b.as_ref().is_free() {
                    return Err(format!("block at {:p} is in a free list but not tagged Free", b.as_ptr()));
                }
                if !free_in_list.insert(b.as_ptr() as usize) {
                    return Err(format!("block at {:p} appears twice across the free lists", b.as_ptr()));
                }
            }

            let mut cursor = self.first_block;
            while let Some(block) = cursor {
                let next = block.as_ref().next;
                if block.as_ref().is_free() && !free_in_list.remove(&(block.as_ptr() as usize)) {
                    return Err(format!("free block at {:p} is not tracked in any free list", block.as_ptr()));
                }
                if let Some(n) = next {
                    if !n.as_ref().is_separator() {
                        let end = (block.as_ptr() as *const u8).add(block.as_ref().size);
                        if end != n.as_ptr() as *const u8 {
                            return Err(format!(
                                "block at {:p} (size {}) does not end where {:p} begins",
                                block.as_ptr(),
                                block.as_ref().size,
                                n.as_ptr()
                            ));
                        }
                    }
                    match n.as_ref().prev {
                        Some(p) if p == block => {}
                        _ => {
                            return Err(format!(
                                "block at {:p}'s next does not link back to it",
                                block.as_ptr()
                            ))
                        }
                    }
                    if block.as_ref().is_free() && n.as_ref().is_free() {
                        return Err(format!(
                            "two consecutive free blocks at {:p} and {:p}",
                            block.as_ptr(),
                            n.as_ptr()
                        ));
                    }
                }
                cursor = next;
            }
        }
        if !free_in_list.is_empty() {
            return Err(format!("{} free-list entries do not correspond to a live block", free_in_list.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoggingErrorSink;

    fn new_zone(bytes: usize) -> Zone {
        Zone::new(bytes, crate::config::MINFRAGMENT, true, SearchDirection::Forward, Rc::new(LoggingErrorSink))
    }

    #[test]
    fn split_and_coalesce_round_trip() {
        let mut zone = new_zone(1024 * 1024);
        let a = zone.alloc(100, Tag::General);
        let b = zone.alloc(100, Tag::General);
        let c = zone.alloc(100, Tag::General);
        zone.free(b.as_ptr()).unwrap();
        zone.free(a.as_ptr()).unwrap();
        assert!(zone.check().is_ok());
        let used_with_c_only = zone.used();
        zone.free(c.as_ptr()).unwrap();
        assert_eq!(zone.used(), used_with_c_only - zone.block_size_for(100));
        assert_eq!(zone.used(), 0);
    }

    #[test]
    fn tag_sweep_frees_only_matching_blocks() {
        let mut zone = new_zone(1024 * 1024);
        let r1 = zone.alloc(64, Tag::Renderer);
        let _g1 = zone.alloc(64, Tag::General);
        let r2 = zone.alloc(64, Tag::Renderer);
        let _g2 = zone.alloc(64, Tag::General);
        let r3 = zone.alloc(64, Tag::Renderer);
        let _ = (r1, r2, r3);

        let count = zone.free_tags(Tag::Renderer);
        assert_eq!(count, 3);
        assert!(zone.check().is_ok());
    }

    #[test]
    fn static_string_free_is_a_no_op() {
        let mut zone = new_zone(1024 * 1024);
        let used_before = zone.used();
        let ptr = static_strings::digit_string(3).unwrap() as *mut u8;
        zone.free(ptr).unwrap();
        assert_eq!(zone.used(), used_before);
    }

    #[test]
    fn growth_adds_a_segment_with_a_separator() {
        let mut zone = new_zone(4096);
        let mut ptrs = Vec::new();
        for _ in 0..2000 {
            ptrs.push(zone.alloc(64, Tag::General));
        }
        assert!(zone.segments.len() > 1);
        assert!(zone.check().is_ok());
    }

    #[test]
    fn null_free_reports_drop_error() {
        let mut zone = new_zone(4096);
        let err = zone.free(ptr::null_mut()).unwrap_err();
        assert_eq!(err, DropError::FreeNull);
    }

    #[test]
    fn block_sizes_stay_word_aligned_under_odd_payloads() {
        // Odd-sized payloads used to leave `block_size_for` 4 bytes
        // short of a word multiple whenever the trash sentinel was
        // compiled in, misaligning every block placed after it.
        let mut zone = new_zone(1024 * 1024);
        for payload in [1usize, 3, 7, 13, 33, 99, 257] {
            assert_eq!(zone.block_size_for(payload) % WORD, 0, "payload {} produced an unaligned block size", payload);
            let p = zone.alloc(payload, Tag::General);
            assert_eq!((p.as_ptr() as usize) % WORD, 0, "payload {} produced an unaligned pointer", payload);
        }
        assert!(zone.check().is_ok());
    }

    #[test]
    fn free_blocks_of_every_size_class_stay_correctly_filed() {
        // Mix of payload sizes that land a freed block in each of the
        // forward-search free-list classes (small, medium, large).
        let mut zone = new_zone(1024 * 1024);
        let tiny = zone.alloc(16, Tag::General);
        let mid = zone.alloc(96, Tag::General);
        let big = zone.alloc(4096, Tag::General);
        zone.free(tiny.as_ptr()).unwrap();
        assert!(zone.check().is_ok());
        zone.free(big.as_ptr()).unwrap();
        assert!(zone.check().is_ok());
        zone.free(mid.as_ptr()).unwrap();
        assert!(zone.check().is_ok());
        assert_eq!(zone.used(), 0);
    }
}
