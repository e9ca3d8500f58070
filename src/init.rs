//! Process-wide bootstrap gluing the two zones and the hunk together.
//!
//! Mirrors the upstream boot order (small zone, then main zone, then
//! hunk) behind a single [`Runtime`] value an embedding application
//! owns for its whole lifetime. There is no teardown beyond dropping
//! it — the zones and the hunk release their OS reservations in their
//! own `Drop` impls.

use crate::config::Config;
use crate::error::{DropError, ErrorSink, LoggingErrorSink};
use crate::hunk::{Hunk, Preference};
use crate::zone::block::peek_tag;
use crate::zone::tag::Tag;
use crate::zone::{static_strings, Zone};
use std::ptr::NonNull;
use std::rc::Rc;

/// Owns the main zone, the small zone, and the hunk; the single entry
/// point an embedding application allocates through.
pub struct Runtime {
    main_zone: Zone,
    small_zone: Zone,
    hunk: Hunk,
    sink: Rc<dyn ErrorSink>,
}

impl Runtime {
    /// Boots a fresh runtime with the given configuration. Equivalent
    /// to `Com_InitSmallZoneMemory` + `Com_InitZoneMemory` +
    /// `Com_InitHunkMemory` run in sequence.
    pub fn new(config: Config, sink: Rc<dyn ErrorSink>) -> Runtime {
        let small_zone = Zone::new(
            crate::config::SMALL_ZONE_BYTES,
            crate::config::MINFRAGMENT,
            false,
            config.search_direction,
            sink.clone(),
        );
        let main_zone = Zone::new(
            config.zone_bytes(),
            crate::config::MINFRAGMENT,
            cfg!(feature = "multi-segment"),
            config.search_direction,
            sink.clone(),
        );
        let mut hunk = Hunk::new(sink.clone());
        hunk.init(config.hunk_bytes());
        Runtime {
            main_zone,
            small_zone,
            hunk,
            sink,
        }
    }

    /// Boots with the default configuration and the logging sink.
    pub fn with_defaults() -> Runtime {
        Runtime::new(Config::default(), Rc::new(LoggingErrorSink))
    }

    pub fn main_zone(&mut self) -> &mut Zone {
        &mut self.main_zone
    }

    pub fn small_zone(&mut self) -> &mut Zone {
        &mut self.small_zone
    }

    pub fn hunk(&mut self) -> &mut Hunk {
        &mut self.hunk
    }

    /// Zero-filled general-purpose allocation from the main zone.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.main_zone.alloc_clear(size)
    }

    /// Tagged allocation from the main zone, not zero-filled.
    pub fn tag_alloc(&mut self, size: usize, tag: Tag) -> NonNull<u8> {
        self.main_zone.alloc(size, tag)
    }

    /// Small, non-zero-filled allocation for short-lived strings.
    pub fn small_alloc(&mut self, size: usize) -> NonNull<u8> {
        self.small_zone.small_alloc(size)
    }

    /// Frees a pointer returned by any of the allocation methods above,
    /// selecting the owning zone by the tag stamped in its header
    /// (mirroring the upstream `tag == TAG_SMALL` dispatch) without
    /// requiring the caller to remember which zone it came from.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), DropError> {
        if ptr.is_null() {
            return self.main_zone.free(ptr);
        }
        let tag = unsafe { peek_tag(ptr) };
        if tag == Tag::Small {
            self.small_zone.free(ptr)
        } else {
            self.main_zone.free(ptr)
        }
    }

    pub fn free_tags(&mut self, tag: Tag) -> usize {
        self.main_zone.free_tags(tag) + self.small_zone.free_tags(tag)
    }

    pub fn zone_available(&self) -> usize {
        self.main_zone.available()
    }

    pub fn hunk_alloc(&mut self, size: usize, preference: Preference) -> Result<NonNull<u8>, DropError> {
        self.hunk.alloc(size, preference)
    }

    pub fn hunk_alloc_temp(&mut self, size: usize) -> Result<NonNull<u8>, DropError> {
        self.hunk.alloc_temp(size, &mut self.main_zone)
    }

    pub fn hunk_free_temp(&mut self, ptr: *mut u8) -> Result<(), DropError> {
        self.hunk.free_temp(ptr, &mut self.main_zone)
    }

    pub fn empty_string(&self) -> *const u8 {
        static_strings::empty_string()
    }

    pub fn digit_string(&self, digit: u8) -> Option<*const u8> {
        static_strings::digit_string(digit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tagged_allocations_are_freed_through_the_small_zone() {
        let mut rt = Runtime::with_defaults();
        let p = rt.small_alloc(8);
        assert!(rt.free(p.as_ptr()).is_ok());
    }

    #[test]
    fn general_allocations_are_freed_through_the_main_zone() {
        let mut rt = Runtime::with_defaults();
        let p = rt.alloc(128);
        assert!(rt.free(p.as_ptr()).is_ok());
    }

    #[test]
    fn hunk_and_zone_cooperate_through_the_runtime() {
        let mut rt = Runtime::with_defaults();
        let perm = rt.hunk_alloc(1024, Preference::Low).unwrap();
        let temp = rt.hunk_alloc_temp(256).unwrap();
        rt.hunk_free_temp(temp.as_ptr()).unwrap();
        let _ = perm;
    }
}
