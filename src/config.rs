//! Tuning constants, collected in one place rather than scattered through
//! the allocation hot path.

const MIB: usize = 1024 * 1024;

/// Default size of the main zone, in bytes.
pub const DEF_COMZONEMEGS: usize = 12;
/// Fixed size of the small zone; never resized.
pub const SMALL_ZONE_BYTES: usize = 512 * 1024;

/// Hard floor below which a configured hunk size is rejected.
pub const MIN_COMHUNKMEGS: usize = 48;
/// Default hunk size used when the caller doesn't override it.
pub const DEF_COMHUNKMEGS: usize = 56;

/// Smallest fragment worth splitting off a block during allocation; a
/// remainder below this is left attached to the allocated block instead.
pub const MINFRAGMENT: usize = 64;

/// Segments beyond the initial one grow in chunks of this size.
pub const SEGMENT_GROW_BYTES: usize = 2 * MIB;

/// Size-class boundaries for the segregated free lists, forward-search
/// variant (the default: optimises for allocation speed over
/// consolidation, see [`SearchDirection`]).
pub const FORWARD_SMALL_SIZE: usize = 64;
pub const FORWARD_MEDIUM_SIZE: usize = 128;

/// Size-class boundaries for the backward-search variant.
pub const BACKWARD_TINY_SIZE: usize = 64;
pub const BACKWARD_SMALL_SIZE: usize = 128;
pub const BACKWARD_MEDIUM_SIZE: usize = 256;

/// Which end of each segregated free list new entries are searched from.
/// Forward favours finding recently freed blocks quickly; backward
/// favours consolidation. This crate defaults to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

impl Default for SearchDirection {
    fn default() -> Self {
        SearchDirection::Forward
    }
}

/// Every size/behavior knob an embedding application can override before
/// calling [`crate::init::com_init`]. `Config::default()` reproduces the
/// stock sizing exactly.
#[derive(Debug, Clone)]
pub struct Config {
    pub zone_megs: usize,
    pub hunk_megs: usize,
    pub search_direction: SearchDirection,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            zone_megs: DEF_COMZONEMEGS,
            hunk_megs: DEF_COMHUNKMEGS,
            search_direction: SearchDirection::default(),
        }
    }
}

impl Config {
    pub fn zone_bytes(&self) -> usize {
        self.zone_megs * MIB
    }

    /// Clamps the configured hunk size to the floor required by
    /// `MIN_COMHUNKMEGS`, matching the upstream `Cvar` clamp.
    pub fn hunk_bytes(&self) -> usize {
        self.hunk_megs.max(MIN_COMHUNKMEGS) * MIB
    }
}
