//! Double-ended stack allocator over one pre-reserved region.
//!
//! The hunk reserves a single contiguous slab up front and serves two
//! very different lifetimes out of it: long-lived "permanent" state
//! (never individually freed, only ever rolled back to a mark) and
//! short-lived "temp" scratch space (freed in roughly LIFO order, e.g.
//! while loading one file at a time). Two cursors grow toward each
//! other from opposite ends of the slab; which end currently plays
//! which role can flip via [`Hunk::swap_banks`] to keep the side with
//! more wasted high-water space from starving the other.
//!
//! Before [`Hunk::init`] has run, both temp entry points transparently
//! fall back to the zone allocator — [`Hunk::alloc_temp`] to
//! [`Zone::alloc_clear`] and [`Hunk::free_temp`] to [`Zone::free`].
//! That asymmetry (one delegates to a zeroing allocation, the other to
//! plain free) is inherited as-is rather than "fixed", since callers on
//! either side of `com_init` rely on it.

use crate::config;
use crate::error::{DropError, ErrorSink};
use crate::os::Reservation;
use crate::stats::HunkBankStats;
use crate::zone::Zone;
use std::mem;
use std::ptr::{self, NonNull};
use std::rc::Rc;

const HUNK_MAGIC: u32 = 0x8953_7892;
const HUNK_FREE_MAGIC: u32 = 0x8953_7893;
const CACHE_LINE: usize = 64;

#[repr(C)]
struct TempHeader {
    magic: u32,
    size: usize,
}

const TEMP_HEADER_SIZE: usize = mem::size_of::<TempHeader>();

/// Which physical end of the slab an allocation should prefer; the
/// permanent-allocation API only, temp allocations always go to
/// whichever side currently holds the temp role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Low,
    High,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Low,
    High,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bank {
    permanent: usize,
    temp: usize,
    temp_highwater: usize,
    mark: usize,
}

/// The hunk allocator. Constructed uninitialised; [`Hunk::init`] must
/// run before permanent allocations are possible (temp allocations work
/// immediately, by falling back to the zone).
pub struct Hunk {
    reservation: Option<Reservation>,
    base: *mut u8,
    total: usize,
    low: Bank,
    high: Bank,
    permanent_side: Side,
    sink: Rc<dyn ErrorSink>,
    pub low_stats: HunkBankStats,
    pub high_stats: HunkBankStats,
}

fn align_up(size: usize, align: usize) -> usize {
    let rem = size % align;
    if rem == 0 {
        size
    } else {
        size + (align - rem)
    }
}

fn align_up_ptr(ptr: *mut u8, align: usize) -> *mut u8 {
    let addr = ptr as usize;
    align_up(addr, align) as *mut u8
}

impl Hunk {
    pub fn new(sink: Rc<dyn ErrorSink>) -> Hunk {
        Hunk {
            reservation: None,
            base: ptr::null_mut(),
            total: 0,
            low: Bank::default(),
            high: Bank::default(),
            permanent_side: Side::Low,
            sink,
            low_stats: HunkBankStats::default(),
            high_stats: HunkBankStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// Reserves `total_bytes` (plus cache-line padding for alignment)
    /// from the OS and clears the hunk to its just-booted state.
    pub fn init(&mut self, total_bytes: usize) {
        let mut reservation = match Reservation::new(total_bytes + (CACHE_LINE - 1)) {
            Some(r) => r,
            None => self.sink.fatal("out of memory reserving the hunk"),
        };
        let raw = reservation.as_mut_ptr();
        self.base = align_up_ptr(raw, CACHE_LINE);
        self.total = total_bytes;
        self.reservation = Some(reservation);
        self.clear();
    }

    /// Resets both banks to empty and hands the permanent role back to
    /// the low side. Callers are expected to have released anything
    /// holding pointers into the hunk first.
    pub fn clear(&mut self) {
        self.low = Bank::default();
        self.high = Bank::default();
        self.permanent_side = Side::Low;
    }

    fn bank(&self, side: Side) -> &Bank {
        match side {
            Side::Low => &self.low,
            Side::High => &self.high,
        }
    }

    fn bank_mut(&mut self, side: Side) -> &mut Bank {
        match side {
            Side::Low => &mut self.low,
            Side::High => &mut self.high,
        }
    }

    fn permanent_side(&self) -> Side {
        self.permanent_side
    }

    fn temp_side(&self) -> Side {
        self.permanent_side.other()
    }

    pub fn set_mark(&mut self) {
        self.low.mark = self.low.permanent;
        self.high.mark = self.high.permanent;
    }

    pub fn clear_to_mark(&mut self) {
        self.low.permanent = self.low.mark;
        self.low.temp = self.low.mark;
        self.high.permanent = self.high.mark;
        self.high.temp = self.high.mark;
    }

    pub fn check_mark(&self) -> bool {
        self.low.mark != 0 || self.high.mark != 0
    }

    pub fn memory_remaining(&self) -> usize {
        let low = self.low.permanent.max(self.low.temp);
        let high = self.high.permanent.max(self.high.temp);
        self.total.saturating_sub(low + high)
    }

    /// Moves the permanent role to whichever side currently has the
    /// larger gap between its high-water temp usage and its permanent
    /// usage — that side has more reclaimable slack, so it's cheaper
    /// for it to keep growing as the permanent side. No-op while the
    /// current temp side still has anything live on it.
    fn swap_banks(&mut self) {
        let temp_side = self.temp_side();
        let perm_side = self.permanent_side();
        if self.bank(temp_side).temp != self.bank(temp_side).permanent {
            return;
        }
        let temp_waste = self.bank(temp_side).temp_highwater as i64 - self.bank(temp_side).permanent as i64;
        let perm_waste = self.bank(perm_side).temp_highwater as i64 - self.bank(perm_side).permanent as i64;
        if temp_waste > perm_waste {
            self.permanent_side = temp_side;
        }
    }

    /// Allocates permanent, zero-filled, 64-byte aligned memory.
    /// Fatal if the hunk hasn't been initialised; a drop error if the
    /// request would overrun the reserved region.
    pub fn alloc(&mut self, size: usize, preference: Preference) -> Result<NonNull<u8>, DropError> {
        if !self.is_initialized() {
            self.sink.fatal("hunk_alloc: hunk memory system not initialized");
        }
        let temp_side = self.temp_side();
        if preference == Preference::DontCare || self.bank(temp_side).temp != self.bank(temp_side).permanent {
            self.swap_banks();
        } else if preference == Preference::Low && self.permanent_side() != Side::Low {
            self.swap_banks();
        } else if preference == Preference::High && self.permanent_side() != Side::High {
            self.swap_banks();
        }

        let size = align_up(size, CACHE_LINE);
        if self.low.temp + self.high.temp + size > self.total {
            let err = DropError::HunkExhausted {
                requested: size,
                remaining: self.memory_remaining(),
            };
            self.sink.drop_error(err);
            return Err(err);
        }

        let side = self.permanent_side();
        let offset = match side {
            Side::Low => {
                let offset = self.low.permanent;
                self.low.permanent += size;
                offset
            }
            Side::High => {
                self.high.permanent += size;
                self.total - self.high.permanent
            }
        };
        let bank = self.bank_mut(side);
        bank.temp = bank.permanent;
        let stats = match side {
            Side::Low => &self.low_stats,
            Side::High => &self.high_stats,
        };
        stats.permanent.increase(size as i64);

        unsafe {
            let p = self.base.add(offset);
            ptr::write_bytes(p, 0, size);
            Ok(NonNull::new_unchecked(p))
        }
    }

    /// Allocates short-lived scratch memory. Before [`Hunk::init`] has
    /// run, delegates to `zone.alloc_clear` so early-boot code that
    /// doesn't know the hunk isn't ready yet still gets memory it can
    /// free symmetrically through [`Hunk::free_temp`].
    pub fn alloc_temp(&mut self, size: usize, zone: &mut Zone) -> Result<NonNull<u8>, DropError> {
        if !self.is_initialized() {
            return Ok(zone.alloc_clear(size));
        }
        self.swap_banks();
        let payload = align_up(size, mem::size_of::<usize>());
        let framed = payload + TEMP_HEADER_SIZE;

        let perm_side = self.permanent_side();
        let side = self.temp_side();
        if self.bank(side).temp + self.bank(perm_side).permanent + framed > self.total {
            let err = DropError::HunkExhausted {
                requested: framed,
                remaining: self.memory_remaining(),
            };
            self.sink.drop_error(err);
            return Err(err);
        }

        let frame_offset = match side {
            Side::Low => {
                let offset = self.bank(side).temp;
                self.bank_mut(side).temp += framed;
                offset
            }
            Side::High => {
                self.bank_mut(side).temp += framed;
                self.total - self.bank(side).temp
            }
        };
        if self.bank(side).temp > self.bank(side).temp_highwater {
            self.bank_mut(side).temp_highwater = self.bank(side).temp;
        }
        let stats = match side {
            Side::Low => &self.low_stats,
            Side::High => &self.high_stats,
        };
        stats.temp.increase(framed as i64);

        unsafe {
            let header_ptr = self.base.add(frame_offset) as *mut TempHeader;
            ptr::write(
                header_ptr,
                TempHeader {
                    magic: HUNK_MAGIC,
                    size: framed,
                },
            );
            Ok(NonNull::new_unchecked(header_ptr.add(1) as *mut u8))
        }
    }

    /// Frees scratch memory from [`Hunk::alloc_temp`]. Before
    /// [`Hunk::init`] has run, delegates to `zone.free` — the
    /// counterpart to `alloc_temp`'s delegation to `zone.alloc_clear`,
    /// preserved even though the two fallbacks aren't symmetric
    /// (`zone.alloc_clear` zero-fills, `zone.free` doesn't re-zero).
    /// Only a frame at the current top of its bank's temp stack
    /// rolls the cursor back immediately; anything else is reclaimed
    /// lazily the next time [`Hunk::clear_temp`] runs.
    pub fn free_temp(&mut self, ptr: *mut u8, zone: &mut Zone) -> Result<(), DropError> {
        if !self.is_initialized() {
            return zone.free(ptr);
        }
        unsafe {
            let header_ptr = (ptr as *mut TempHeader).offset(-1);
            if (*header_ptr).magic != HUNK_MAGIC {
                self.sink.fatal("hunk_free_temp: bad magic, heap corruption or double free");
            }
            (*header_ptr).magic = HUNK_FREE_MAGIC;
            let size = (*header_ptr).size;

            let side = self.temp_side();
            let topmost = match side {
                Side::Low => header_ptr as *mut u8 == self.base.add(self.low.temp - size),
                Side::High => header_ptr as *mut u8 == self.base.add(self.total - self.high.temp),
            };
            if topmost {
                self.bank_mut(side).temp -= size;
            }
        }
        Ok(())
    }

    /// Drops every live temp allocation on the current temp side at
    /// once, including ones `free_temp` couldn't roll back immediately.
    pub fn clear_temp(&mut self) {
        if !self.is_initialized() {
            return;
        }
        let side = self.temp_side();
        let permanent = self.bank(side).permanent;
        self.bank_mut(side).temp = permanent;
    }
}
