//! Raw OS memory reservation.
//!
//! Both the zone and the hunk reserve their backing storage directly from
//! the operating system rather than through the global Rust allocator —
//! that would defeat the point of replacing it. This module is the single
//! place that knows how to do that on each platform.

#[cfg(not(windows))]
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
#[cfg(windows)]
use winapi::{
    shared::minwindef::LPVOID,
    um::memoryapi::{VirtualAlloc, VirtualFree},
    um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
};

use log::warn;
use std::ptr::{self, NonNull};

/// Smallest unit the OS will reserve in; requests are rounded up to it.
#[cfg(not(windows))]
const ALLOC_GRANULARITY: usize = 4096;
#[cfg(windows)]
const ALLOC_GRANULARITY: usize = 64 * 1024;

fn align_up(size: usize, align: usize) -> usize {
    let rem = size % align;
    if rem == 0 {
        size
    } else {
        size + (align - rem)
    }
}

/// A single OS-backed reservation. Released on drop.
pub struct Reservation {
    ptr: NonNull<u8>,
    len: usize,
}

// The reservation itself only ever hands out raw bytes; sharing it across
// threads is the caller's problem, matching the single-threaded contract
// the rest of this crate assumes.
unsafe impl Send for Reservation {}

impl Reservation {
    /// Reserves and commits at least `requested` bytes from the OS.
    /// Returns `None` on failure; the caller turns that into whatever the
    /// installed error sink considers appropriate (usually fatal).
    pub fn new(requested: usize) -> Option<Reservation> {
        if requested == 0 {
            return None;
        }
        let len = align_up(requested, ALLOC_GRANULARITY);
        let ptr = unsafe { os_alloc(len) };
        let ptr = NonNull::new(ptr)?;
        Some(Reservation { ptr, len })
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe {
            os_free(self.ptr.as_ptr(), self.len);
        }
    }
}

#[cfg(not(windows))]
unsafe fn os_alloc(len: usize) -> *mut u8 {
    let p = mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
    );
    if p == MAP_FAILED {
        warn!("mmap failed for {} bytes: {}", len, errno::errno());
        return ptr::null_mut();
    }
    p as *mut u8
}

#[cfg(not(windows))]
unsafe fn os_free(addr: *mut u8, len: usize) {
    if munmap(addr as *mut _, len) != 0 {
        warn!("munmap failed for {:p}, {} bytes: {}", addr, len, errno::errno());
    }
}

#[cfg(windows)]
unsafe fn os_alloc(len: usize) -> *mut u8 {
    let p = VirtualAlloc(
        ptr::null_mut(),
        len,
        MEM_RESERVE | MEM_COMMIT,
        PAGE_READWRITE,
    );
    if p.is_null() {
        warn!("VirtualAlloc failed for {} bytes", len);
        return ptr::null_mut();
    }
    p as *mut u8
}

#[cfg(windows)]
unsafe fn os_free(addr: *mut u8, _len: usize) {
    if VirtualFree(addr as LPVOID, 0, MEM_RELEASE) == 0 {
        warn!("VirtualFree failed for {:p}", addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_at_least_requested_bytes() {
        let r = Reservation::new(100).expect("reservation should succeed");
        assert!(r.len() >= 100);
    }

    #[test]
    fn zero_request_returns_none() {
        assert!(Reservation::new(0).is_none());
    }
}
