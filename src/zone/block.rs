//! In-band block header and the free-list link overlaid on a free
//! block's payload.

use super::tag::Tag;
use std::mem;
use std::ptr::NonNull;

/// Sentinel stamped into `id` for live blocks, and negated for the
/// zero-payload separators placed between segments.
pub const ZONEID: i64 = 0x1d4a11;

/// Block header, always present at the start of a block regardless of
/// whether the block is free or in use.
#[repr(C)]
pub struct BlockHeader {
    pub next: Option<NonNull<BlockHeader>>,
    pub prev: Option<NonNull<BlockHeader>>,
    /// Total bytes occupied by this block, header through trailing
    /// trash sentinel (when enabled).
    pub size: usize,
    pub tag: Tag,
    pub id: i64,
}

pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Free-list link, overlaid on the first bytes of a free block's
/// payload (i.e. starting right after [`BlockHeader`]). Never read or
/// written while the block is in use.
#[repr(C)]
pub struct FreeLink {
    pub prev: Option<NonNull<FreeLink>>,
    pub next: Option<NonNull<FreeLink>>,
}

pub const FREE_LINK_SIZE: usize = mem::size_of::<FreeLink>();

impl BlockHeader {
    #[inline]
    pub fn is_separator(&self) -> bool {
        self.id == -ZONEID
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.tag == Tag::Free
    }
}

/// Converts a pointer to a block header into a pointer to its payload
/// (the byte immediately past the header).
#[inline]
pub unsafe fn payload_ptr(block: NonNull<BlockHeader>) -> *mut u8 {
    (block.as_ptr() as *mut u8).add(HEADER_SIZE)
}

/// Converts a pointer to a free block's payload back to its free-list
/// link view.
#[inline]
pub unsafe fn free_link_ptr(block: NonNull<BlockHeader>) -> NonNull<FreeLink> {
    NonNull::new_unchecked(payload_ptr(block) as *mut FreeLink)
}

/// Recovers the owning block header from a free-list link pointer.
#[inline]
pub unsafe fn block_of_free_link(link: NonNull<FreeLink>) -> NonNull<BlockHeader> {
    NonNull::new_unchecked((link.as_ptr() as *mut u8).sub(HEADER_SIZE) as *mut BlockHeader)
}

/// Reads the trailing trash sentinel, stored in the last 4 bytes of the
/// block (header + payload + sentinel all counted in `block.size`).
#[inline]
pub unsafe fn read_trash(block: NonNull<BlockHeader>) -> u32 {
    let size = block.as_ref().size;
    let p = (block.as_ptr() as *const u8).add(size - 4) as *const u32;
    p.read_unaligned()
}

#[inline]
pub unsafe fn write_trash(block: NonNull<BlockHeader>) {
    let size = block.as_ref().size;
    let p = (block.as_ptr() as *mut u8).add(size - 4) as *mut u32;
    p.write_unaligned(ZONEID as u32);
}

/// Reads a block's tag without validating its id, used to pick which
/// zone owns a pointer before dispatching a free to it.
#[inline]
pub unsafe fn peek_tag(ptr: *mut u8) -> Tag {
    (*(ptr.sub(HEADER_SIZE) as *const BlockHeader)).tag
}
