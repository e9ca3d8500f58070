//! Compile-time interned blocks for the empty string and the ten single
//! ASCII digits. Callers who only ever need one of these eleven values
//! can get a pointer straight into program storage instead of routing a
//! throwaway allocation through the zone; [`super::Zone::free`] treats
//! them as a no-op because their tag is [`Tag::Static`].
//!
//! A `StaticString` is laid out exactly like a real block — header
//! immediately followed by payload — so the generic free path doesn't
//! need to know these are special until it reads the tag.

use super::block::{BlockHeader, ZONEID};
use super::tag::Tag;

#[repr(C)]
pub struct StaticString {
    header: BlockHeader,
    payload: [u8; 2],
}

// Safety: these are immutable for the lifetime of the program; the only
// operation ever performed on them is a tag read followed by a no-op.
unsafe impl Sync for StaticString {}

const fn make(ch: u8) -> StaticString {
    StaticString {
        header: BlockHeader {
            next: None,
            prev: None,
            size: std::mem::size_of::<BlockHeader>() + 2,
            tag: Tag::Static,
            id: ZONEID,
        },
        payload: [ch, 0],
    }
}

static EMPTY_STRING: StaticString = make(0);

static DIGIT_STRINGS: [StaticString; 10] = [
    make(b'0'),
    make(b'1'),
    make(b'2'),
    make(b'3'),
    make(b'4'),
    make(b'5'),
    make(b'6'),
    make(b'7'),
    make(b'8'),
    make(b'9'),
];

/// Pointer to the interned empty string's payload.
pub fn empty_string() -> *const u8 {
    EMPTY_STRING.payload.as_ptr()
}

/// Pointer to the interned single-digit string for `0..=9`; returns
/// `None` outside that range, leaving the caller to allocate normally.
pub fn digit_string(digit: u8) -> Option<*const u8> {
    if digit > 9 {
        return None;
    }
    Some(DIGIT_STRINGS[digit as usize].payload.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::block::BlockHeader;

    #[test]
    fn static_strings_carry_a_static_tag() {
        unsafe {
            let p = digit_string(3).unwrap();
            let header = (p as *const u8).sub(std::mem::size_of::<BlockHeader>()) as *const BlockHeader;
            assert_eq!((*header).tag, Tag::Static);
            assert_eq!((*header).id, ZONEID);
        }
    }

    #[test]
    fn out_of_range_digit_is_none() {
        assert!(digit_string(10).is_none());
    }
}
