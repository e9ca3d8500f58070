//! Property tests covering the block-list and hunk-bank invariants
//! from the allocator design: address contiguity, no two consecutive
//! free blocks, conservation of `used` across round trips, and hunk
//! bank ordering.

use corezone::hunk::Preference;
use corezone::zone::tag::Tag;
use corezone::{Config, PanicErrorSink, Runtime};
use proptest::prelude::*;
use std::rc::Rc;

#[derive(Debug, Clone)]
enum ZoneOp {
    Alloc(usize),
    FreeOldest,
}

fn zone_op_strategy() -> impl Strategy<Value = ZoneOp> {
    prop_oneof![
        (8usize..2048).prop_map(ZoneOp::Alloc),
        Just(ZoneOp::FreeOldest),
    ]
}

proptest! {
    /// After any sequence of allocations and frees, the block list
    /// still satisfies address contiguity (modulo separators) and
    /// never has two adjacent free blocks.
    #[test]
    fn zone_invariants_hold_after_any_sequence(ops in prop::collection::vec(zone_op_strategy(), 0..200)) {
        let mut rt = Runtime::with_defaults();
        let mut live: Vec<*mut u8> = Vec::new();

        for op in ops {
            match op {
                ZoneOp::Alloc(size) => {
                    let p = rt.tag_alloc(size, Tag::General);
                    live.push(p.as_ptr());
                }
                ZoneOp::FreeOldest => {
                    if !live.is_empty() {
                        let p = live.remove(0);
                        rt.free(p).unwrap();
                    }
                }
            }
            prop_assert!(rt.main_zone().check().is_ok());
        }

        // Round trip: free everything still outstanding and confirm
        // `used` returns to zero.
        for p in live {
            rt.free(p).unwrap();
        }
        prop_assert_eq!(rt.main_zone().used(), 0);
    }

    /// For any interleaving of hunk permanent/temp operations, both
    /// banks keep `temp >= permanent` and never overrun the reserved
    /// total.
    #[test]
    fn hunk_bank_invariants_hold(
        perm_sizes in prop::collection::vec(1usize..4096, 0..20),
        temp_sizes in prop::collection::vec(1usize..4096, 0..20),
    ) {
        let hunk_bytes = Config::default().hunk_bytes();
        let mut rt = Runtime::with_defaults();
        let mut temp_ptrs = Vec::new();

        for size in perm_sizes {
            if rt.hunk_alloc(size, Preference::DontCare).is_err() {
                break;
            }
        }
        for size in temp_sizes {
            match rt.hunk_alloc_temp(size) {
                Ok(p) => temp_ptrs.push(p.as_ptr()),
                Err(_) => break,
            }
        }

        // `memory_remaining` is computed with a saturating subtraction
        // and must never exceed the total reserved region.
        prop_assert!(rt.hunk().memory_remaining() <= hunk_bytes);

        for p in temp_ptrs {
            rt.hunk_free_temp(p).unwrap();
        }
        rt.hunk().clear_temp();
    }

    /// Setting a mark, allocating permanent memory, then clearing back
    /// to the mark always restores the exact pre-mark cursor.
    #[test]
    fn hunk_mark_idempotence(sizes in prop::collection::vec(64usize..4096, 0..30)) {
        let mut rt = Runtime::with_defaults();
        let before = rt.hunk().memory_remaining();
        rt.hunk().set_mark();

        for size in sizes {
            if rt.hunk_alloc(size, Preference::DontCare).is_err() {
                break;
            }
        }

        rt.hunk().clear_to_mark();
        prop_assert_eq!(rt.hunk().memory_remaining(), before);
    }
}

#[test]
#[cfg(feature = "trash-sentinel")]
fn trash_sentinel_corruption_is_detected() {
    let mut rt = Runtime::new(Config::default(), Rc::new(PanicErrorSink));
    let p = rt.tag_alloc(32, Tag::General);
    unsafe {
        // Overwrite one byte past the requested payload, inside the
        // block's trailing trash sentinel.
        std::ptr::write(p.as_ptr().add(32), 0xFF);
    }
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = rt.free(p.as_ptr());
    }));
    assert!(result.is_err(), "corrupting the trash sentinel should panic, not succeed silently");
}
