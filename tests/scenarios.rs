//! Concrete allocator scenarios exercised end to end through
//! [`corezone::Runtime`].

use corezone::hunk::Preference;
use corezone::zone::tag::Tag;
use corezone::{Config, LoggingErrorSink, Runtime};
use std::rc::Rc;

fn runtime_with_hunk_megs(hunk_megs: usize) -> Runtime {
    let config = Config {
        hunk_megs,
        ..Config::default()
    };
    Runtime::new(config, Rc::new(LoggingErrorSink))
}

#[test]
fn s1_simple_split_and_coalesce() {
    let mut rt = Runtime::with_defaults();
    let a = rt.tag_alloc(100, Tag::General);
    let b = rt.tag_alloc(100, Tag::General);
    let c = rt.tag_alloc(100, Tag::General);

    rt.free(b.as_ptr()).unwrap();
    rt.free(a.as_ptr()).unwrap();

    assert!(rt.main_zone().check().is_ok());
    // Only `c` remains live.
    let c_block_size = rt.main_zone().used();
    rt.free(c.as_ptr()).unwrap();
    assert_eq!(rt.main_zone().used(), 0);
    assert!(c_block_size > 0);
}

#[test]
fn s2_tag_sweep_counts_only_matching_blocks() {
    let mut rt = Runtime::with_defaults();
    let r1 = rt.tag_alloc(64, Tag::Renderer);
    let g1 = rt.tag_alloc(64, Tag::General);
    let r2 = rt.tag_alloc(64, Tag::Renderer);
    let g2 = rt.tag_alloc(64, Tag::General);
    let r3 = rt.tag_alloc(64, Tag::Renderer);
    let _ = (r1, r2, r3);

    let freed = rt.free_tags(Tag::Renderer);
    assert_eq!(freed, 3);
    assert!(rt.main_zone().check().is_ok());

    // The untouched GENERAL blocks are still live and addressable.
    rt.free(g1.as_ptr()).unwrap();
    rt.free(g2.as_ptr()).unwrap();
    assert_eq!(rt.main_zone().used(), 0);
}

#[test]
fn s3_static_string_free_is_a_no_op() {
    let mut rt = Runtime::with_defaults();
    let digit = rt.digit_string(3).expect("digit in range");
    let used_before = rt.main_zone().used();
    rt.free(digit as *mut u8).unwrap();
    assert_eq!(rt.main_zone().used(), used_before);
}

#[test]
fn s4_hunk_low_and_high_split() {
    let mut rt = runtime_with_hunk_megs(48);
    let hunk_bytes = Config {
        hunk_megs: 48,
        ..Config::default()
    }
    .hunk_bytes();

    let p = rt.hunk_alloc(1000, Preference::Low).unwrap();
    let q = rt.hunk_alloc(1000, Preference::High).unwrap();

    let base = rt.hunk().is_initialized();
    assert!(base);
    assert_eq!(rt.hunk().memory_remaining(), hunk_bytes - 2048);
}

#[test]
fn s5_temp_lifo_vs_non_lifo() {
    let mut rt = Runtime::with_defaults();
    let t1 = rt.hunk_alloc_temp(500).unwrap();
    let t2 = rt.hunk_alloc_temp(500).unwrap();

    let remaining_before = rt.hunk().memory_remaining();
    rt.hunk_free_temp(t1.as_ptr()).unwrap();
    // t1 isn't on top of the stack (t2 is), so nothing is reclaimed yet.
    assert_eq!(rt.hunk().memory_remaining(), remaining_before);

    rt.hunk_free_temp(t2.as_ptr()).unwrap();
    assert!(rt.hunk().memory_remaining() > remaining_before);

    rt.hunk().clear_temp();
}

#[test]
fn s6_bank_swap_follows_highwater_wastage() {
    let mut rt = Runtime::with_defaults();
    let _perm = rt.hunk_alloc(10 * 1024, Preference::Low).unwrap();
    let scratch = rt.hunk_alloc_temp(100 * 1024).unwrap();
    rt.hunk_free_temp(scratch.as_ptr()).unwrap();

    // High side now has a lot of high-water waste relative to its
    // (zero) permanent usage; the next "don't care" permanent
    // allocation should land on the high side instead of low.
    let remaining_before = rt.hunk().memory_remaining();
    let _next = rt.hunk_alloc(1024, Preference::DontCare).unwrap();
    assert!(rt.hunk().memory_remaining() < remaining_before);
}
