//! Segregated free lists, one per size class.
//!
//! Each class is a plain doubly linked list of [`FreeLink`]s threaded
//! through the payload of the free blocks themselves — no separate
//! allocation is needed to track them. New free blocks are always
//! pushed onto the head; [`SearchDirection`] only controls which end of
//! the list a search starts from, trading allocation speed (forward,
//! finds the most recently freed block first) against consolidation
//! (backward, tends to reuse long-idle blocks and leave recent ones
//! available for splitting).

use super::block::{block_of_free_link, free_link_ptr, BlockHeader, FreeLink};
use crate::config::SearchDirection;
use std::ptr::NonNull;

#[derive(Default)]
struct ListHead {
    head: Option<NonNull<FreeLink>>,
    tail: Option<NonNull<FreeLink>>,
}

/// The segregated free lists for one zone. `boundaries[i]` is the
/// largest payload size (in bytes, header included) still served by
/// class `i`; the last class has no upper bound.
pub struct FreeLists {
    boundaries: Vec<usize>,
    lists: Vec<ListHead>,
    direction: SearchDirection,
}

impl FreeLists {
    pub fn new(boundaries: Vec<usize>, direction: SearchDirection) -> Self {
        let lists = (0..=boundaries.len()).map(|_| ListHead::default()).collect();
        FreeLists {
            boundaries,
            lists,
            direction,
        }
    }

    fn class_of(&self, size: usize) -> usize {
        for (i, &bound) in self.boundaries.iter().enumerate() {
            if size <= bound {
                return i;
            }
        }
        self.boundaries.len()
    }

    /// Inserts a now-free block into the list matching its size.
    pub unsafe fn insert(&mut self, block: NonNull<BlockHeader>) {
        let class = self.class_of(block.as_ref().size);
        let link = free_link_ptr(block);
        let list = &mut self.lists[class];
        (*link.as_ptr()).prev = None;
        (*link.as_ptr()).next = list.head;
        if let Some(old_head) = list.head {
            (*old_head.as_ptr()).prev = Some(link);
        }
        list.head = Some(link);
        if list.tail.is_none() {
            list.tail = Some(link);
        }
    }

    /// Removes a free block from whichever list it currently occupies.
    /// The caller must know the block's current size (its size class
    /// has not changed since insertion).
    pub unsafe fn remove(&mut self, block: NonNull<BlockHeader>) {
        let class = self.class_of(block.as_ref().size);
        let link = free_link_ptr(block);
        let (prev, next) = {
            let l = link.as_ref();
            (l.prev, l.next)
        };
        let list = &mut self.lists[class];
        match prev {
            Some(p) => (*p.as_ptr()).next = next,
            None => list.head = next,
        }
        match next {
            Some(n) => (*n.as_ptr()).prev = prev,
            None => list.tail = prev,
        }
    }

    /// Finds the first block in `class` (or any larger class) at least
    /// `min_size` bytes, removing nothing — callers remove explicitly
    /// once they commit to using the block.
    pub unsafe fn find(&self, min_size: usize) -> Option<NonNull<BlockHeader>> {
        let start_class = self.class_of(min_size);
        for class in start_class..self.lists.len() {
            let list = &self.lists[class];
            let start = match self.direction {
                SearchDirection::Forward => list.head,
                SearchDirection::Backward => list.tail,
            };
            let mut cursor = start;
            while let Some(link) = cursor {
                let block = block_of_free_link(link);
                if block.as_ref().size >= min_size {
                    return Some(block);
                }
                cursor = match self.direction {
                    SearchDirection::Forward => link.as_ref().next,
                    SearchDirection::Backward => link.as_ref().prev,
                };
            }
        }
        None
    }

    /// Iterates every free block currently tracked, across all classes.
    /// Used only by the debug checker and tests.
    pub unsafe fn iter_all(&self) -> Vec<NonNull<BlockHeader>> {
        let mut out = Vec::new();
        for list in &self.lists {
            let mut cursor = list.head;
            while let Some(link) = cursor {
                out.push(block_of_free_link(link));
                cursor = link.as_ref().next;
            }
        }
        out
    }

    /// Debug validator: every tracked block's size falls within the
    /// bounds of the class it's filed under, and each list's forward
    /// links agree with its backward links.
    pub unsafe fn validate(&self) -> Result<(), String> {
        for (class, list) in self.lists.iter().enumerate() {
            let lower = if class == 0 { 0 } else { self.boundaries[class - 1] + 1 };
            let upper = self.boundaries.get(class).copied();

            let mut cursor = list.head;
            let mut prev_link = None;
            while let Some(link) = cursor {
                let block = block_of_free_link(link);
                let size = block.as_ref().size;
                if size < lower || upper.map_or(false, |u| size > u) {
                    return Err(format!(
                        "block at {:p} (size {}) is filed under free-list class {} outside its bounds",
                        block.as_ptr(),
                        size,
                        class
                    ));
                }
                if link.as_ref().prev != prev_link {
                    return Err(format!("free-list class {} has a broken backlink at {:p}", class, link.as_ptr()));
                }
                prev_link = Some(link);
                cursor = link.as_ref().next;
            }
            if list.tail != prev_link {
                return Err(format!("free-list class {} tail pointer is stale", class));
            }
        }
        Ok(())
    }
}
