//! Chunk directory: the two intrusive doubly-linked lists (free, used) and
//! the comparator-driven sort the allocator runs over the free list.
//!
//! There is no sentinel node: an empty list is simply `head == NIL`, which
//! saves a block's worth of bookkeeping relative to the sentinel-head design
//! spec'd for the original engine, at no cost to the invariants it has to
//! uphold (spec.md §4.5 leaves the sentinel an implementation detail, not a
//! contract). The sort is a bottom-up-by-recursion merge sort over the
//! singly-linked `next` chain, exactly the algorithm spec.md §4.5 and §9
//! suggest; `prev` links are rebuilt in one pass once the list is in its
//! final order.

use core::cmp::Ordering;

use crate::engine::{cmp_by_payload, cmp_by_size, Engine};
use crate::header::{BlockIndex, ChunkHeader, NIL};

#[derive(Clone, Copy)]
pub(crate) enum ListId {
    Free,
    Used,
}

type Comparator = fn(&ChunkHeader, &ChunkHeader) -> Ordering;

impl Engine {
    fn head(&self, list: ListId) -> BlockIndex {
        match list {
            ListId::Free => self.free_head,
            ListId::Used => self.used_head,
        }
    }

    fn set_head(&mut self, list: ListId, index: BlockIndex) {
        match list {
            ListId::Free => self.free_head = index,
            ListId::Used => self.used_head = index,
        }
    }

    /// Inserts `index` at the head of `list`. `index` must not already be a
    /// member of any list.
    unsafe fn list_insert_head(&mut self, base: *mut u8, list: ListId, index: BlockIndex) {
        let old_head = self.head(list);
        let mut chunk = unsafe { self.header_at(base, index) };
        chunk.prev = NIL;
        chunk.next = old_head;
        unsafe { self.write_header_at(base, index, chunk) };
        if old_head != NIL {
            let mut old = unsafe { self.header_at(base, old_head) };
            old.prev = index;
            unsafe { self.write_header_at(base, old_head, old) };
        }
        self.set_head(list, index);
    }

    /// Removes `index` from `list`, wherever in the list it currently sits.
    unsafe fn list_unlink(&mut self, base: *mut u8, list: ListId, index: BlockIndex) {
        let chunk = unsafe { self.header_at(base, index) };
        if chunk.prev != NIL {
            let mut prev = unsafe { self.header_at(base, chunk.prev) };
            prev.next = chunk.next;
            unsafe { self.write_header_at(base, chunk.prev, prev) };
        } else {
            self.set_head(list, chunk.next);
        }
        if chunk.next != NIL {
            let mut next = unsafe { self.header_at(base, chunk.next) };
            next.prev = chunk.prev;
            unsafe { self.write_header_at(base, chunk.next, next) };
        }
    }

    pub(crate) unsafe fn insert_free(&mut self, base: *mut u8, index: BlockIndex) {
        unsafe { self.list_insert_head(base, ListId::Free, index) }
    }

    pub(crate) unsafe fn insert_used(&mut self, base: *mut u8, index: BlockIndex) {
        unsafe { self.list_insert_head(base, ListId::Used, index) }
    }

    pub(crate) unsafe fn unlink_free(&mut self, base: *mut u8, index: BlockIndex) {
        unsafe { self.list_unlink(base, ListId::Free, index) }
    }

    pub(crate) unsafe fn unlink_used(&mut self, base: *mut u8, index: BlockIndex) {
        unsafe { self.list_unlink(base, ListId::Used, index) }
    }

    #[cfg(test)]
    pub(crate) unsafe fn list_len(&self, base: *mut u8, list: ListId) -> usize {
        let mut n = 0;
        let mut cursor = self.head(list);
        while cursor != NIL {
            n += 1;
            cursor = unsafe { self.header_at(base, cursor) }.next;
        }
        n
    }

    pub(crate) unsafe fn sort_free_by_size(&mut self, base: *mut u8) {
        unsafe { self.sort(base, ListId::Free, cmp_by_size) }
    }

    pub(crate) unsafe fn sort_free_by_address(&mut self, base: *mut u8) {
        unsafe { self.sort(base, ListId::Free, cmp_by_payload) }
    }

    /// Stable merge sort of `list` by `cmp`, rewriting both `next` and
    /// `prev` links so the result is a fully-formed doubly-linked list.
    unsafe fn sort(&mut self, base: *mut u8, list: ListId, cmp: Comparator) {
        let head = self.head(list);
        let new_head = unsafe { self.merge_sort(base, head, cmp) };

        // `merge_sort` only maintains `next`; rebuild `prev` in one pass.
        let mut prev = NIL;
        let mut cursor = new_head;
        while cursor != NIL {
            let mut chunk = unsafe { self.header_at(base, cursor) };
            chunk.prev = prev;
            let next = chunk.next;
            unsafe { self.write_header_at(base, cursor, chunk) };
            prev = cursor;
            cursor = next;
        }
        self.set_head(list, new_head);
    }

    unsafe fn merge_sort(&self, base: *mut u8, head: BlockIndex, cmp: Comparator) -> BlockIndex {
        if head == NIL {
            return NIL;
        }
        let next = unsafe { self.header_at(base, head) }.next;
        if next == NIL {
            return head;
        }

        let (left, right) = unsafe { self.split(base, head) };
        let left = unsafe { self.merge_sort(base, left, cmp) };
        let right = unsafe { self.merge_sort(base, right, cmp) };
        unsafe { self.merge(base, left, right, cmp) }
    }

    /// Splits the `next`-chain starting at `head` (which must have at least
    /// two nodes) into two halves using the classic slow/fast pointer walk.
    unsafe fn split(&self, base: *mut u8, head: BlockIndex) -> (BlockIndex, BlockIndex) {
        let mut slow = head;
        let mut fast = unsafe { self.header_at(base, head) }.next;
        while fast != NIL {
            fast = unsafe { self.header_at(base, fast) }.next;
            if fast != NIL {
                slow = unsafe { self.header_at(base, slow) }.next;
                fast = unsafe { self.header_at(base, fast) }.next;
            }
        }
        let mut slow_chunk = unsafe { self.header_at(base, slow) };
        let right = slow_chunk.next;
        slow_chunk.next = NIL;
        unsafe { self.write_header_at(base, slow, slow_chunk) };
        (head, right)
    }

    /// Merges two already-sorted `next`-chains, preferring `a` on ties so
    /// the sort is stable.
    unsafe fn merge(&self, base: *mut u8, a: BlockIndex, b: BlockIndex, cmp: Comparator) -> BlockIndex {
        if a == NIL {
            return b;
        }
        if b == NIL {
            return a;
        }
        let a_chunk = unsafe { self.header_at(base, a) };
        let b_chunk = unsafe { self.header_at(base, b) };
        if cmp(&a_chunk, &b_chunk) != Ordering::Greater {
            let mut a_chunk = a_chunk;
            a_chunk.next = unsafe { self.merge(base, a_chunk.next, b, cmp) };
            unsafe { self.write_header_at(base, a, a_chunk) };
            a
        } else {
            let mut b_chunk = b_chunk;
            b_chunk.next = unsafe { self.merge(base, a, b_chunk.next, cmp) };
            unsafe { self.write_header_at(base, b, b_chunk) };
            b
        }
    }
}
