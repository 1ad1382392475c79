//! An in-band free-list allocator for embedded systems.
//!
//! This crate provides a single type called [`Allocator`]. This type
//! implements the [`core::alloc::GlobalAlloc`]-trait, which is required to
//! use the [`alloc`-crate][alloc] on `#![no_std]`-targets. Unlike a
//! bump/arena allocator, memory is actually reclaimed: freed chunks are
//! coalesced with their physical neighbors, so long-running programs that
//! allocate and free in varying sizes don't just exhaust the heap after one
//! pass.
//!
//! # Usage
//! Copy the following into your binary crate and adjust the heap size (here
//! 4K) to your needs:
//! ```
//! #[global_allocator]
//! static ALLOCATOR: freelist_heap::Allocator<4096> = freelist_heap::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every fancy collection which is
//! normally provided by `std`.
//!
//! Note to users with things like `MPU`s, `MMU`s, etc.: this crate doesn't
//! use those features at all. If that is desired, take the address of the
//! buffer (`&ALLOCATOR` plus `N`) and protect that range yourself.
//!
//! # Implementation
//! The heap is a single contiguous byte array, split into *blocks*, the
//! size of one bookkeeping header. Every chunk, free or used, starts with
//! one such header; `size` counts the chunk's payload blocks only.
//!
//! Two intrusive doubly-linked lists thread through the headers: one for
//! free chunks, one for used chunks. Allocation sorts the free list by size
//! ascending and takes the first chunk that fits (splitting off a remainder
//! when there's enough slack to justify a second header); deallocation
//! flips a chunk back to free and then repeatedly sorts the free list by
//! address and merges any chunk that is physically adjacent to its
//! successor, until a pass makes no further merges. `realloc` is
//! allocate-copy-free: there's no in-place grow, since doing so correctly
//! would require the same coalescing machinery run speculatively.
//!
//! This algorithm trades the teacher's single-scan simplicity for actual
//! reclamation: a workload that frees memory in a different order than it
//! allocated it will not fragment the heap into unusable slivers, since
//! every free triggers a full coalescing pass.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![cfg_attr(not(test), no_std)]
#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod engine;
mod error;
mod header;
mod list;
mod raw;

pub use error::AllocError;
pub use raw::RawAllocator;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// The memory allocator for embedded systems.
///
/// This is the core type of this crate: it is an allocator with a
/// predefined heap size, statically limiting heap memory usage. Its usage
/// is simple: just copy and paste the following in the binary crate you're
/// developing (adjusting the heap size, here `4096`, to your needs):
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: freelist_heap::Allocator<4096> = freelist_heap::Allocator::new();
/// ```
/// See the [crate-level](crate) documentation for more on sizing the heap
/// and on the allocation algorithm.
pub struct Allocator<const N: usize> {
    /// The internal engine, handling allocations of contiguous byte slices
    /// without needing to worry about alignment beyond the header's own.
    /// Protected by a `spin::Mutex` to make it usable with shared
    /// references (a requirement of [`GlobalAlloc`]).
    raw: spin::Mutex<RawAllocator<N>>,
}

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, so it can be called directly when
    /// initializing a `static`. The region itself is not carved into its
    /// initial free chunk until the first allocation; see
    /// [`RawAllocator`]'s documentation.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        let raw = spin::Mutex::new(RawAllocator::new());
        Self { raw }
    }

    /// Align a given pointer to the specified alignment.
    ///
    /// # Safety
    /// This function requires `align` to be a power of two and requires
    /// `ptr` to point to a memory region large enough that the aligned
    /// pointer is still within that region.
    unsafe fn align_to(ptr: *mut u8, align: usize) -> *mut u8 {
        let addr = ptr as usize;
        let mismatch = addr & (align - 1);
        let offset = if mismatch != 0 { align - mismatch } else { 0 };
        // SAFETY: "in-bounds" is part of this function's safety contract,
        // so it is the caller's obligation, not this function's.
        unsafe { ptr.add(offset) }
    }
}

impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the safety contract of `GlobalAlloc` is lengthy, but in short:
// this implementation never panics on the happy path (exhaustion is
// reported as a null pointer, per the trait's contract) and it honours the
// requested layout, which the over-allocation in `alloc` below and the
// tests at the bottom of this file both exist to guarantee.
unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align();
        // The engine's payload addresses are only ever header-aligned;
        // alignments beyond that require over-allocating by `align` bytes
        // and sliding the returned pointer forward, a conservative worst
        // case that always leaves enough room.
        let size = if align > core::mem::align_of::<usize>() {
            layout.size() + align
        } else {
            layout.size()
        };

        match self.raw.lock().alloc_ptr(size) {
            // SAFETY: `align` is a power of two per `Layout`'s own
            // contract, and the allocation above was enlarged by `align`
            // bytes whenever `align_to` might need to slide the pointer
            // forward, so the result stays inside the allocated chunk.
            Some(memory) => unsafe { Self::align_to(memory, align) },
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // `RawAllocator::free` locates the owning chunk from any pointer
        // inside it, so the aligned pointer `alloc` handed out can be
        // forwarded as-is: there's no need to recover the original,
        // pre-alignment pointer.
        self.raw.lock().free_ptr(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let align = layout.align();
        if align > core::mem::align_of::<usize>() {
            // Over-aligned requests can't be serviced by the engine's
            // in-place realloc (the new chunk might land at a different
            // alignment-relative offset), so fall back to alloc-copy-free
            // by hand, re-running the `align_to` logic in `alloc`.
            let Ok(new_layout) = Layout::from_size_align(new_size, align) else {
                return ptr::null_mut();
            };
            let new_ptr = unsafe { self.alloc(new_layout) };
            if !new_ptr.is_null() {
                let copy_len = core::cmp::min(layout.size(), new_size);
                // SAFETY: `ptr` is valid for `layout.size()` bytes per this
                // method's own contract, and `new_ptr` was just allocated
                // for at least `new_size` bytes by the check above.
                unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };
                unsafe { self.dealloc(ptr, layout) };
            }
            return new_ptr;
        }
        match self.raw.lock().realloc_ptr(ptr, new_size) {
            Some(memory) => memory,
            None => ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Allocator;
    use core::alloc::{GlobalAlloc, Layout};
    use core::ptr;

    #[test]
    fn alignment_of_align_to() {
        // Use a real, suitably aligned buffer rather than casting arbitrary
        // integers to pointers, so `miri`'s strict provenance checks stay
        // happy.
        #[repr(align(16))]
        struct Align([u8; 16]);
        let mut just_a_buffer_to_get_a_valid_address = Align([0_u8; 16]);
        let base: *mut u8 = ptr::addr_of_mut!(just_a_buffer_to_get_a_valid_address.0).cast();

        let ptr_0x10 = base;
        let ptr_0x11 = base.wrapping_add(1);
        let ptr_0x14 = base.wrapping_add(4);
        let ptr_0x1c = base.wrapping_add(0xc);
        let ptr_0x20 = base.wrapping_add(0x10);

        assert_eq!(unsafe { Allocator::<8>::align_to(ptr_0x11, 4) }, ptr_0x14);
        assert_eq!(unsafe { Allocator::<8>::align_to(ptr_0x10, 4) }, ptr_0x10);
        assert_eq!(unsafe { Allocator::<8>::align_to(ptr_0x11, 1) }, ptr_0x11);
        assert_eq!(unsafe { Allocator::<8>::align_to(ptr_0x1c, 16) }, ptr_0x20);
    }

    /// Assert the given alignment of a pointer.
    macro_rules! assert_alignment {
        ($ptr:expr, $align:expr) => {{
            assert_eq!(($ptr as usize) % $align, 0, "alignment not fulfilled");
        }};
    }

    #[test]
    fn small_alignments() {
        let allocator = Allocator::<64>::new();

        let ptr = unsafe { allocator.alloc(Layout::from_size_align(8, 2).unwrap()) };
        assert_alignment!(ptr, 1);

        let ptr = unsafe { allocator.alloc(Layout::from_size_align(4, 4).unwrap()) };
        assert_alignment!(ptr, 4);
    }

    #[test]
    fn medium_alignments() {
        let allocator = Allocator::<512>::new();

        let ptr = unsafe { allocator.alloc(Layout::from_size_align(4, 8).unwrap()) };
        assert_alignment!(ptr, 8);

        let ptr = unsafe { allocator.alloc(Layout::from_size_align(4, 32).unwrap()) };
        assert_alignment!(ptr, 32);
    }

    #[cfg(not(miri))] // too slow
    #[test]
    fn huge_alignment() {
        const FOUR_MEG: usize = 4 * 1024 * 1024;

        // In static memory to avoid blowing the test thread's stack.
        static ALLOCATOR: Allocator<{ 10 * 1024 * 1024 }> = Allocator::new();
        let ptr = unsafe { ALLOCATOR.alloc(Layout::from_size_align(4, FOUR_MEG).unwrap()) };

        assert_alignment!(ptr, FOUR_MEG);
    }

    #[test]
    fn example_usage() {
        // Exercises an intermediate deallocation, interleaved
        // allocation/deallocation order, and varying sizes/alignments.
        static ALLOCATOR: Allocator<4096> = Allocator::new();

        unsafe {
            let layout1 = Layout::new::<u32>();
            let ptr1 = ALLOCATOR.alloc(layout1);
            assert_ne!(ptr1, ptr::null_mut());

            let layout2 = Layout::new::<f64>();
            let ptr2 = ALLOCATOR.alloc(layout2);
            assert_ne!(ptr2, ptr::null_mut());

            let layout3 = Layout::new::<[u16; 12]>();
            let ptr3 = ALLOCATOR.alloc(layout3);
            assert_ne!(ptr3, ptr::null_mut());

            ALLOCATOR.dealloc(ptr2, layout2);

            let layout4 = Layout::new::<[u128; 3]>();
            let ptr4 = ALLOCATOR.alloc(layout4);
            assert_ne!(ptr4, ptr::null_mut());

            let layout5 = Layout::new::<f32>();
            let ptr5 = ALLOCATOR.alloc(layout5);
            assert_ne!(ptr5, ptr::null_mut());

            ALLOCATOR.dealloc(ptr3, layout3);
            ALLOCATOR.dealloc(ptr4, layout4);
            ALLOCATOR.dealloc(ptr5, layout5);
            ALLOCATOR.dealloc(ptr1, layout1);
        }
    }

    #[test]
    fn realloc_grows_in_place_or_moves_transparently() {
        static ALLOCATOR: Allocator<4096> = Allocator::new();
        unsafe {
            let layout = Layout::from_size_align(16, 4).unwrap();
            let ptr = ALLOCATOR.alloc(layout);
            assert_ne!(ptr, ptr::null_mut());
            for i in 0..16u8 {
                *ptr.add(i as usize) = i;
            }

            let grown = ALLOCATOR.realloc(ptr, layout, 200);
            assert_ne!(grown, ptr::null_mut());
            for i in 0..16u8 {
                assert_eq!(*grown.add(i as usize), i);
            }

            ALLOCATOR.dealloc(grown, Layout::from_size_align(200, 4).unwrap());
        }
    }
}
