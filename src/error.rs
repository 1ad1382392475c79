//! The recoverable half of the engine's error philosophy.
//!
//! `GlobalAlloc` never sees this type: `alloc`/`dealloc` still collapse
//! failure to a null pointer or a no-op, exactly as the teacher's
//! `Allocator` does. `AllocError` exists for callers who drive
//! [`crate::raw::RawAllocator`] directly and want to know *why* an
//! allocation failed rather than just that it did. Fatal programming
//! errors (double-free, a foreign pointer, a corrupt region) are never
//! represented here; those stay `assert!`/`debug_assert!` panics, matching
//! `examples/original_source/s_heap.c`'s own `assert()` calls for the same
//! cases.
//!
//! Built on `thiserror`'s `no_std`-capable mode (`default-features =
//! false`), which derives `impl core::error::Error` instead of requiring
//! `std`.

/// Why a fallible engine operation did not produce a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// No free chunk (after coalescing) was large enough for the request.
    #[error("no free chunk large enough for {requested} bytes")]
    OutOfMemory { requested: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = AllocError::OutOfMemory { requested: 64 };
        assert_eq!(err.to_string(), "no free chunk large enough for 64 bytes");
    }
}
