//! # Identifier Allocator
//!
//! Issues and recycles u32 identities for one namespace.
//!
//! ## Design
//!
//! ```text
//! allocate():  free stack non-empty? ──yes──> pop (most recently freed)
//!                     │
//!                     no
//!                     ▼
//!              counter++ until the value is neither 0 nor in use
//!
//! release(id): in use? ──yes──> remove from in-use set, push onto free stack
//!                     └─no───> ignored
//! ```
//!
//! The server runs two independent allocators: one for player ids and one
//! for network ids. They never share state.

use std::collections::HashSet;

/// LIFO-recycling identity allocator.
#[derive(Debug)]
pub struct IdAllocator {
    /// Next candidate when the free stack is empty.
    counter: u32,
    /// Identities handed out and not yet released.
    in_use: HashSet<u32>,
    /// Released identities, most recent on top.
    free: Vec<u32>,
}

impl IdAllocator {
    /// Creates an allocator whose first identity is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: 1,
            in_use: HashSet::new(),
            free: Vec::new(),
        }
    }

    /// Returns an identity that is not currently in use.
    ///
    /// Zero is never returned; it is the wire value for "none".
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free.pop() {
            self.in_use.insert(id);
            return id;
        }

        while self.counter == 0 || self.in_use.contains(&self.counter) {
            self.counter = self.counter.wrapping_add(1);
        }
        let id = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.in_use.insert(id);
        id
    }

    /// Returns `id` to the pool.
    ///
    /// Releasing an id that is not in use is a no-op, so a double release
    /// can never hand the same id out twice.
    pub fn release(&mut self, id: u32) {
        if self.in_use.remove(&id) {
            self.free.push(id);
        } else {
            tracing::trace!(id, "release of identity not in use ignored");
        }
    }

    /// Returns true if `id` is currently allocated.
    #[inline]
    #[must_use]
    pub fn is_in_use(&self, id: u32) -> bool {
        self.in_use.contains(&id)
    }

    /// Number of identities currently allocated.
    #[inline]
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Number of released identities waiting for reuse.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_allocation_is_one() {
        let mut allocator = IdAllocator::new();
        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.allocate(), 3);
    }

    #[test]
    fn test_release_is_reused_lifo() {
        let mut allocator = IdAllocator::new();
        for _ in 0..5 {
            allocator.allocate();
        }
        allocator.release(2);
        allocator.release(4);

        assert_eq!(allocator.allocate(), 4);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.allocate(), 6);
    }

    #[test]
    fn test_double_release_hands_out_once() {
        let mut allocator = IdAllocator::new();
        let id = allocator.allocate();
        allocator.release(id);
        allocator.release(id);

        assert_eq!(allocator.free_count(), 1);
        assert_eq!(allocator.allocate(), id);
        assert_ne!(allocator.allocate(), id);
    }

    #[test]
    fn test_release_unknown_is_ignored() {
        let mut allocator = IdAllocator::new();
        allocator.release(99);
        assert_eq!(allocator.free_count(), 0);
        assert_eq!(allocator.allocate(), 1);
    }

    #[test]
    fn test_counter_skips_zero_on_wrap() {
        let mut allocator = IdAllocator::new();
        allocator.counter = u32::MAX;
        assert_eq!(allocator.allocate(), u32::MAX);
        assert_eq!(allocator.allocate(), 1);
    }

    #[test]
    fn test_counter_skips_in_use_on_wrap() {
        let mut allocator = IdAllocator::new();
        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
        allocator.counter = u32::MAX;
        assert_eq!(allocator.allocate(), u32::MAX);
        assert_eq!(allocator.allocate(), 3);
    }

    #[test]
    fn test_in_use_tracking() {
        let mut allocator = IdAllocator::new();
        let id = allocator.allocate();
        assert!(allocator.is_in_use(id));
        allocator.release(id);
        assert!(!allocator.is_in_use(id));
        assert_eq!(allocator.in_use_count(), 0);
    }
}
