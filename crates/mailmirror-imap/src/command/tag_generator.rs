//! Command tag generation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Produces `M0000`, `M0001`, ... for one connection.
#[derive(Debug)]
pub struct TagGenerator {
    counter: AtomicU32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self {
            counter: AtomicU32::new(0),
            prefix,
        }
    }

    /// Returns the next tag. Wraps after `u32::MAX`; a connection never lives that long.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{n:04}", self.prefix)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('M')
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn sequential_and_padded() {
        let tags = TagGenerator::default();
        assert_eq!(tags.next(), "M0000");
        assert_eq!(tags.next(), "M0001");
        for _ in 2..10_000 {
            let _ = tags.next();
        }
        assert_eq!(tags.next(), "M10000");
    }
}
