//! Compact UID sets for UID commands.

use super::Uid;

/// One element of a UID set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidRange {
    /// A single UID.
    Single(Uid),
    /// An inclusive range.
    Range(Uid, Uid),
    /// `n:*`
    From(Uid),
}

/// UID set rendered as `1:4,7,9:*`.
///
/// Built from sorted UIDs, consecutive runs collapse into ranges so a batch of a
/// thousand UIDs usually serializes to a handful of bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<UidRange>,
}

impl UidSet {
    /// Builds a set from UIDs in any order. Duplicates are ignored.
    #[must_use]
    pub fn from_uids(uids: &[Uid]) -> Self {
        let mut sorted = uids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges = Vec::new();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return Self { ranges };
        };
        let (mut start, mut end) = (first, first);
        for uid in iter {
            if uid.get() == end.get() + 1 {
                end = uid;
                continue;
            }
            ranges.push(Self::span(start, end));
            start = uid;
            end = uid;
        }
        ranges.push(Self::span(start, end));
        Self { ranges }
    }

    /// `start:*`
    #[must_use]
    pub fn from_start(start: Uid) -> Self {
        Self {
            ranges: vec![UidRange::From(start)],
        }
    }

    /// `1:*`
    #[must_use]
    pub fn all() -> Self {
        Self::from_start(Uid(std::num::NonZeroU32::MIN))
    }

    /// Returns true if the set names no message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns true if the UID falls in the set.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.ranges.iter().any(|r| match *r {
            UidRange::Single(u) => u == uid,
            UidRange::Range(a, b) => a <= uid && uid <= b,
            UidRange::From(a) => a <= uid,
        })
    }

    const fn span(start: Uid, end: Uid) -> UidRange {
        if start.get() == end.get() {
            UidRange::Single(start)
        } else {
            UidRange::Range(start, end)
        }
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match range {
                UidRange::Single(u) => write!(f, "{u}")?,
                UidRange::Range(a, b) => write!(f, "{a}:{b}")?,
                UidRange::From(a) => write!(f, "{a}:*")?,
            }
        }
        Ok(())
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

    fn uids(values: &[u32]) -> Vec<Uid> {
        values.iter().map(|v| Uid::new(*v).unwrap()).collect()
    }

    #[test]
    fn collapses_runs() {
        let set = UidSet::from_uids(&uids(&[9, 1, 2, 3, 4, 7, 10, 11, 3]));
        assert_eq!(set.to_string(), "1:4,7,9:11");
    }

    #[test]
    fn empty_set() {
        let set = UidSet::from_uids(&[]);
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
    }

    #[test]
    fn open_ended() {
        assert_eq!(UidSet::from_start(Uid::new(42).unwrap()).to_string(), "42:*");
        assert_eq!(UidSet::all().to_string(), "1:*");
        assert!(UidSet::all().contains(Uid::new(99).unwrap()));
    }

    #[test]
    fn membership() {
        let set = UidSet::from_uids(&uids(&[1, 2, 3, 8]));
        assert!(set.contains(Uid::new(2).unwrap()));
        assert!(set.contains(Uid::new(8).unwrap()));
        assert!(!set.contains(Uid::new(5).unwrap()));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn every_input_uid_is_contained(values in proptest::collection::vec(1u32..5000, 0..200)) {
                let input = uids(&values);
                let set = UidSet::from_uids(&input);
                for uid in &input {
                    prop_assert!(set.contains(*uid));
                }
            }
        }
    }
}
