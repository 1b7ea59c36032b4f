//! Batched UID FETCH: planning round-trips and turning FETCH lines into rows.
//!
//! Large mailboxes are never fetched in one request. UIDs are split either by a
//! fixed count or, for bodies, by the sum of their declared `RFC822.SIZE` so a
//! single round-trip stays within a memory budget. Each response line is turned
//! into a typed [`FetchRow`] by the pure [`parse_fetch_line`]; a line that does
//! not parse is reported on its own and never takes the batch down with it.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::command::FetchAttribute;
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{Flags, Uid};
use crate::{Error, Result};

/// Default number of UIDs per header round-trip.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default byte budget per body round-trip (50 MiB).
pub const DEFAULT_BODY_BUDGET: u64 = 50 * 1024 * 1024;

const DEFAULT_BATCH_NONZERO: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BATCH_SIZE) {
    Some(n) => n,
    None => panic!("DEFAULT_BATCH_SIZE must be non-zero"),
};

/// How a UID list is split into round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Budget {
    /// At most `n` UIDs per round-trip.
    Count(NonZeroUsize),
    /// Declared sizes of one round-trip add up to at most `max` bytes.
    ///
    /// A UID bigger than `max` on its own gets a round-trip to itself. UIDs
    /// missing from `sizes` are treated as exactly `max`.
    Bytes {
        /// Byte ceiling per round-trip.
        max: u64,
        /// `RFC822.SIZE` per UID.
        sizes: HashMap<Uid, u32>,
    },
}

impl Budget {
    /// Count budget, falling back to [`DEFAULT_BATCH_SIZE`] for 0.
    #[must_use]
    pub fn count(n: usize) -> Self {
        Self::Count(NonZeroUsize::new(n).unwrap_or(DEFAULT_BATCH_NONZERO))
    }

    /// Splits `uids` into round-trips, keeping their order.
    ///
    /// Every input UID lands in exactly one group. An empty input yields no groups.
    #[must_use]
    pub fn plan(&self, uids: &[Uid]) -> Vec<Vec<Uid>> {
        match self {
            Self::Count(n) => uids.chunks(n.get()).map(<[Uid]>::to_vec).collect(),
            Self::Bytes { max, sizes } => {
                let mut groups = Vec::new();
                let mut current: Vec<Uid> = Vec::new();
                let mut used = 0u64;
                for &uid in uids {
                    let size = sizes.get(&uid).map_or(*max, |s| u64::from(*s));
                    if !current.is_empty() && used.saturating_add(size) > *max {
                        groups.push(std::mem::take(&mut current));
                        used = 0;
                    }
                    current.push(uid);
                    used = used.saturating_add(size);
                }
                if !current.is_empty() {
                    groups.push(current);
                }
                groups
            }
        }
    }
}

/// Which data items a fetch asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct FetchFields {
    flags: bool,
    size: bool,
    internal_date: bool,
    header: bool,
    body: bool,
    gmail: bool,
    modseq: bool,
}

impl FetchFields {
    /// UID only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields of the header pass: flags, size, date and the header block.
    #[must_use]
    pub fn headers() -> Self {
        Self::new().flags().size().internal_date().header()
    }

    /// Fields of the body pass: the full message plus flags and date.
    #[must_use]
    pub fn bodies() -> Self {
        Self::new().flags().internal_date().body()
    }

    /// Adds FLAGS.
    #[must_use]
    pub const fn flags(mut self) -> Self {
        self.flags = true;
        self
    }

    /// Adds RFC822.SIZE.
    #[must_use]
    pub const fn size(mut self) -> Self {
        self.size = true;
        self
    }

    /// Adds INTERNALDATE.
    #[must_use]
    pub const fn internal_date(mut self) -> Self {
        self.internal_date = true;
        self
    }

    /// Adds `BODY.PEEK[HEADER]`.
    #[must_use]
    pub const fn header(mut self) -> Self {
        self.header = true;
        self
    }

    /// Adds `BODY.PEEK[]`.
    #[must_use]
    pub const fn body(mut self) -> Self {
        self.body = true;
        self
    }

    /// Adds X-GM-MSGID, X-GM-THRID and X-GM-LABELS.
    #[must_use]
    pub const fn gmail(mut self, enabled: bool) -> Self {
        self.gmail = enabled;
        self
    }

    /// Adds MODSEQ.
    #[must_use]
    pub const fn modseq(mut self, enabled: bool) -> Self {
        self.modseq = enabled;
        self
    }

    /// Attribute list for the UID FETCH command. UID always comes first.
    #[must_use]
    pub fn attributes(&self) -> Vec<FetchAttribute> {
        let mut attrs = vec![FetchAttribute::Uid];
        if self.flags {
            attrs.push(FetchAttribute::Flags);
        }
        if self.internal_date {
            attrs.push(FetchAttribute::InternalDate);
        }
        if self.size {
            attrs.push(FetchAttribute::Rfc822Size);
        }
        if self.gmail {
            attrs.extend([
                FetchAttribute::GmMsgId,
                FetchAttribute::GmThrId,
                FetchAttribute::GmLabels,
            ]);
        }
        if self.modseq {
            attrs.push(FetchAttribute::ModSeq);
        }
        if self.header {
            attrs.push(FetchAttribute::BodyPeek("HEADER".to_string()));
        }
        if self.body {
            attrs.push(FetchAttribute::BodyPeek(String::new()));
        }
        attrs
    }
}

/// One message's worth of FETCH data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRow {
    /// UID; a row without one is rejected.
    pub uid: Uid,
    /// FLAGS, empty when not requested.
    pub flags: Flags,
    /// X-GM-LABELS, empty when not requested.
    pub labels: Vec<String>,
    /// INTERNALDATE in the server's `dd-Mon-yyyy hh:mm:ss +zzzz` form.
    pub internal_date: Option<String>,
    /// RFC822.SIZE
    pub size: Option<u32>,
    /// X-GM-MSGID
    pub gm_msgid: Option<u64>,
    /// X-GM-THRID
    pub gm_thrid: Option<u64>,
    /// MODSEQ
    pub modseq: Option<u64>,
    /// Header block.
    pub header: Option<Vec<u8>>,
    /// Full message.
    pub body: Option<Vec<u8>>,
}

impl FetchRow {
    /// Builds a row from parsed FETCH items.
    ///
    /// # Errors
    ///
    /// Returns a parse error when the items carry no UID.
    pub fn from_items(items: Vec<FetchItem>) -> Result<Self> {
        let mut uid = None;
        let mut flags = Flags::new();
        let mut labels = Vec::new();
        let mut internal_date = None;
        let mut size = None;
        let mut gm_msgid = None;
        let mut gm_thrid = None;
        let mut modseq = None;
        let mut header = None;
        let mut body = None;
        for item in items {
            match item {
                FetchItem::Uid(u) => uid = Some(u),
                FetchItem::Flags(f) => flags = f,
                FetchItem::GmLabels(l) => labels = l,
                FetchItem::InternalDate(d) => internal_date = Some(d),
                FetchItem::Rfc822Size(s) => size = Some(s),
                FetchItem::GmMsgId(id) => gm_msgid = Some(id),
                FetchItem::GmThrId(id) => gm_thrid = Some(id),
                FetchItem::ModSeq(m) => modseq = Some(m),
                FetchItem::Body { section, data } => match section.as_deref() {
                    Some("HEADER") => header = data,
                    Some("") | None => body = data,
                    Some(other) => tracing::trace!(section = other, "ignoring body section"),
                },
            }
        }
        Ok(Self {
            uid: uid.ok_or_else(|| Error::parse(0, "FETCH row without UID"))?,
            flags,
            labels,
            internal_date,
            size,
            gm_msgid,
            gm_thrid,
            modseq,
            header,
            body,
        })
    }
}

/// Parses one complete `* n FETCH (...)` response, literals included.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the bytes are not a FETCH response, when the
/// item list is malformed, or when the row carries no UID.
pub fn parse_fetch_line(line: &[u8]) -> Result<FetchRow> {
    match ResponseParser::parse(line)? {
        Response::Untagged(UntaggedResponse::Fetch { items, .. }) => FetchRow::from_items(items),
        _ => Err(Error::parse(0, "not a FETCH response")),
    }
}

/// True for `* <n> FETCH` frames, whether or not they parse.
pub(crate) fn is_fetch_frame(frame: &[u8]) -> bool {
    let Some(rest) = frame.strip_prefix(b"* ") else {
        return false;
    };
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0
        && rest
            .get(digits..digits + 6)
            .is_some_and(|w| w.eq_ignore_ascii_case(b" FETCH"))
}

/// Rows of every FETCH frame in `frames`. Frames that fail to parse are logged and skipped.
pub(crate) fn rows_from_frames(frames: &[Vec<u8>]) -> Vec<FetchRow> {
    let mut rows = Vec::new();
    for frame in frames.iter().filter(|f| is_fetch_frame(f)) {
        match parse_fetch_line(frame) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(error = %e, len = frame.len(), "skipping malformed FETCH row"),
        }
    }
    rows
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
    use proptest::prelude::*;

    use super::*;
    use crate::types::Flag;

    fn uids(range: std::ops::RangeInclusive<u32>) -> Vec<Uid> {
        range.map(|n| Uid::new(n).unwrap()).collect()
    }

    #[test]
    fn count_budget_splits_2500_into_three() {
        let groups = Budget::count(1000).plan(&uids(1..=2500));
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 1000);
        assert_eq!(groups[1].len(), 1000);
        assert_eq!(groups[2].len(), 500);
        assert_eq!(groups[1][0].get(), 1001);
    }

    #[test]
    fn zero_count_uses_default() {
        assert_eq!(Budget::count(0), Budget::count(DEFAULT_BATCH_SIZE));
    }

    #[test]
    fn empty_plan() {
        assert!(Budget::count(10).plan(&[]).is_empty());
        let bytes = Budget::Bytes {
            max: 10,
            sizes: HashMap::new(),
        };
        assert!(bytes.plan(&[]).is_empty());
    }

    #[test]
    fn byte_budget_groups_by_declared_size() {
        let list = uids(1..=5);
        let sizes: HashMap<Uid, u32> = list
            .iter()
            .zip([40, 50, 20, 150, 10])
            .map(|(u, s)| (*u, s))
            .collect();
        let groups = Budget::Bytes { max: 100, sizes }.plan(&list);
        let as_nums: Vec<Vec<u32>> = groups
            .iter()
            .map(|g| g.iter().map(|u| u.get()).collect())
            .collect();
        // 150 is over budget and travels alone.
        assert_eq!(as_nums, vec![vec![1, 2], vec![3], vec![4], vec![5]]);
    }

    #[test]
    fn header_fields() {
        let attrs = FetchFields::headers().gmail(true).attributes();
        assert_eq!(attrs[0], FetchAttribute::Uid);
        assert!(attrs.contains(&FetchAttribute::GmLabels));
        assert_eq!(
            attrs.last(),
            Some(&FetchAttribute::BodyPeek("HEADER".to_string()))
        );
        assert!(!FetchFields::headers().attributes().contains(&FetchAttribute::GmMsgId));
    }

    #[test]
    fn parses_gmail_header_row() {
        let line = b"* 3 FETCH (UID 77 FLAGS (\\Seen) X-GM-MSGID 1278455344230334865 \
X-GM-THRID 1266894439832287888 X-GM-LABELS (\\Inbox \"Work Stuff\") RFC822.SIZE 2048 \
BODY[HEADER] {24}\r\nSubject: hi\r\nFrom: a\r\n\r\n)\r\n";
        let row = parse_fetch_line(line).unwrap();
        assert_eq!(row.uid.get(), 77);
        assert!(row.flags.contains(&Flag::Seen));
        assert_eq!(row.gm_msgid, Some(1278455344230334865));
        assert_eq!(row.gm_thrid, Some(1266894439832287888));
        assert_eq!(row.labels, vec!["\\Inbox".to_string(), "Work Stuff".to_string()]);
        assert_eq!(row.size, Some(2048));
        assert_eq!(row.header.as_deref(), Some(&b"Subject: hi\r\nFrom: a\r\n\r\n"[..]));
        assert!(row.body.is_none());
    }

    #[test]
    fn full_body_row() {
        let line = b"* 1 FETCH (UID 5 BODY[] {5}\r\nhello)\r\n";
        let row = parse_fetch_line(line).unwrap();
        assert_eq!(row.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn row_without_uid_is_an_error() {
        let err = parse_fetch_line(b"* 1 FETCH (FLAGS (\\Seen))\r\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn non_fetch_line_is_an_error() {
        assert!(parse_fetch_line(b"* 4 EXISTS\r\n").is_err());
        assert!(parse_fetch_line(b"garbage").is_err());
    }

    #[test]
    fn fetch_frame_detection() {
        assert!(is_fetch_frame(b"* 12 FETCH (UID 1)\r\n"));
        assert!(is_fetch_frame(b"* 12 fetch garbage"));
        assert!(!is_fetch_frame(b"* 12 EXISTS\r\n"));
        assert!(!is_fetch_frame(b"* FETCH\r\n"));
        assert!(!is_fetch_frame(b"M0001 OK FETCH done\r\n"));
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let frames = vec![
            b"* 1 FETCH (UID 10 FLAGS (\\Seen))\r\n".to_vec(),
            b"* 2 FETCH (UID 11 BODY[] {999}\r\nshort)\r\n".to_vec(),
            b"* 3 FETCH (FLAGS ())\r\n".to_vec(),
            b"* 4 FETCH (UID 13)\r\n".to_vec(),
            b"* 5 EXISTS\r\n".to_vec(),
        ];
        let uids: Vec<u32> = rows_from_frames(&frames).iter().map(|r| r.uid.get()).collect();
        assert_eq!(uids, vec![10, 13]);
    }

    proptest! {
        #[test]
        fn byte_plan_never_drops_or_reorders(
            sizes in prop::collection::vec(0u32..5000, 0..200),
            max in 1u64..8000,
        ) {
            let list: Vec<Uid> = (1..=sizes.len() as u32).map(|n| Uid::new(n).unwrap()).collect();
            let map: HashMap<Uid, u32> = list.iter().copied().zip(sizes.iter().copied()).collect();
            let groups = Budget::Bytes { max, sizes: map.clone() }.plan(&list);
            let flat: Vec<Uid> = groups.iter().flatten().copied().collect();
            prop_assert_eq!(&flat, &list);
            for group in &groups {
                prop_assert!(!group.is_empty());
                let total: u64 = group.iter().map(|u| u64::from(map[u])).sum();
                prop_assert!(group.len() == 1 || total <= max);
            }
        }

        #[test]
        fn count_plan_respects_limit(n in 1usize..50, len in 0u32..300) {
            let list: Vec<Uid> = (1..=len).map(|n| Uid::new(n).unwrap()).collect();
            let groups = Budget::count(n).plan(&list);
            prop_assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), list.len());
            prop_assert!(groups.iter().all(|g| g.len() <= n));
        }
    }
}
