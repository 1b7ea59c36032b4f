//! Wire encoding of command arguments.

use crate::types::Mailbox;

use super::types::{FetchAttribute, SearchCriteria, StoreAction};

/// Writes an atom when safe, a quoted string otherwise.
pub fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if matches!(b, b'"' | b'\\') {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Writes a mailbox name.
pub fn write_mailbox(buf: &mut Vec<u8>, mailbox: &Mailbox) {
    write_astring(buf, mailbox.as_str());
}

const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b >= 0x7F
}

/// System labels such as `\Inbox` go out as flag atoms; anything else as an astring.
fn write_label(buf: &mut Vec<u8>, label: &str) {
    match label.strip_prefix('\\') {
        Some(rest) if !rest.is_empty() && !rest.bytes().any(needs_quoting) => {
            buf.extend_from_slice(label.as_bytes());
        }
        _ => write_astring(buf, label),
    }
}

/// Writes `(A B C)`, or the bare item when there is only one.
pub fn write_fetch_items(buf: &mut Vec<u8>, items: &[FetchAttribute]) {
    if let [only] = items {
        buf.extend_from_slice(only.to_wire().as_bytes());
        return;
    }
    buf.push(b'(');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        buf.extend_from_slice(item.to_wire().as_bytes());
    }
    buf.push(b')');
}

/// Writes `+FLAGS.SILENT (\Seen)` and friends.
pub fn write_store_action(buf: &mut Vec<u8>, action: &StoreAction, silent: bool) {
    buf.extend_from_slice(action.item_name(silent).as_bytes());
    buf.extend_from_slice(b" (");
    match action {
        StoreAction::Flags(_, flags) => {
            for (i, flag) in flags.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                buf.extend_from_slice(flag.as_str().as_bytes());
            }
        }
        StoreAction::Labels(_, labels) => {
            for (i, label) in labels.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_label(buf, label);
            }
        }
    }
    buf.push(b')');
}

/// Writes search criteria.
pub fn write_search_criteria(buf: &mut Vec<u8>, criteria: &SearchCriteria) {
    match criteria {
        SearchCriteria::All => buf.extend_from_slice(b"ALL"),
        SearchCriteria::UidFrom(uid) => {
            buf.extend_from_slice(format!("UID {uid}:*").as_bytes());
        }
        SearchCriteria::Uids(set) => {
            buf.extend_from_slice(format!("UID {set}").as_bytes());
        }
        SearchCriteria::Header(name, value) => {
            buf.extend_from_slice(b"HEADER ");
            write_astring(buf, name);
            buf.push(b' ');
            write_astring(buf, value);
        }
        SearchCriteria::ModSeqAbove(modseq) => {
            buf.extend_from_slice(format!("MODSEQ {}", modseq.saturating_add(1)).as_bytes());
        }
        SearchCriteria::GmRaw(query) => {
            buf.extend_from_slice(b"X-GM-RAW ");
            // Always quoted; Gmail treats the argument as free text.
            buf.push(b'"');
            for b in query.bytes() {
                if matches!(b, b'"' | b'\\') {
                    buf.push(b'\\');
                }
                buf.push(b);
            }
            buf.push(b'"');
        }
        SearchCriteria::Not(inner) => {
            buf.extend_from_slice(b"NOT ");
            write_search_criteria(buf, inner);
        }
        SearchCriteria::And(all) => {
            for (i, c) in all.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_search_criteria(buf, c);
            }
        }
    }
}
