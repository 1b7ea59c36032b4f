//! Mailbox address lists.

use sha2::{Digest, Sha256};

/// One parsed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name, or the local part when the header has none.
    pub name: String,
    /// `local@domain` as written.
    pub addr: String,
    /// Hex SHA-256 of the trimmed, lowercased address; stable avatar/contact key.
    pub hash: String,
}

impl Address {
    /// Builds an address, deriving the name and hash.
    #[must_use]
    pub fn new(name: Option<&str>, addr: &str) -> Self {
        let addr = addr.trim().to_string();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(
                || addr.split_once('@').map_or(addr.as_str(), |(l, _)| l).to_string(),
                ToString::to_string,
            );
        let hash = format!("{:x}", Sha256::digest(addr.to_lowercase().as_bytes()));
        Self { name, addr, hash }
    }

    /// `Name <addr>` or bare `addr`.
    #[must_use]
    pub fn title(&self) -> String {
        if self.addr.starts_with(&format!("{}@", self.name)) || self.name == self.addr {
            self.addr.clone()
        } else {
            format!("{} <{}>", self.name, self.addr)
        }
    }
}

/// Parses an already decoded address-list header value.
///
/// Group syntax and comments are tolerated; entries with neither an `@` nor
/// angle brackets are dropped.
#[must_use]
pub fn parse_addresses(value: &str) -> Vec<Address> {
    split_list(value)
        .iter()
        .filter_map(|entry| parse_one(entry))
        .collect()
}

fn parse_one(entry: &str) -> Option<Address> {
    // "Group: a@b, c@d;" leaves a "Group:" prefix on the first member.
    let entry = entry.trim().trim_end_matches(';');
    let entry = match entry.split_once(':') {
        Some((group, rest)) if !group.contains(['<', '@', '"']) => rest,
        _ => entry,
    }
    .trim();
    if entry.is_empty() {
        return None;
    }
    if let (Some(open), Some(close)) = (entry.rfind('<'), entry.rfind('>')) {
        if open < close {
            let addr = &entry[open + 1..close];
            let name = unquote(entry[..open].trim());
            return Some(Address::new(Some(&name), addr));
        }
    }
    let (addr, comment) = match (entry.find('('), entry.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            (format!("{}{}", &entry[..open], &entry[close + 1..]), Some(&entry[open + 1..close]))
        }
        _ => (entry.to_string(), None),
    };
    let addr = addr.trim();
    addr.contains('@').then(|| Address::new(comment, addr))
}

fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .replace("\\\"", "\"")
}

/// Splits on commas outside quotes, angle brackets and comments.
fn split_list(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth_angle = 0u32;
    let mut depth_paren = 0u32;
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => depth_angle += 1,
            '>' if !quoted => depth_angle = depth_angle.saturating_sub(1),
            '(' if !quoted => depth_paren += 1,
            ')' if !quoted => depth_paren = depth_paren.saturating_sub(1),
            ',' if !quoted && depth_angle == 0 && depth_paren == 0 => {
                out.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
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
    fn name_and_angle_addr() {
        let list = parse_addresses("\"Doe, Jane\" <jane@example.com>, bob@example.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Doe, Jane");
        assert_eq!(list[0].addr, "jane@example.com");
        assert_eq!(list[1].name, "bob");
        assert_eq!(list[1].title(), "bob@example.com");
    }

    #[test]
    fn hash_ignores_case() {
        let a = Address::new(None, "Jane@Example.com");
        let b = Address::new(None, " jane@example.com ");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn comment_becomes_name() {
        let list = parse_addresses("jane@example.com (Jane Doe)");
        assert_eq!(list[0].name, "Jane Doe");
        assert_eq!(list[0].addr, "jane@example.com");
    }

    #[test]
    fn group_and_junk() {
        let list = parse_addresses("Team: a@x.org, b@x.org;, undisclosed-recipients:;");
        let addrs: Vec<_> = list.iter().map(|a| a.addr.as_str()).collect();
        assert_eq!(addrs, vec!["a@x.org", "b@x.org"]);
    }
}
