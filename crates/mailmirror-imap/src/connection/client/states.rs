//! Connection state markers.

use crate::types::{Mailbox, MailboxStatus};

/// Greeting received, credentials not yet accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Logged in, no mailbox open.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// A mailbox is open. Carries what SELECT/EXAMINE reported.
#[derive(Debug, Clone)]
pub struct Selected {
    pub(crate) mailbox: Mailbox,
    pub(crate) read_only: bool,
    pub(crate) status: MailboxStatus,
}

impl Selected {
    /// The open mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// True when opened with EXAMINE.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Status snapshot taken at SELECT time.
    #[must_use]
    pub const fn status(&self) -> &MailboxStatus {
        &self.status
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Authenticated {}
    impl Sealed for super::Selected {}
}

/// States in which mailbox-level commands (LIST, STATUS, APPEND, SELECT) are valid.
pub trait LoggedIn: sealed::Sealed + Send {}

impl LoggedIn for Authenticated {}
impl LoggedIn for Selected {}

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
    use crate::types::{Uid, UidValidity};

    fn _assert_send<T: Send>() {}

    #[test]
    fn states_are_send() {
        _assert_send::<NotAuthenticated>();
        _assert_send::<Authenticated>();
        _assert_send::<Selected>();
    }

    #[test]
    fn selected_accessors() {
        let state = Selected {
            mailbox: Mailbox::new("[Gmail]/All Mail"),
            read_only: true,
            status: MailboxStatus {
                exists: 12,
                uid_validity: UidValidity::new(7),
                uid_next: Uid::new(40),
                ..MailboxStatus::default()
            },
        };
        assert_eq!(state.mailbox().as_str(), "[Gmail]/All Mail");
        assert!(state.is_read_only());
        assert_eq!(state.status().uid_next_or_default(), 40);
    }
}
