//! Message identifiers and address normalization

use std::fmt;

use chrono::{DateTime, Local};

/// File extension of stored messages
pub const MESSAGE_SUFFIX: &str = ".msg";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Identifier of a stored message, also its file name inside the mailbox directory.
///
/// Identifiers are a 17-digit local timestamp (`yyyyMMddHHmmssSSS`) followed by
/// [`MESSAGE_SUFFIX`], so their lexicographic order is the delivery order.
/// Two deliveries in the same millisecond produce the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Identifier for a delivery happening now
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    pub fn at(time: DateTime<Local>) -> Self {
        Self(format!("{}{MESSAGE_SUFFIX}", time.format(TIMESTAMP_FORMAT)))
    }

    /// Wrap an existing file name. Returns `None` unless it carries the message suffix.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.len() > MESSAGE_SUFFIX.len() && name.ends_with(MESSAGE_SUFFIX) {
            Some(Self(name.to_owned()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turn an envelope address into a mailbox name: trim whitespace, then drop any
/// leading `<` and trailing `>` characters.
pub fn strip_address(address: &str) -> &str {
    address
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
}

/// Whether a mailbox name is safe to use as a single directory component
pub fn is_valid_mailbox_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_id_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap()
            + chrono::Duration::milliseconds(42);
        let id = MessageId::at(time);
        assert_eq!(id.as_str(), "20240307090502042.msg");
    }

    #[test]
    fn test_message_ids_sort_chronologically() {
        let earlier = Local.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(MessageId::at(earlier) < MessageId::at(later));
    }

    #[test]
    fn test_from_file_name() {
        assert!(MessageId::from_file_name("20240101000000000.msg").is_some());
        assert!(MessageId::from_file_name("notes.txt").is_none());
        assert!(MessageId::from_file_name(".msg").is_none());
    }

    #[test]
    fn test_strip_address() {
        assert_eq!(strip_address("<a@x>"), "a@x");
        assert_eq!(strip_address("  <<a@x>>  "), "a@x");
        assert_eq!(strip_address("a@x"), "a@x");
        assert_eq!(strip_address(" <> "), "");
    }

    #[test]
    fn test_mailbox_name_validation() {
        assert!(is_valid_mailbox_name("john.doe@example.com"));
        assert!(!is_valid_mailbox_name(""));
        assert!(!is_valid_mailbox_name(".."));
        assert!(!is_valid_mailbox_name("../etc"));
        assert!(!is_valid_mailbox_name("a\\b"));
    }
}
