//! Reply intent parsing.
//!
//! Replies are matched exactly against the Czech yes/no literals after
//! normalization. Anything else is unparseable — the volunteer is asked
//! to try again, nothing is consumed.

/// Parsed intent of an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Accept,
    Reject,
}

/// Accept literal.
const ACCEPT: &str = "ano";
/// Reject literal.
const REJECT: &str = "ne";

/// Parse a free-text reply. `None` means unparseable.
pub fn parse(text: &str) -> Option<ReplyIntent> {
    match text.trim().to_lowercase().as_str() {
        ACCEPT => Some(ReplyIntent::Accept),
        REJECT => Some(ReplyIntent::Reject),
        _ => None,
    }
}
