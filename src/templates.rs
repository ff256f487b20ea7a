//! Outbound text resolution — one closed table over (channel × type).
//!
//! Texts are the Czech strings of the original deployment; the reply
//! literals they reference ("ANO"/"NE") must stay in sync with
//! [`crate::pipeline::reply`].

use crate::model::{Channel, MessageType};

/// Everything a template may interpolate.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Request identifier shown to the volunteer.
    pub identifier: &'a str,
    /// Request description.
    pub description: &'a str,
    /// Organisation name.
    pub organisation: &'a str,
}

/// Resolve the outbound text for a (channel, message type) pair.
///
/// Offers and updates differ per channel (SMS leads with the request
/// identifier, push leads with the description); notices under
/// `MessageType::Other` are produced by the dedicated functions below.
pub fn resolve(channel: Channel, message_type: MessageType, ctx: &TemplateContext<'_>) -> String {
    match (channel, message_type) {
        (Channel::Sms, MessageType::Offer) | (Channel::Web, MessageType::Offer) => format!(
            "Žádost {}: {}. Máte zájem pomoci? Odpovězte ANO, nebo NE.",
            ctx.identifier, ctx.description
        ),
        (Channel::Push, MessageType::Offer) => format!(
            "Nová žádost o pomoc: {} ({}). Odpovězte ANO, nebo NE.",
            ctx.description, ctx.organisation
        ),
        (_, MessageType::Update) => format!(
            "Žádost {} byla upravena: {} ({})",
            ctx.identifier, ctx.description, ctx.organisation
        ),
        (_, MessageType::Other) => String::new(),
    }
}

/// Accept confirmed.
pub fn confirmed(organisation: &str) -> String {
    format!("Děkujeme! Vaše pomoc pro {organisation} je potvrzena.")
}

/// Reject confirmed.
pub fn rejected(organisation: &str) -> String {
    format!("Rozumíme. Žádost organizace {organisation} jste odmítl/a.")
}

/// Accept arrived after capacity filled.
pub fn over_capacity(organisation: &str) -> String {
    format!("Děkujeme za ochotu, kapacita žádosti organizace {organisation} je už naplněna.")
}

/// Inbound text matched neither literal.
pub fn unrecognized() -> String {
    "Odpověď jsme nerozpoznali. Odpovězte prosím ANO, nebo NE.".to_string()
}

/// Duplicate reply to an already resolved assignment.
pub fn already_responded() -> String {
    "Na tuto žádost jste už odpověděl/a.".to_string()
}
