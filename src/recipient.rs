use crate::error::GatewayError;
use crate::transport::ChatTransport;
use std::sync::Arc;

/// Logical dispatch target as it arrives from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Individual recipient addressed by bare phone number.
    Direct(String),
    /// Recipient addressed by a group's display name (case-insensitive).
    Group(String),
}

/// Transport-addressable handle. Lives for one dispatch call.
#[derive(Debug, Clone)]
pub struct ResolvedRecipient {
    pub chat_id: String,
}

/// Maps a logical target onto a concrete chat handle.
///
/// Direct numbers resolve deterministically with no network. Group names
/// cost one `list_chats` round-trip per call — deliberately uncached, since
/// group names and membership can change between calls and staleness is
/// worse than the round-trip at this request volume.
pub struct RecipientResolver {
    transport: Arc<dyn ChatTransport>,
    country_prefix: String,
}

impl RecipientResolver {
    pub fn new(transport: Arc<dyn ChatTransport>, country_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            country_prefix: country_prefix.into(),
        }
    }

    pub async fn resolve(&self, target: &Target) -> Result<ResolvedRecipient, GatewayError> {
        match target {
            Target::Direct(number) => self.resolve_direct(number),
            Target::Group(name) => self.resolve_group(name).await,
        }
    }

    /// Deterministic transform of a bare number into the transport's
    /// addressing scheme: configured country prefix plus `@c.us`.
    pub fn resolve_direct(&self, number: &str) -> Result<ResolvedRecipient, GatewayError> {
        let trimmed = number.trim();
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(GatewayError::InvalidTarget(format!(
                "'{number}' is not a phone number"
            )));
        }
        Ok(ResolvedRecipient {
            chat_id: format!("{}{digits}@c.us", self.country_prefix),
        })
    }

    /// Case-insensitive exact match on group display name; first enumerated
    /// match wins. Ties between names differing only in case are inherent to
    /// name addressing and resolve by enumeration order.
    pub async fn resolve_group(&self, name: &str) -> Result<ResolvedRecipient, GatewayError> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(GatewayError::InvalidTarget("empty group name".into()));
        }
        let chats = self
            .transport
            .list_chats()
            .await
            .map_err(GatewayError::Transport)?;
        chats
            .into_iter()
            .find(|chat| chat.is_group && chat.name.to_lowercase() == wanted)
            .map(|chat| ResolvedRecipient { chat_id: chat.id })
            .ok_or_else(|| GatewayError::RecipientNotFound(name.trim().to_string()))
    }
}
