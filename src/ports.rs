//! Collaborators the assistant core talks to.
//!
//! Concrete implementations live in `channel`, `store`, `llm`, `search` and
//! `realtime`; tests swap in the in-memory doubles from `fakes`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    DedupeCriteria, InboundRecord, OutboundEnvelope, OutboundRecord, QuoteLead, SearchOption,
    SearchQuery, SearchResults,
};

/// The WhatsApp connection. Reconnection is the implementation's business.
#[async_trait]
pub trait ChannelConnection: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Sends one envelope and returns the channel's message id.
    async fn transmit(&self, recipient: &str, envelope: &OutboundEnvelope) -> Result<String>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_outbound(&self, record: &OutboundRecord) -> Result<()>;

    /// Stores a customer message. Returns false when a message with the same
    /// channel message id was already stored (webhook redelivery).
    async fn append_inbound(&self, record: &InboundRecord) -> Result<bool>;

    /// Outbound records for `recipient` created at or after `since` that
    /// match `criteria`, newest first.
    async fn recent_outbound(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
        criteria: &DedupeCriteria,
    ) -> Result<Vec<OutboundRecord>>;

    async fn last_inbound_text(&self, recipient: &str) -> Result<Option<String>>;

    async fn contact_display_name(&self, recipient: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One conversational turn. The reply may hold several response units.
    async fn converse(
        &self,
        recipient: &str,
        combined_text: &str,
        display_name: &str,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TravelSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults>;

    /// Extra pictures for an option, used to enrich search results.
    async fn option_media(&self, option: &SearchOption) -> Result<Vec<String>>;
}

/// Fire-and-forget notifications for connected observers.
#[async_trait]
pub trait LiveBus: Send + Sync {
    async fn publish(&self, event: &str, payload: Value);
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn save_quote_lead(&self, lead: &QuoteLead) -> Result<String>;
}

#[async_trait]
pub trait ReservationDesk: Send + Sync {
    /// Customer-facing summary of the recipient's reservations, if any.
    async fn reservation_summary(&self, recipient: &str) -> Result<Option<String>>;
}
