use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::control;
use crate::dedupe::DedupeGuard;
use crate::error::{Error, Result};
use crate::ports::{ChannelConnection, ConversationStore, LiveBus};
use crate::types::{MediaKind, MediaRef, OutboundEnvelope, OutboundRecord, SenderRole};

const DEFAULT_DOCUMENT_NAME: &str = "documento.pdf";

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub sender: SenderRole,
    /// Display name of the human agent, when one is sending.
    pub sender_label: Option<String>,
    pub dedupe_window: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            sender: SenderRole::Assistant,
            sender_label: None,
            dedupe_window: None,
        }
    }
}

impl SendOptions {
    pub fn agent(label: impl Into<String>) -> Self {
        Self {
            sender: SenderRole::Agent,
            sender_label: Some(label.into()),
            dedupe_window: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// An identical message went out moments ago.
    Suppressed,
    /// Nothing left to send once markup was removed.
    Empty,
}

/// The only place outbound WhatsApp traffic leaves the process.
pub struct Dispatcher {
    channel: Arc<dyn ChannelConnection>,
    store: Arc<dyn ConversationStore>,
    bus: Arc<dyn LiveBus>,
    dedupe: DedupeGuard,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn ChannelConnection>,
        store: Arc<dyn ConversationStore>,
        bus: Arc<dyn LiveBus>,
        dedupe_window: Duration,
    ) -> Self {
        let dedupe = DedupeGuard::new(store.clone(), dedupe_window);
        Self {
            channel,
            store,
            bus,
            dedupe,
        }
    }

    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<SendOutcome> {
        self.send(recipient, text, None, None, SendOptions::default())
            .await
    }

    pub async fn send_media(
        &self,
        recipient: &str,
        caption: &str,
        media: MediaRef,
    ) -> Result<SendOutcome> {
        self.send(recipient, caption, Some(media), None, SendOptions::default())
            .await
    }

    pub async fn send(
        &self,
        recipient: &str,
        text: &str,
        media: Option<MediaRef>,
        file_name: Option<&str>,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        if !self.channel.is_ready() {
            return Err(Error::ChannelNotReady);
        }

        let text = control::strip_markup(text);
        let media = media.filter(|m| !m.url.trim().is_empty());
        if text.is_empty() && media.is_none() {
            debug!(recipient = %recipient, "nothing to send after stripping markup");
            return Ok(SendOutcome::Empty);
        }

        let media_url = media.as_ref().map(|m| m.url.as_str());
        if self
            .dedupe
            .should_suppress(recipient, Some(text.as_str()), media_url, options.dedupe_window)
            .await
        {
            return Ok(SendOutcome::Suppressed);
        }

        let envelope = build_envelope(&text, media.as_ref(), file_name);
        let message_id = self.channel.transmit(recipient, &envelope).await?;
        info!(
            recipient = %recipient,
            kind = envelope.content_type(),
            message_id = %message_id,
            "outbound message sent"
        );

        let record = OutboundRecord {
            id: Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            sender: options.sender,
            sender_label: options.sender_label,
            content_type: envelope.content_type().to_string(),
            text,
            media_url: media.map(|m| m.url),
            channel_message_id: Some(message_id.clone()).filter(|id| !id.is_empty()),
            created_at: Utc::now(),
        };
        self.record_sent(&record).await;

        Ok(SendOutcome::Sent { message_id })
    }

    /// Bookkeeping after a transmit. The message is already on the
    /// customer's phone, so failures here are only logged.
    async fn record_sent(&self, record: &OutboundRecord) {
        if let Err(err) = self.store.append_outbound(record).await {
            warn!(
                recipient = %record.recipient,
                message_id = ?record.channel_message_id,
                error = %err,
                "sent message could not be persisted"
            );
        }
        self.bus
            .publish(
                "message:new",
                json!({ "recipient": record.recipient, "message": record }),
            )
            .await;
        self.bus
            .publish(
                "chats:updated",
                json!({ "recipient": record.recipient, "updatedAt": record.created_at }),
            )
            .await;
    }
}

fn build_envelope(text: &str, media: Option<&MediaRef>, file_name: Option<&str>) -> OutboundEnvelope {
    let caption = (!text.is_empty()).then(|| text.to_string());
    let Some(media) = media else {
        return OutboundEnvelope::Text {
            body: text.to_string(),
        };
    };
    let link = media.url.trim().to_string();
    match media.kind {
        MediaKind::Image => OutboundEnvelope::Image { link, caption },
        MediaKind::Video => OutboundEnvelope::Video { link, caption },
        MediaKind::Audio => OutboundEnvelope::Audio { link },
        MediaKind::Document => {
            let filename = file_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .or_else(|| file_name_from_url(&link))
                .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string());
            OutboundEnvelope::Document {
                link,
                filename,
                caption,
            }
        }
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or("").trim();
    (name.contains('.') && !name.starts_with('.')).then(|| name.to_string())
}
