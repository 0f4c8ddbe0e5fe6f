//! Turns a model reply into the ordered series of WhatsApp messages the
//! customer receives.

use std::{collections::HashSet, sync::Arc, time::Duration};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PacingConfig;
use crate::control::{self, ControlPayload};
use crate::dispatch::{Dispatcher, SendOutcome};
use crate::error::Result;
use crate::markers::{self, FlatPromo, GroupedPromo};
use crate::ports::{LiveBus, ReservationDesk};
use crate::quote::{self, QuoteQueue};
use crate::replies;
use crate::types::{MediaRef, QuoteJob};

const MAX_PROMO_IMAGES: usize = 3;

/// What the language model produced for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutput {
    Single(String),
    Units(Vec<String>),
}

impl ModelOutput {
    pub fn into_units(self) -> Vec<String> {
        match self {
            ModelOutput::Single(text) => vec![text],
            ModelOutput::Units(units) => units,
        }
    }
}

impl From<String> for ModelOutput {
    fn from(text: String) -> Self {
        ModelOutput::Single(text)
    }
}

impl From<&str> for ModelOutput {
    fn from(text: &str) -> Self {
        ModelOutput::Single(text.to_string())
    }
}

impl From<Vec<String>> for ModelOutput {
    fn from(units: Vec<String>) -> Self {
        ModelOutput::Units(units)
    }
}

pub struct Sequencer {
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn LiveBus>,
    reservations: Arc<dyn ReservationDesk>,
    quotes: QuoteQueue,
    pacing: PacingConfig,
}

impl Sequencer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        bus: Arc<dyn LiveBus>,
        reservations: Arc<dyn ReservationDesk>,
        quotes: QuoteQueue,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            dispatcher,
            bus,
            reservations,
            quotes,
            pacing,
        }
    }

    /// Delivers every response unit in order. Parts that fail are logged and
    /// skipped; the rest of the sequence still goes out.
    pub async fn deliver(&self, recipient: &str, output: impl Into<ModelOutput>) {
        let units = output.into().into_units();
        let mut queued = HashSet::new();
        for (index, unit) in units.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pacing.between_units).await;
            }
            self.deliver_unit(recipient, unit, &mut queued).await;
            self.bus
                .publish("chats:updated", json!({ "recipient": recipient }))
                .await;
        }
    }

    async fn deliver_unit(&self, recipient: &str, raw: &str, queued: &mut HashSet<String>) {
        let parsed = control::parse(raw);
        if let Some(payload) = &parsed.control {
            self.publish_classification(recipient, payload).await;
        }
        let side = markers::extract(&parsed.visible_text);

        if let Some(promo) = &side.grouped_promo {
            self.render_grouped(recipient, &side.visible_text, promo).await;
        } else if !side.flat_promos.is_empty() {
            self.render_flat(recipient, &side.visible_text, &side.flat_promos)
                .await;
        } else if !side.visible_text.is_empty() {
            self.step_text(recipient, &side.visible_text).await;
        }

        if side.reservation_lookup {
            self.answer_reservation(recipient).await;
        }

        for embedded in &side.quotes {
            self.enqueue_quote(recipient, &embedded.quote_id, &embedded.payload, queued);
        }
        if let Some(payload) = &parsed.control {
            for copy in &payload.copies {
                let Some(request) = &copy.quote_request else {
                    continue;
                };
                let quote_id = copy
                    .quote_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                self.enqueue_quote(recipient, &quote_id, request, queued);
            }
        }
    }

    async fn render_grouped(&self, recipient: &str, leading: &str, promo: &GroupedPromo) {
        if !leading.is_empty() {
            self.step_text(recipient, leading).await;
        }
        self.step_text(recipient, replies::GROUPED_PROMO_INTRO).await;
        for image in promo.images.iter().take(MAX_PROMO_IMAGES) {
            self.step_media(recipient, image, "").await;
        }

        match non_empty(&promo.offers_text) {
            Some(offers) => self.step_text(recipient, offers).await,
            None => {
                if let Some(copy) = non_empty(&promo.consolidated_copy) {
                    self.step_text(recipient, copy).await;
                }
                if let Some(breakdown) = non_empty(&promo.price_breakdown) {
                    self.step_text(recipient, breakdown).await;
                }
            }
        }
        if let Some(includes) = non_empty(&promo.includes) {
            self.step_text(recipient, includes).await;
        }
        let followup = non_empty(&promo.followup).unwrap_or(replies::DEFAULT_FOLLOWUP);
        self.step_text(recipient, followup).await;
    }

    async fn render_flat(&self, recipient: &str, leading: &str, promos: &[FlatPromo]) {
        if !leading.is_empty() {
            self.step_text(recipient, leading).await;
        }
        self.step_text(recipient, replies::FLAT_PROMO_INTRO).await;
        for promo in promos {
            for image in promo.images.iter().take(MAX_PROMO_IMAGES) {
                self.step_media(recipient, image, "").await;
            }
            if !promo.caption.trim().is_empty() {
                self.step_text(recipient, promo.caption.trim()).await;
            }
        }
    }

    async fn answer_reservation(&self, recipient: &str) {
        let reply = match self.reservations.reservation_summary(recipient).await {
            Ok(Some(summary)) => summary,
            Ok(None) => replies::NO_RESERVATIONS.to_string(),
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "reservation lookup failed");
                replies::RESERVATION_FAILED.to_string()
            }
        };
        self.step_text(recipient, &reply).await;
    }

    fn enqueue_quote(
        &self,
        recipient: &str,
        quote_id: &str,
        payload: &serde_json::Value,
        queued: &mut HashSet<String>,
    ) {
        if !queued.insert(quote_id.to_string()) {
            debug!(quote_id = %quote_id, "quote request already queued for this reply");
            return;
        }
        let Some(request) = quote::parse_request(payload) else {
            warn!(recipient = %recipient, quote_id = %quote_id, "unreadable quote request dropped");
            return;
        };
        info!(
            recipient = %recipient,
            quote_id = %quote_id,
            destination = %request.destination,
            "quote request queued"
        );
        self.quotes.enqueue(QuoteJob {
            recipient: recipient.to_string(),
            quote_id: quote_id.to_string(),
            request,
        });
    }

    async fn publish_classification(&self, recipient: &str, payload: &ControlPayload) {
        let copies = payload
            .copies
            .iter()
            .map(|copy| copy.text.as_str())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>();
        self.bus
            .publish(
                "conversation:classified",
                json!({
                    "recipient": recipient,
                    "intent": payload.intent,
                    "tags": payload.tags,
                    "copies": copies,
                    "promoFilter": payload.promo_filter,
                }),
            )
            .await;
    }

    async fn step_text(&self, recipient: &str, text: &str) {
        let result = self.dispatcher.send_text(recipient, text).await;
        self.settle(recipient, "text", result, self.pacing.after_text(text))
            .await;
    }

    async fn step_media(&self, recipient: &str, url: &str, caption: &str) {
        let result = self
            .dispatcher
            .send_media(recipient, caption, MediaRef::image(url))
            .await;
        self.settle(recipient, "image", result, self.pacing.after_media)
            .await;
    }

    async fn settle(
        &self,
        recipient: &str,
        part: &'static str,
        result: Result<SendOutcome>,
        pause: Duration,
    ) {
        match result {
            Ok(SendOutcome::Sent { .. }) => tokio::time::sleep(pause).await,
            Ok(SendOutcome::Suppressed | SendOutcome::Empty) => {}
            Err(err) => warn!(recipient = %recipient, part, error = %err, "response part skipped"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
