//! Coalesces bursts of inbound customer messages into one assistant turn.
//!
//! Customers on WhatsApp tend to type a thought across several short
//! messages. Every inbound message restarts a per-recipient quiet timer;
//! only when the timer runs out does the buffered text go to the language
//! model, as a single prompt.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

use crate::config::AssistantSettings;
use crate::ports::{ConversationStore, LanguageModel};
use crate::replies;
use crate::retry::{retry, RetryPolicy};
use crate::sequencer::Sequencer;

/// Per-recipient aggregation state.
#[derive(Default)]
pub struct Turn {
    buffer: Vec<String>,
    last_activity: Option<Instant>,
    in_flight: bool,
    display_name: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every reschedule so a superseded timer that already woke
    /// up does nothing.
    generation: u64,
}

pub struct AssistantScheduler {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn LanguageModel>,
    sequencer: Arc<Sequencer>,
    settings: AssistantSettings,
    retry: RetryPolicy,
    turns: Mutex<HashMap<String, Turn>>,
}

impl AssistantScheduler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn LanguageModel>,
        sequencer: Arc<Sequencer>,
        settings: AssistantSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            model,
            sequencer,
            settings,
            retry,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Registers that `recipient` just wrote and (re)starts the quiet timer.
    ///
    /// The newest stored inbound text is buffered unless it equals the last
    /// buffered entry, which happens when the same message is scheduled twice.
    pub async fn schedule(self: &Arc<Self>, recipient: &str, display_name_hint: Option<&str>) {
        let latest = match self.store.last_inbound_text(recipient).await {
            Ok(text) => text
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "could not read latest inbound message");
                None
            }
        };

        let mut turns = self.turns.lock().await;
        let turn = turns.entry(recipient.to_string()).or_default();
        if let Some(timer) = turn.timer.take() {
            timer.abort();
        }
        turn.last_activity = Some(Instant::now());
        if let Some(hint) = display_name_hint.map(str::trim).filter(|h| !h.is_empty()) {
            turn.display_name = Some(hint.to_string());
        }
        match latest {
            Some(text) if turn.buffer.last() == Some(&text) => {
                debug!(recipient = %recipient, "message already buffered");
            }
            Some(text) => turn.buffer.push(text),
            None => {}
        }

        turn.generation += 1;
        turn.timer = Some(self.arm(recipient.to_string(), turn.generation, self.settings.debounce));
        debug!(
            recipient = %recipient,
            buffered = turn.buffer.len(),
            in_flight = turn.in_flight,
            "assistant turn scheduled"
        );
    }

    /// Recipients with a pending or running turn.
    pub async fn active_turns(&self) -> usize {
        self.turns.lock().await.len()
    }

    fn arm(self: &Arc<Self>, recipient: String, generation: u64, delay: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(recipient, generation).await;
        })
    }

    async fn fire(self: Arc<Self>, recipient: String, generation: u64) {
        let (messages, cached_name) = {
            let mut turns = self.turns.lock().await;
            let Some(turn) = turns.get_mut(&recipient) else {
                return;
            };
            if turn.generation != generation {
                return;
            }
            if turn.in_flight {
                debug!(recipient = %recipient, "previous turn still running, re-arming");
                turn.timer = Some(self.arm(recipient.clone(), generation, self.settings.debounce));
                return;
            }
            // Released so a new message cannot abort the turn that is about
            // to run; it schedules a fresh timer instead.
            turn.timer = None;
            if turn.buffer.is_empty() {
                turns.remove(&recipient);
                return;
            }
            turn.in_flight = true;
            (std::mem::take(&mut turn.buffer), turn.display_name.clone())
        };

        let combined = messages.join(" ");
        let outcome = AssertUnwindSafe(self.run_turn(&recipient, &combined, messages.len(), cached_name))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(recipient = %recipient, "assistant turn panicked");
        }
        self.finish(&recipient).await;
    }

    async fn run_turn(
        &self,
        recipient: &str,
        combined: &str,
        message_count: usize,
        cached_name: Option<String>,
    ) {
        let display_name = self.resolve_name(recipient, cached_name).await;
        info!(
            recipient = %recipient,
            messages = message_count,
            chars = combined.chars().count(),
            "assistant turn started"
        );

        let model = self.model.as_ref();
        let name = display_name.as_str();
        let reply = retry(&self.retry, "language_model", move || {
            model.converse(recipient, combined, name)
        })
        .await;

        match reply {
            Ok(units) => {
                let units = units
                    .into_iter()
                    .filter(|unit| !unit.trim().is_empty())
                    .collect::<Vec<_>>();
                if units.is_empty() {
                    warn!(recipient = %recipient, "model returned nothing, sending fallback");
                    self.sequencer
                        .deliver(recipient, replies::empty_reply(&self.settings.agency_name))
                        .await;
                } else {
                    info!(recipient = %recipient, units = units.len(), "assistant reply ready");
                    self.sequencer.deliver(recipient, units).await;
                }
            }
            Err(err) => {
                error!(recipient = %recipient, error = %err, "assistant turn failed");
                self.sequencer.deliver(recipient, replies::TURN_FAILED).await;
            }
        }
    }

    async fn resolve_name(&self, recipient: &str, cached: Option<String>) -> String {
        if let Some(name) = cached {
            return name;
        }
        match self.store.contact_display_name(recipient).await {
            Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => self.settings.fallback_display_name.clone(),
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "contact name lookup failed");
                self.settings.fallback_display_name.clone()
            }
        }
    }

    /// Clears the in-flight flag and drops the turn unless messages arrived
    /// while it ran.
    async fn finish(&self, recipient: &str) {
        let mut turns = self.turns.lock().await;
        let Some(turn) = turns.get_mut(recipient) else {
            return;
        };
        turn.in_flight = false;
        if turn.buffer.is_empty() && turn.timer.is_none() {
            let idle = turn.last_activity.map(|at| at.elapsed()).unwrap_or_default();
            turns.remove(recipient);
            debug!(recipient = %recipient, idle_ms = idle.as_millis() as u64, "assistant turn closed");
        }
    }
}
