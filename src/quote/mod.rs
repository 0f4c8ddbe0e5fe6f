//! Quote requests emitted by the model, searched one window at a time.

pub mod format;
pub mod windows;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{PacingConfig, QuoteSettings};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::ports::{LeadStore, LiveBus, TravelSearch};
use crate::replies;
use crate::retry::{retry, RetryPolicy};
use crate::types::{
    DateWindow, MediaRef, QuoteJob, QuoteLead, QuoteRequest, RawWindow, SearchOption, SearchQuery,
    TransportMode, TravelerComposition,
};

use self::windows::WindowPolicy;

const MAX_TEXT_CHUNK_CHARS: usize = 1000;
const DEFAULT_ADULTS: u32 = 2;

/// Hands quote jobs to the single background processor.
#[derive(Clone)]
pub struct QuoteQueue {
    tx: mpsc::UnboundedSender<QuoteJob>,
}

impl QuoteQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QuoteJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: QuoteJob) {
        let quote_id = job.quote_id.clone();
        if self.tx.send(job).is_err() {
            warn!(quote_id = %quote_id, "quote processor is gone, dropping job");
        }
    }
}

/// Reads a quote request the way the model writes it: English or Spanish
/// keys, one window or a list, transport as a string or a list.
pub fn parse_request(value: &Value) -> Option<QuoteRequest> {
    let destination = text_field(value, &["destination", "destino"])?;

    let mut raw_windows = Vec::new();
    if let Some(items) = field(value, &["windows", "fechas", "ventanas", "dates"])
        .and_then(Value::as_array)
    {
        raw_windows.extend(
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<RawWindow>(item.clone()).ok()),
        );
    }
    if raw_windows.is_empty() {
        raw_windows.extend(serde_json::from_value::<RawWindow>(value.clone()).ok());
    }
    if raw_windows.is_empty() {
        return None;
    }

    let transport_modes = match field(value, &["transport_modes", "transportModes", "transporte", "transport"]) {
        Some(Value::String(raw)) => raw
            .split([',', '/', '+'])
            .flat_map(|part| part.split(" y "))
            .filter_map(TransportMode::parse)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(TransportMode::parse)
            .collect(),
        _ => Vec::new(),
    };

    let adults = field(value, &["adults", "adultos"])
        .and_then(number)
        .unwrap_or(DEFAULT_ADULTS)
        .max(1);
    let minor_ages = match field(value, &["minor_ages", "minorAges", "menores", "edades_menores"]) {
        Some(Value::Array(items)) => items.iter().filter_map(number).collect(),
        Some(count) => (0..number(count).unwrap_or(0)).map(|_| 0).collect(),
        None => Vec::new(),
    };

    Some(QuoteRequest {
        destination,
        windows: raw_windows,
        transport_modes,
        travelers: TravelerComposition { adults, minor_ages },
        plan: text_field(value, &["plan", "meal_plan", "mealPlan"]),
        desired_hotel: text_field(value, &["desired_hotel", "desiredHotel", "hotel"]),
        budget: text_field(value, &["budget", "presupuesto"]),
    })
}

/// Requested modes without repeats, in request order. Nothing requested
/// means a flight quote.
pub fn normalize_modes(modes: &[TransportMode]) -> Vec<TransportMode> {
    let mut unique = Vec::new();
    for mode in modes {
        if !unique.contains(mode) {
            unique.push(*mode);
        }
    }
    if unique.is_empty() {
        unique.push(TransportMode::Flight);
    }
    unique
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .filter(|v| !v.is_null())
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    match field(value, keys)? {
        Value::String(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Works through quote jobs strictly one at a time.
pub struct QuoteProcessor {
    dispatcher: Arc<Dispatcher>,
    search: Arc<dyn TravelSearch>,
    leads: Arc<dyn LeadStore>,
    bus: Arc<dyn LiveBus>,
    policy: Arc<dyn WindowPolicy>,
    settings: QuoteSettings,
    pacing: PacingConfig,
    retry: RetryPolicy,
}

impl QuoteProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        search: Arc<dyn TravelSearch>,
        leads: Arc<dyn LeadStore>,
        bus: Arc<dyn LiveBus>,
        policy: Arc<dyn WindowPolicy>,
        settings: QuoteSettings,
        pacing: PacingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            search,
            leads,
            bus,
            policy,
            settings,
            pacing,
            retry,
        }
    }

    pub async fn run(self: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<QuoteJob>) {
        info!("quote processor started");
        while let Some(job) = jobs.recv().await {
            self.process(job).await;
        }
        info!("quote processor stopped");
    }

    pub async fn process(&self, job: QuoteJob) {
        let QuoteJob {
            recipient,
            quote_id,
            request,
        } = job;
        let modes = normalize_modes(&request.transport_modes);
        let transport_label = modes
            .iter()
            .map(|mode| mode.label())
            .collect::<Vec<_>>()
            .join(" + ");
        let today = Utc::now().date_naive();
        info!(
            recipient = %recipient,
            quote_id = %quote_id,
            destination = %request.destination,
            modes = %transport_label,
            "processing quote request"
        );

        let mut lead_saved = false;
        let mut options_shown = 0usize;
        for mode in &modes {
            let windows = windows::derive_windows(
                self.policy.as_ref(),
                *mode,
                &request.windows,
                self.settings.max_windows,
                today,
            );
            if windows.is_empty() {
                info!(quote_id = %quote_id, mode = mode.as_str(), "no searchable window for mode");
                continue;
            }
            if modes.len() > 1 {
                self.say(&recipient, &replies::mode_transition(*mode)).await;
            }

            for window in windows {
                match self.run_window(&recipient, &request, *mode, &window).await {
                    Ok(0) => {
                        info!(quote_id = %quote_id, window = %window.label(), "search returned no options");
                        self.say(
                            &recipient,
                            &replies::no_options(&request.destination, &window, *mode),
                        )
                        .await;
                    }
                    Ok(option_count) => {
                        options_shown += option_count;
                        if !lead_saved {
                            lead_saved = true;
                            self.save_lead(
                                &recipient,
                                &quote_id,
                                &request,
                                &window,
                                &transport_label,
                                option_count,
                            )
                            .await;
                        }
                    }
                    Err(err) => {
                        error!(
                            recipient = %recipient,
                            quote_id = %quote_id,
                            mode = mode.as_str(),
                            window = %window.label(),
                            error = %err,
                            "quote window failed"
                        );
                        self.bus
                            .publish(
                                "quote:window-failed",
                                json!({
                                    "recipient": recipient,
                                    "quoteId": quote_id,
                                    "mode": mode.as_str(),
                                    "window": window,
                                    "error": err.to_string(),
                                }),
                            )
                            .await;
                        self.say(
                            &recipient,
                            &replies::window_failed(&request.destination, &window, *mode),
                        )
                        .await;
                    }
                }
            }
        }
        if options_shown > 0 {
            self.say(&recipient, format::CLOSING_PROMPT).await;
        }
        info!(quote_id = %quote_id, lead_saved, options_shown, "quote request finished");
    }

    /// Searches one window and sends its results. Returns how many options
    /// were shown.
    async fn run_window(
        &self,
        recipient: &str,
        request: &QuoteRequest,
        mode: TransportMode,
        window: &DateWindow,
    ) -> Result<usize> {
        let query = SearchQuery {
            destination: request.destination.clone(),
            window: *window,
            travelers: request.travelers.clone(),
            mode,
            plan: request.plan.clone(),
        };
        let (search, query) = (self.search.as_ref(), &query);
        let results = retry(&self.retry, "travel_search", move || search.search(query)).await?;
        let mut options = results.options;
        if options.is_empty() {
            return Ok(0);
        }
        for option in options.iter_mut() {
            self.enrich(option).await;
        }

        let header = format::header(
            &request.destination,
            window,
            mode,
            &request.travelers,
            options.len(),
        );
        let tag = format::window_tag(window, mode);
        for chunk in format::window_chunks(&header, &tag, &options, MAX_TEXT_CHUNK_CHARS) {
            let sent = match chunk.image {
                Some(url) => {
                    self.dispatcher
                        .send_media(recipient, &chunk.text, MediaRef::image(url))
                        .await
                }
                None => self.dispatcher.send_text(recipient, &chunk.text).await,
            };
            if let Err(err) = sent {
                warn!(recipient = %recipient, error = %err, "quote chunk not delivered");
            }
            tokio::time::sleep(self.pacing.quote_chunk).await;
        }
        Ok(options.len())
    }

    /// Best effort: an option without pictures borrows some from the
    /// provider's media endpoint.
    async fn enrich(&self, option: &mut SearchOption) {
        if option.images.len() >= self.settings.media_per_option {
            return;
        }
        match self.search.option_media(option).await {
            Ok(urls) => {
                let missing = self.settings.media_per_option - option.images.len();
                let fresh = urls
                    .into_iter()
                    .filter(|url| !option.images.contains(url))
                    .take(missing)
                    .collect::<Vec<_>>();
                option.images.extend(fresh);
            }
            Err(err) => warn!(hotel = %option.hotel, error = %err, "option media lookup failed"),
        }
    }

    async fn save_lead(
        &self,
        recipient: &str,
        quote_id: &str,
        request: &QuoteRequest,
        window: &DateWindow,
        transport_label: &str,
        option_count: usize,
    ) {
        let lead = QuoteLead {
            recipient: recipient.to_string(),
            quote_id: quote_id.to_string(),
            destination: request.destination.clone(),
            window: *window,
            travelers: request.travelers.clone(),
            plan: request.plan.clone(),
            transport_label: transport_label.to_string(),
            desired_hotel: request.desired_hotel.clone(),
            budget: request.budget.clone(),
            option_count,
            created_at: Utc::now(),
        };
        match self.leads.save_quote_lead(&lead).await {
            Ok(lead_id) => {
                info!(quote_id = %quote_id, lead_id = %lead_id, "quote lead saved");
                self.bus
                    .publish(
                        "quote:lead-saved",
                        json!({ "recipient": recipient, "leadId": lead_id, "lead": lead }),
                    )
                    .await;
            }
            Err(err) => error!(quote_id = %quote_id, error = %err, "quote lead could not be saved"),
        }
    }

    async fn say(&self, recipient: &str, text: &str) {
        if let Err(err) = self.dispatcher.send_text(recipient, text).await {
            warn!(recipient = %recipient, error = %err, "quote status message not delivered");
        }
        tokio::time::sleep(self.pacing.quote_chunk).await;
    }
}
