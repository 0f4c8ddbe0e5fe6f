//! In-memory collaborators for unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ports::{
    ChannelConnection, ConversationStore, LanguageModel, LeadStore, LiveBus, ReservationDesk,
    TravelSearch,
};
use crate::types::{
    DedupeCriteria, InboundRecord, OutboundEnvelope, OutboundRecord, QuoteLead, SearchOption,
    SearchQuery, SearchResults,
};

#[derive(Default)]
pub struct MemoryStore {
    outbound: Mutex<Vec<OutboundRecord>>,
    inbound: Mutex<Vec<InboundRecord>>,
    names: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn push_outbound(&self, record: OutboundRecord) {
        self.outbound.lock().unwrap().push(record);
    }

    pub fn push_inbound(&self, recipient: &str, text: &str) {
        self.inbound.lock().unwrap().push(InboundRecord {
            id: uuid::Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            display_name: None,
            text: text.to_string(),
            channel_message_id: None,
            created_at: Utc::now(),
        });
    }

    pub fn set_name(&self, recipient: &str, name: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(recipient.to_string(), name.to_string());
    }

    pub fn outbound(&self) -> Vec<OutboundRecord> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_outbound(&self, record: &OutboundRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("store offline".into()));
        }
        self.push_outbound(record.clone());
        Ok(())
    }

    async fn append_inbound(&self, record: &InboundRecord) -> Result<bool> {
        let mut inbound = self.inbound.lock().unwrap();
        if let Some(id) = &record.channel_message_id {
            if inbound
                .iter()
                .any(|stored| stored.channel_message_id.as_ref() == Some(id))
            {
                return Ok(false);
            }
        }
        inbound.push(record.clone());
        Ok(true)
    }

    async fn recent_outbound(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
        criteria: &DedupeCriteria,
    ) -> Result<Vec<OutboundRecord>> {
        self.check_read()?;
        let mut records = self
            .outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.recipient == recipient && r.created_at >= since && criteria.matches(r))
            .cloned()
            .collect::<Vec<_>>();
        records.reverse();
        Ok(records)
    }

    async fn last_inbound_text(&self, recipient: &str) -> Result<Option<String>> {
        self.check_read()?;
        Ok(self
            .inbound
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.recipient == recipient)
            .map(|r| r.text.clone()))
    }

    async fn contact_display_name(&self, recipient: &str) -> Result<Option<String>> {
        self.check_read()?;
        Ok(self.names.lock().unwrap().get(recipient).cloned())
    }
}

/// Records every transmitted envelope in order.
pub struct FakeChannel {
    ready: AtomicBool,
    sent: Mutex<Vec<(String, OutboundEnvelope)>>,
    broken_links: Mutex<HashSet<String>>,
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            broken_links: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeChannel {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn break_link(&self, link: &str) {
        self.broken_links.lock().unwrap().insert(link.to_string());
    }

    pub fn sent(&self) -> Vec<(String, OutboundEnvelope)> {
        self.sent.lock().unwrap().clone()
    }

    /// Compact one-line view of each transmitted envelope.
    pub fn transcript(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, envelope)| match envelope {
                OutboundEnvelope::Text { body } => format!("text:{body}"),
                OutboundEnvelope::Image { link, .. } => format!("image:{link}"),
                OutboundEnvelope::Video { link, .. } => format!("video:{link}"),
                OutboundEnvelope::Audio { link } => format!("audio:{link}"),
                OutboundEnvelope::Document { link, .. } => format!("document:{link}"),
            })
            .collect()
    }
}

#[async_trait]
impl ChannelConnection for FakeChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn transmit(&self, recipient: &str, envelope: &OutboundEnvelope) -> Result<String> {
        let link = match envelope {
            OutboundEnvelope::Image { link, .. }
            | OutboundEnvelope::Video { link, .. }
            | OutboundEnvelope::Audio { link }
            | OutboundEnvelope::Document { link, .. } => Some(link.clone()),
            OutboundEnvelope::Text { .. } => None,
        };
        if let Some(link) = link {
            if self.broken_links.lock().unwrap().contains(&link) {
                return Err(Error::ChannelRejected {
                    status: 400,
                    body: format!("media download failed: {link}"),
                });
            }
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), envelope.clone()));
        Ok(format!("wamid.{}", sent.len()))
    }
}

#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

#[async_trait]
impl LiveBus for RecordingBus {
    async fn publish(&self, event: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
    }
}

/// Replies with queued answers and remembers every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Vec<String>>>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedModel {
    pub fn reply(&self, units: &[&str]) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(units.iter().map(|u| u.to_string()).collect()));
    }

    pub fn fail(&self, error: Error) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn converse(
        &self,
        recipient: &str,
        combined_text: &str,
        display_name: &str,
    ) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push((
            recipient.to_string(),
            combined_text.to_string(),
            display_name.to_string(),
        ));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Answers searches from a queue, one entry per call.
#[derive(Default)]
pub struct ScriptedSearch {
    answers: Mutex<VecDeque<Result<SearchResults>>>,
    queries: Mutex<Vec<SearchQuery>>,
    media: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedSearch {
    pub fn answer(&self, options: Vec<SearchOption>) {
        self.answers
            .lock()
            .unwrap()
            .push_back(Ok(SearchResults { options }));
    }

    pub fn fail(&self, error: Error) {
        self.answers.lock().unwrap().push_back(Err(error));
    }

    pub fn media_for(&self, hotel: &str, urls: &[&str]) {
        self.media.lock().unwrap().insert(
            hotel.to_string(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TravelSearch for ScriptedSearch {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.queries.lock().unwrap().push(query.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchResults::default()))
    }

    async fn option_media(&self, option: &SearchOption) -> Result<Vec<String>> {
        Ok(self
            .media
            .lock()
            .unwrap()
            .get(&option.hotel)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryLeads {
    leads: Mutex<Vec<QuoteLead>>,
}

impl MemoryLeads {
    pub fn leads(&self) -> Vec<QuoteLead> {
        self.leads.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeadStore for MemoryLeads {
    async fn save_quote_lead(&self, lead: &QuoteLead) -> Result<String> {
        let mut leads = self.leads.lock().unwrap();
        leads.push(lead.clone());
        Ok(format!("lead-{}", leads.len()))
    }
}

#[derive(Default)]
pub struct FakeReservations {
    summaries: Mutex<HashMap<String, String>>,
}

impl FakeReservations {
    pub fn set(&self, recipient: &str, summary: &str) {
        self.summaries
            .lock()
            .unwrap()
            .insert(recipient.to_string(), summary.to_string());
    }
}

#[async_trait]
impl ReservationDesk for FakeReservations {
    async fn reservation_summary(&self, recipient: &str) -> Result<Option<String>> {
        Ok(self.summaries.lock().unwrap().get(recipient).cloned())
    }
}
