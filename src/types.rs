use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Assistant,
    Agent,
    Customer,
}

impl SenderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderRole::Assistant => "assistant",
            SenderRole::Agent => "agent",
            SenderRole::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "imagen" | "sticker" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" | "voice" => Some(MediaKind::Audio),
            "document" | "documento" | "file" | "pdf" => Some(MediaKind::Document),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
        }
    }
}

/// One message as it leaves through the WhatsApp channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEnvelope {
    Text {
        body: String,
    },
    Image {
        link: String,
        caption: Option<String>,
    },
    Video {
        link: String,
        caption: Option<String>,
    },
    Audio {
        link: String,
    },
    Document {
        link: String,
        filename: String,
        caption: Option<String>,
    },
}

impl OutboundEnvelope {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutboundEnvelope::Text { .. } => "text",
            OutboundEnvelope::Image { .. } => "image",
            OutboundEnvelope::Video { .. } => "video",
            OutboundEnvelope::Audio { .. } => "audio",
            OutboundEnvelope::Document { .. } => "document",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRecord {
    pub id: String,
    pub recipient: String,
    pub sender: SenderRole,
    #[serde(default)]
    pub sender_label: Option<String>,
    pub content_type: String,
    pub text: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub channel_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRecord {
    pub id: String,
    pub recipient: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub channel_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Which fields of an outbound record must match for a send to count as a
/// duplicate. Absent fields are not compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeCriteria {
    pub text: Option<String>,
    pub media_url: Option<String>,
}

impl DedupeCriteria {
    pub fn new(text: Option<&str>, media_url: Option<&str>) -> Self {
        let clean = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            text: clean(text),
            media_url: clean(media_url),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.media_url.is_none()
    }

    pub fn matches(&self, record: &OutboundRecord) -> bool {
        if self.is_empty() {
            return false;
        }
        let text_ok = self
            .text
            .as_deref()
            .map(|text| record.text.trim() == text)
            .unwrap_or(true);
        let media_ok = self
            .media_url
            .as_deref()
            .map(|url| record.media_url.as_deref() == Some(url))
            .unwrap_or(true);
        text_ok && media_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Flight,
    Bus,
    OwnCar,
}

impl TransportMode {
    /// Maps the free-form labels the model and customers use.
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "avion" | "avión" | "vuelo" | "aereo" | "aéreo" | "flight" | "plane" => {
                Some(TransportMode::Flight)
            }
            "autobus" | "autobús" | "camion" | "camión" | "bus" | "terrestre" => {
                Some(TransportMode::Bus)
            }
            "auto" | "auto propio" | "carro" | "coche" | "car" | "own_car" | "sin transporte" => {
                Some(TransportMode::OwnCar)
            }
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TransportMode::Flight => "Avión",
            TransportMode::Bus => "Autobús",
            TransportMode::OwnCar => "Auto propio",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Flight => "flight",
            TransportMode::Bus => "bus",
            TransportMode::OwnCar => "own_car",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A date range as the customer asked for it, before transport rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWindow {
    #[serde(alias = "salida", alias = "ida", alias = "checkIn", alias = "check_in")]
    pub departure: NaiveDate,
    #[serde(
        rename = "return",
        alias = "regreso",
        alias = "vuelta",
        alias = "checkOut",
        alias = "check_out"
    )]
    pub return_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub departure: NaiveDate,
    pub return_date: NaiveDate,
}

impl DateWindow {
    pub fn nights(&self) -> i64 {
        (self.return_date - self.departure).num_days()
    }

    pub fn label(&self) -> String {
        format!(
            "del {} al {}",
            self.departure.format("%d/%m/%Y"),
            self.return_date.format("%d/%m/%Y")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelerComposition {
    pub adults: u32,
    pub minor_ages: Vec<u32>,
}

impl TravelerComposition {
    pub fn label(&self) -> String {
        let adults = if self.adults == 1 {
            "1 adulto".to_string()
        } else {
            format!("{} adultos", self.adults)
        };
        match self.minor_ages.len() {
            0 => adults,
            1 => format!("{adults} y 1 menor"),
            n => format!("{adults} y {n} menores"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub destination: String,
    pub windows: Vec<RawWindow>,
    pub transport_modes: Vec<TransportMode>,
    pub travelers: TravelerComposition,
    pub plan: Option<String>,
    pub desired_hotel: Option<String>,
    pub budget: Option<String>,
}

/// A quote request waiting for the processor.
#[derive(Debug, Clone)]
pub struct QuoteJob {
    pub recipient: String,
    pub quote_id: String,
    pub request: QuoteRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub destination: String,
    pub window: DateWindow,
    pub travelers: TravelerComposition,
    pub mode: TransportMode,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOption {
    #[serde(alias = "hotel_name", alias = "name")]
    pub hotel: String,
    #[serde(default, alias = "category")]
    pub tier: Option<String>,
    #[serde(default, alias = "meal_plan", alias = "mealPlan")]
    pub plan: Option<String>,
    #[serde(default, alias = "price_per_person")]
    pub price_per_person: Option<f64>,
    #[serde(default, alias = "total", alias = "total_price")]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "url")]
    pub link: Option<String>,
    #[serde(default)]
    pub extras: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default, alias = "results", alias = "opciones")]
    pub options: Vec<SearchOption>,
}

/// The booking lead written once per quote request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLead {
    pub recipient: String,
    pub quote_id: String,
    pub destination: String,
    pub window: DateWindow,
    pub travelers: TravelerComposition,
    pub plan: Option<String>,
    pub transport_label: String,
    pub desired_hotel: Option<String>,
    pub budget: Option<String>,
    pub option_count: usize,
    pub created_at: DateTime<Utc>,
}
