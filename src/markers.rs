//! Side-channel markers embedded in the visible part of a model reply.
//!
//! | marker | payload |
//! |---|---|
//! | `[[PROMO_GROUP]]` | JSON object ([`GroupedPromo`]) |
//! | `[[PROMOS]]` | JSON array of [`FlatPromo`] |
//! | `[[FICHA_COTI:<id>]] … data: {…}` | quote request object |
//! | `[[CONSULTA_RESERVA]]` | none |
//!
//! Every marker is removed from the text the customer sees, whether or not
//! its payload decodes.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const GROUPED_PROMO_MARKER: &str = "[[PROMO_GROUP]]";
pub const FLAT_PROMO_MARKER: &str = "[[PROMOS]]";
pub const RESERVATION_MARKER: &str = "[[CONSULTA_RESERVA]]";
const QUOTE_MARKER_PATTERN: &str = r"\[\[FICHA_COTI:\s*(\d+)\s*\]\]";
const DATA_LABEL_PATTERN: &str = r"(?i)\bdata\s*:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedPromo {
    #[serde(default, alias = "imagenes", deserialize_with = "image_list")]
    pub images: Vec<String>,
    #[serde(default, alias = "offers", alias = "ofertas", alias = "offers_text")]
    pub offers_text: Option<String>,
    #[serde(
        default,
        alias = "copy",
        alias = "copyConsolidado",
        alias = "consolidated_copy"
    )]
    pub consolidated_copy: Option<String>,
    #[serde(default, alias = "desglose", alias = "price_breakdown")]
    pub price_breakdown: Option<String>,
    #[serde(default, alias = "incluye", alias = "inclusions")]
    pub includes: Option<String>,
    #[serde(default, alias = "followUp", alias = "cta", alias = "seguimiento")]
    pub followup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FlatPromo {
    #[serde(default, alias = "imagenes", deserialize_with = "image_list")]
    pub images: Vec<String>,
    #[serde(default, alias = "texto", alias = "text", alias = "copy")]
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedQuote {
    pub quote_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideChannels {
    pub visible_text: String,
    pub grouped_promo: Option<GroupedPromo>,
    pub flat_promos: Vec<FlatPromo>,
    pub quotes: Vec<EmbeddedQuote>,
    pub reservation_lookup: bool,
}

/// Pulls every side-channel payload out of `text`.
pub fn extract(text: &str) -> SideChannels {
    let mut remaining = text.to_string();
    let mut found = SideChannels::default();

    while let Some(at) = remaining.find(GROUPED_PROMO_MARKER) {
        let body_at = at + GROUPED_PROMO_MARKER.len();
        let end = match json_after(&remaining, body_at) {
            Some((value, end)) => {
                if found.grouped_promo.is_none() {
                    found.grouped_promo = serde_json::from_value::<GroupedPromo>(value).ok();
                }
                end
            }
            None => fallback_end(&remaining, body_at, '}'),
        };
        remaining.replace_range(at..end, "");
    }

    while let Some(at) = remaining.find(FLAT_PROMO_MARKER) {
        let body_at = at + FLAT_PROMO_MARKER.len();
        let end = match json_after(&remaining, body_at) {
            Some((Value::Array(items), end)) => {
                found.flat_promos.extend(
                    items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value::<FlatPromo>(item).ok())
                        .filter(|promo| !promo.images.is_empty() || !promo.caption.trim().is_empty()),
                );
                end
            }
            Some((_, end)) => end,
            None => fallback_end(&remaining, body_at, ']'),
        };
        remaining.replace_range(at..end, "");
    }

    if let (Ok(marker_re), Ok(data_re)) = (
        Regex::new(QUOTE_MARKER_PATTERN),
        Regex::new(DATA_LABEL_PATTERN),
    ) {
        while let Some(caps) = marker_re.captures(&remaining) {
            let Some(whole) = caps.get(0) else {
                break;
            };
            let quote_id = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let (start, marker_end) = (whole.start(), whole.end());

            let end = match data_re.find_at(&remaining, marker_end) {
                Some(label) => match json_after(&remaining, label.end()) {
                    Some((payload @ Value::Object(_), end)) => {
                        found.quotes.push(EmbeddedQuote {
                            quote_id: quote_id.clone(),
                            payload,
                        });
                        end
                    }
                    Some((_, end)) => end,
                    None => fallback_end(&remaining, label.end(), '}'),
                },
                None => marker_end,
            };
            remaining.replace_range(start..end, "");
        }
    }

    if remaining.contains(RESERVATION_MARKER) {
        found.reservation_lookup = true;
        remaining = remaining.replace(RESERVATION_MARKER, "");
    }

    found.visible_text = tidy(&remaining);
    found
}

/// Decodes the JSON value that starts at `from` (after optional whitespace)
/// and returns it with the byte offset right after it.
fn json_after(text: &str, from: usize) -> Option<(Value, usize)> {
    let rest = text.get(from..)?;
    let skipped = rest.len() - rest.trim_start().len();
    let body = &rest[skipped..];
    if !body.starts_with(['{', '[']) {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, from + skipped + stream.byte_offset())),
        _ => None,
    }
}

/// End of a payload that failed to decode: the last closing bracket after
/// the marker, else the end of the text.
fn fallback_end(text: &str, from: usize, closer: char) -> usize {
    text.get(from..)
        .and_then(|rest| rest.rfind(closer))
        .map(|rel| from + rel + closer.len_utf8())
        .unwrap_or(text.len())
}

fn tidy(text: &str) -> String {
    let mut lines = Vec::new();
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

fn image_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let items = match raw {
        Some(Value::Array(items)) => items,
        Some(single @ (Value::String(_) | Value::Object(_))) => vec![single],
        _ => Vec::new(),
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.trim().to_string()),
            Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("link"))
                .and_then(Value::as_str)
                .map(|url| url.trim().to_string()),
            _ => None,
        })
        .filter(|url| !url.is_empty())
        .collect())
}
