//! Extraction of the structured control block the model appends to its
//! replies.
//!
//! The block is delimited by `<ctrl>` and `</ctrl>` and wraps a JSON object:
//!
//! ```text
//! ¡Claro! Te ayudo con tu viaje a Cancún.
//! <ctrl>{"intent":"cotizacion","tags":["cancun"],"copies":[...]}</ctrl>
//! ```
//!
//! The model does not always close the block, so a missing closing delimiter
//! means "payload runs to the end of the text". A payload that does not decode
//! is dropped; the caller still gets the visible text.

use serde_json::Value;

const DELIMITERS: [(&str, &str); 2] = [("<ctrl>", "</ctrl>"), ("<control>", "</control>")];

#[derive(Debug, Clone, PartialEq)]
pub struct CopyBlock {
    pub text: String,
    pub quote_id: Option<String>,
    pub quote_request: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlPayload {
    pub intent: Option<String>,
    pub tags: Vec<String>,
    pub copies: Vec<CopyBlock>,
    pub promo_filter: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub visible_text: String,
    pub control: Option<ControlPayload>,
}

/// Splits raw model output into the text the customer may see and the
/// control payload, if one could be decoded.
pub fn parse(raw: &str) -> ParsedResponse {
    let lower = raw.to_ascii_lowercase();
    let Some((open_at, open_len, close)) = find_open(&lower) else {
        return ParsedResponse {
            visible_text: remove_orphan_closers(raw).trim().to_string(),
            control: None,
        };
    };

    let body_start = open_at + open_len;
    let (body, span_end) = match lower[body_start..].find(close) {
        Some(rel) => (
            &raw[body_start..body_start + rel],
            body_start + rel + close.len(),
        ),
        None => (&raw[body_start..], raw.len()),
    };

    let mut visible = String::with_capacity(raw.len());
    visible.push_str(raw[..open_at].trim_end());
    let tail = raw[span_end..].trim();
    if !tail.is_empty() {
        if !visible.is_empty() {
            visible.push('\n');
        }
        visible.push_str(tail);
    }

    // The model sometimes emits a second block; it must not leak either.
    let rest = parse(&visible);
    let control = decode_payload(body).or(rest.control);

    ParsedResponse {
        visible_text: rest.visible_text,
        control,
    }
}

/// Removes control-block markup, discarding the payload.
pub fn strip_markup(text: &str) -> String {
    parse(text).visible_text
}

/// Whether the text still carries any control delimiter.
pub fn contains_markup(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    DELIMITERS
        .iter()
        .any(|(open, close)| lower.contains(open) || lower.contains(close))
}

fn find_open(lower: &str) -> Option<(usize, usize, &'static str)> {
    DELIMITERS
        .iter()
        .filter_map(|(open, close)| lower.find(open).map(|at| (at, open.len(), *close)))
        .min_by_key(|(at, _, _)| *at)
}

fn remove_orphan_closers(text: &str) -> String {
    let mut out = text.to_string();
    for (_, close) in DELIMITERS {
        while let Some(at) = out.to_ascii_lowercase().find(close) {
            out.replace_range(at..at + close.len(), "");
        }
    }
    out
}

fn decode_payload(body: &str) -> Option<ControlPayload> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut candidates = vec![trimmed.to_string()];
    if trimmed.starts_with("```") {
        let stripped = trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string();
        if !stripped.is_empty() {
            candidates.push(stripped);
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            candidates.push(trimmed[start..=end].to_string());
        }
    }

    candidates.into_iter().find_map(|candidate| {
        let value = serde_json::from_str::<Value>(&candidate).ok()?;
        value.is_object().then(|| payload_from_value(&value))
    })
}

fn payload_from_value(value: &Value) -> ControlPayload {
    let intent = value
        .get("intent")
        .or_else(|| value.get("intencion"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let tags = value
        .get("tags")
        .or_else(|| value.get("suggestedTags"))
        .or_else(|| value.get("suggested_tags"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let copies = value
        .get("copies")
        .or_else(|| value.get("copys"))
        .or_else(|| value.get("copy"))
        .map(|raw| match raw {
            Value::Array(items) => items.iter().filter_map(copy_from_value).collect(),
            other => copy_from_value(other).into_iter().collect(),
        })
        .unwrap_or_default();

    let promo_filter = value
        .get("promoFilter")
        .or_else(|| value.get("promo_filter"))
        .filter(|filter| filter.is_object())
        .cloned();

    ControlPayload {
        intent,
        tags,
        copies,
        promo_filter,
    }
}

fn copy_from_value(value: &Value) -> Option<CopyBlock> {
    if let Some(text) = value.as_str() {
        return Some(CopyBlock {
            text: text.trim().to_string(),
            quote_id: None,
            quote_request: None,
        });
    }
    let obj = value.as_object()?;
    let text = obj
        .get("text")
        .or_else(|| obj.get("copy"))
        .or_else(|| obj.get("texto"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let quote_request = obj
        .get("quoteRequest")
        .or_else(|| obj.get("quote_request"))
        .or_else(|| obj.get("fichaCoti"))
        .or_else(|| obj.get("ficha_coti"))
        .filter(|request| request.is_object())
        .cloned();
    let quote_id = obj
        .get("quoteId")
        .or_else(|| obj.get("quote_id"))
        .or_else(|| obj.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty());

    if text.is_empty() && quote_request.is_none() {
        return None;
    }
    Some(CopyBlock {
        text,
        quote_id,
        quote_request,
    })
}
