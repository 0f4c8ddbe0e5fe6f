//! Quote results as WhatsApp-sized messages.

use std::fmt::Write as _;

use crate::types::{DateWindow, SearchOption, TransportMode, TravelerComposition};

pub const CLOSING_PROMPT: &str =
    "¿Te gustaría apartar alguna? Respóndeme con el número de la opción 😊";

/// One outbound message of a quote window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteChunk {
    pub text: String,
    pub image: Option<String>,
}

impl QuoteChunk {
    fn text(text: String) -> Self {
        Self { text, image: None }
    }
}

pub fn header(
    destination: &str,
    window: &DateWindow,
    mode: TransportMode,
    travelers: &TravelerComposition,
    option_count: usize,
) -> String {
    let icon = match mode {
        TransportMode::Flight => "✈️",
        TransportMode::Bus => "🚌",
        TransportMode::OwnCar => "🚗",
    };
    let nights = match window.nights() {
        1 => "1 noche".to_string(),
        n => format!("{n} noches"),
    };
    format!(
        "{icon} *{destination}* {}\n{nights} · {} · {}\nEncontré {option_count} {}:",
        window.label(),
        mode.label(),
        travelers.label(),
        if option_count == 1 { "opción" } else { "opciones" }
    )
}

pub fn option_block(position: usize, option: &SearchOption) -> String {
    let mut block = format!("*{position}. {}*", option.hotel.trim());
    if let Some(tier) = option.tier.as_deref().filter(|t| !t.trim().is_empty()) {
        let _ = write!(block, " ({})", tier.trim());
    }
    let currency = option.currency.as_deref().unwrap_or("MXN");
    if let Some(plan) = option.plan.as_deref().filter(|p| !p.trim().is_empty()) {
        let _ = write!(block, "\n🍽️ {}", plan.trim());
    }
    if let Some(price) = option.price_per_person {
        let _ = write!(block, "\n💵 Desde {} {currency} por persona", money(price));
    }
    if let Some(total) = option.total_price {
        let _ = write!(block, "\n💰 Total: {} {currency}", money(total));
    }
    let extras = option
        .extras
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>();
    if !extras.is_empty() {
        let _ = write!(block, "\n✨ {}", extras.join(", "));
    }
    if let Some(link) = option.link.as_deref().filter(|l| !l.trim().is_empty()) {
        let _ = write!(block, "\n🔗 {}", link.trim());
    }
    block
}

/// Which window and mode a pictured option belongs to, e.g.
/// `del 10/03/2030 al 15/03/2030 · Avión`.
pub fn window_tag(window: &DateWindow, mode: TransportMode) -> String {
    format!("{} · {}", window.label(), mode.label())
}

/// The messages for one window: header and options.
///
/// Options with a picture go out as captioned images carrying `tag`, so the
/// same hotel shown for two windows is two distinct messages; the rest are
/// packed into text messages of at most `max_chars` characters. Order is
/// kept.
pub fn window_chunks(
    header_text: &str,
    tag: &str,
    options: &[SearchOption],
    max_chars: usize,
) -> Vec<QuoteChunk> {
    let mut chunks = Vec::new();
    let mut buffer = header_text.to_string();

    for (index, option) in options.iter().enumerate() {
        let block = option_block(index + 1, option);
        if let Some(image) = option.images.iter().find(|url| !url.trim().is_empty()) {
            flush(&mut chunks, &mut buffer);
            chunks.push(QuoteChunk {
                text: format!("{block}\n🗓️ {tag}"),
                image: Some(image.trim().to_string()),
            });
            continue;
        }
        if !buffer.is_empty()
            && buffer.chars().count() + block.chars().count() + 2 > max_chars
        {
            flush(&mut chunks, &mut buffer);
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(&block);
    }

    flush(&mut chunks, &mut buffer);
    chunks
}

fn flush(chunks: &mut Vec<QuoteChunk>, buffer: &mut String) {
    if !buffer.trim().is_empty() {
        chunks.push(QuoteChunk::text(std::mem::take(buffer)));
    }
    buffer.clear();
}

/// `$12,345` style amounts; cents only when present.
pub fn money(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let (whole, fraction) = (cents.abs() / 100, cents.abs() % 100);
    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if cents < 0 { "-" } else { "" };
    if fraction == 0 {
        format!("{sign}${grouped}")
    } else {
        format!("{sign}${grouped}.{fraction:02}")
    }
}
