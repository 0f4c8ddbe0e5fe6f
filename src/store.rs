//! Postgres persistence for conversations, quote leads and reservations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::ports::{ConversationStore, LeadStore, ReservationDesk};
use crate::types::{DateWindow, DedupeCriteria, InboundRecord, OutboundRecord, QuoteLead, SenderRole};

const DEDUPE_SCAN_LIMIT: i64 = 5;
const RESERVATION_LIMIT: i64 = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

fn parse_outbound_row(row: PgRow) -> Result<OutboundRecord> {
    let sender: String = row.try_get("sender")?;
    Ok(OutboundRecord {
        id: row.try_get("id")?,
        recipient: row.try_get("phone")?,
        sender: match sender.as_str() {
            "agent" => SenderRole::Agent,
            "customer" => SenderRole::Customer,
            _ => SenderRole::Assistant,
        },
        sender_label: row.try_get("sender_label")?,
        content_type: row.try_get("content_type")?,
        text: row.try_get("text")?,
        media_url: row.try_get("media_url")?,
        channel_message_id: row.try_get("channel_message_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn append_outbound(&self, record: &OutboundRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbound_messages (
                id, phone, sender, sender_label, content_type, text, media_url,
                channel_message_id, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.recipient)
        .bind(record.sender.as_str())
        .bind(&record.sender_label)
        .bind(&record.content_type)
        .bind(&record.text)
        .bind(&record.media_url)
        .bind(&record.channel_message_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_inbound(&self, record: &InboundRecord) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO inbound_messages (id, phone, display_name, text, channel_message_id, created_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.recipient)
        .bind(&record.display_name)
        .bind(&record.text)
        .bind(&record.channel_message_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        if !inserted {
            return Ok(false);
        }

        if let Some(name) = record.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            sqlx::query(
                r#"
                INSERT INTO contacts (phone, display_name, updated_at) VALUES ($1,$2,$3)
                ON CONFLICT (phone) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&record.recipient)
            .bind(name.trim())
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(true)
    }

    async fn recent_outbound(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
        criteria: &DedupeCriteria,
    ) -> Result<Vec<OutboundRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, phone, sender, sender_label, content_type, text, media_url,
                   channel_message_id, created_at
            FROM outbound_messages
            WHERE phone = $1
              AND created_at >= $2
              AND ($3::text IS NULL OR text = $3)
              AND ($4::text IS NULL OR media_url = $4)
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(recipient)
        .bind(since)
        .bind(&criteria.text)
        .bind(&criteria.media_url)
        .bind(DEDUPE_SCAN_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_outbound_row).collect()
    }

    async fn last_inbound_text(&self, recipient: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT text FROM inbound_messages WHERE phone = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(recipient)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("text")?),
            None => None,
        })
    }

    async fn contact_display_name(&self, recipient: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT display_name FROM contacts WHERE phone = $1")
            .bind(recipient)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get::<Option<String>, _>("display_name")?,
            None => None,
        })
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn save_quote_lead(&self, lead: &QuoteLead) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO quote_leads (
                id, quote_id, phone, destination, departure, return_date, adults, minor_ages,
                plan, transport_label, desired_hotel, budget, option_count, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(&id)
        .bind(&lead.quote_id)
        .bind(&lead.recipient)
        .bind(&lead.destination)
        .bind(lead.window.departure)
        .bind(lead.window.return_date)
        .bind(i32::try_from(lead.travelers.adults).unwrap_or(i32::MAX))
        .bind(json!(lead.travelers.minor_ages))
        .bind(&lead.plan)
        .bind(&lead.transport_label)
        .bind(&lead.desired_hotel)
        .bind(&lead.budget)
        .bind(i32::try_from(lead.option_count).unwrap_or(i32::MAX))
        .bind(lead.created_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationLine {
    pub code: String,
    pub destination: String,
    pub window: DateWindow,
    pub status: String,
}

#[async_trait]
impl ReservationDesk for PgStore {
    async fn reservation_summary(&self, recipient: &str) -> Result<Option<String>> {
        let rows = sqlx::query(
            r#"
            SELECT code, destination, departure, return_date, status
            FROM reservations
            WHERE phone = $1
            ORDER BY departure DESC
            LIMIT $2
            "#,
        )
        .bind(recipient)
        .bind(RESERVATION_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            lines.push(ReservationLine {
                code: row.try_get("code")?,
                destination: row.try_get("destination")?,
                window: DateWindow {
                    departure: row.try_get::<NaiveDate, _>("departure")?,
                    return_date: row.try_get::<NaiveDate, _>("return_date")?,
                },
                status: row.try_get("status")?,
            });
        }
        Ok(summarize_reservations(&lines))
    }
}

pub fn summarize_reservations(lines: &[ReservationLine]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let mut summary = if lines.len() == 1 {
        "Encontré tu reservación ✈️".to_string()
    } else {
        format!("Encontré {} reservaciones ✈️", lines.len())
    };
    for line in lines {
        summary.push_str(&format!(
            "\n• *{}* · {} {} · {}",
            line.code,
            line.destination,
            line.window.label(),
            capitalize(&line.status)
        ));
    }
    Some(summary)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_summary_lists_each_booking() {
        let line = ReservationLine {
            code: "RSV-889".into(),
            destination: "Cancún".into(),
            window: DateWindow {
                departure: NaiveDate::from_ymd_opt(2030, 3, 10).unwrap(),
                return_date: NaiveDate::from_ymd_opt(2030, 3, 15).unwrap(),
            },
            status: "confirmada".into(),
        };
        let summary = summarize_reservations(&[line]).unwrap();
        assert_eq!(
            summary,
            "Encontré tu reservación ✈️\n• *RSV-889* · Cancún del 10/03/2030 al 15/03/2030 · Confirmada"
        );
        assert_eq!(summarize_reservations(&[]), None);
    }
}
