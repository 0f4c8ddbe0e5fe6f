use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{info, warn};

use crate::ports::ConversationStore;
use crate::types::DedupeCriteria;

/// Last line of defence against sending the same thing twice in a row
/// (webhook redelivery, overlapping code paths).
#[derive(Clone)]
pub struct DedupeGuard {
    store: Arc<dyn ConversationStore>,
    default_window: Duration,
}

impl DedupeGuard {
    pub fn new(store: Arc<dyn ConversationStore>, default_window: Duration) -> Self {
        Self {
            store,
            default_window,
        }
    }

    /// True when an identical message already went to `recipient` within the
    /// window. Fails open: a store error never blocks a send.
    pub async fn should_suppress(
        &self,
        recipient: &str,
        text: Option<&str>,
        media_url: Option<&str>,
        window: Option<Duration>,
    ) -> bool {
        let criteria = DedupeCriteria::new(text, media_url);
        if criteria.is_empty() {
            return false;
        }

        let window = window.unwrap_or(self.default_window);
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        let since = Utc::now() - window;

        match self.store.recent_outbound(recipient, since, &criteria).await {
            Ok(records) => match records.iter().find(|record| criteria.matches(record)) {
                Some(previous) => {
                    info!(
                        recipient = %recipient,
                        previous_id = %previous.id,
                        media = criteria.media_url.as_deref().unwrap_or(""),
                        "duplicate outbound message suppressed"
                    );
                    true
                }
                None => false,
            },
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "dedupe check failed, sending anyway");
                false
            }
        }
    }
}
