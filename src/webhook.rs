//! Outbound webhook notifications.
//!
//! Every delivery is fire-and-forget: posted from a detached task with a
//! bounded timeout, logged on failure, never propagated into queue state.

use crate::error::ErrorKind;
use crate::parsers::FigureRecord;
use crate::session::SessionPausedEvent;
use crate::utils::sanitize_log;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    pub fn item_completed(&self, record: &FigureRecord) {
        self.deliver(json!({
            "event": "item.completed",
            "item_id": record.item_id,
            "record": record,
        }));
    }

    pub fn item_failed(&self, item_id: &str, kind: ErrorKind, message: &str) {
        self.deliver(json!({
            "event": "item.failed",
            "item_id": item_id,
            "error_kind": kind,
            "message": sanitize_log(message),
        }));
    }

    pub fn item_skipped(&self, item_id: &str, reason: &str) {
        self.deliver(json!({
            "event": "item.skipped",
            "item_id": item_id,
            "reason": sanitize_log(reason),
        }));
    }

    pub fn session_paused(&self, event: &SessionPausedEvent) {
        self.deliver(json!({
            "event": "session.paused",
            "session": event,
        }));
    }

    fn deliver(&self, payload: serde_json::Value) {
        let url = match &self.url {
            Some(url) => url.clone(),
            None => return,
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("webhook delivered: {}", payload["event"]);
                }
                Ok(response) => {
                    warn!(
                        "webhook delivery returned {}: {}",
                        response.status(),
                        payload["event"]
                    );
                }
                Err(e) => {
                    warn!("webhook delivery failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = Notifier::new(None);
        notifier.item_skipped("123", "paused session");
        notifier.item_failed("123", ErrorKind::Timeout, "navigation timeout");
        // Nothing to assert beyond "does not panic or block".
    }
}
