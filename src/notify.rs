use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::alarms::Alarm;
use crate::config;

/// key: alarm-notifier
/// Fire-and-forget delivery of notable alarms to an external gateway (mail relay or
/// chat webhook). Delivery failures are logged and never reach the caller.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    endpoint: Option<Url>,
}

impl Notifier {
    pub fn from_config() -> Self {
        Self::new(config::ALERT_WEBHOOK_URL.clone())
    }

    pub fn new(endpoint: Option<Url>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn send_alarm(&self, alarm: &Alarm) {
        let Some(endpoint) = &self.endpoint else {
            debug!(alarm_id = alarm.id, "alarm notification channel not configured");
            return;
        };

        let subject = format!(
            "Security Alarm [{}]: {}",
            alarm.severity.as_str(),
            alarm.event_type
        );
        let payload = json!({
            "subject": subject,
            "severity": alarm.severity.as_str(),
            "event_type": alarm.event_type,
            "message": alarm.message,
            "raised_at": alarm.raised_at,
            "recipient": config::ALERT_RECIPIENT.as_deref(),
        });

        let result = self
            .client
            .post(endpoint.clone())
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => debug!(alarm_id = alarm.id, "alarm notification delivered"),
            Err(err) => warn!(
                ?err,
                alarm_id = alarm.id,
                event_type = %alarm.event_type,
                "failed to deliver alarm notification"
            ),
        }
    }
}
