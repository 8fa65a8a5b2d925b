//! Generic JSON webhook channel.

use super::{check_response, transport_error};
use crate::config::WebhookSettings;
use async_trait::async_trait;
use pager::{Alert, Channel, DeliveryError};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: &'a str,
    subject: &'a str,
    body: &'a str,
    severity: Option<&'static str>,
    message: String,
}

impl<'a> From<&'a Alert> for WebhookPayload<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            id: &alert.id,
            subject: &alert.subject,
            body: &alert.body,
            severity: alert.severity.map(|s| s.as_str()),
            message: alert.render_message(),
        }
    }
}

/// POSTs alerts as JSON; any non-2xx answer is a failed delivery
#[derive(Debug)]
pub struct WebhookChannel {
    id: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(id: &str, settings: &WebhookSettings) -> Self {
        Self {
            id: id.to_string(),
            url: settings.url.clone(),
            timeout: settings.timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        info!(channel = %self.id, id = %alert.id, url = %self.url, "Posting alert to webhook");
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&WebhookPayload::from(alert))
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await
    }
}
