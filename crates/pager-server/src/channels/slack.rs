//! Slack incoming-webhook channel.

use super::{check_response, transport_error};
use crate::config::SlackSettings;
use async_trait::async_trait;
use pager::{Alert, Channel, DeliveryError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    username: &'a str,
    text: String,
    icon_emoji: &'a str,
}

/// Posts the rendered alert message to a Slack channel
pub struct SlackChannel {
    id: String,
    endpoint: String,
    channel: String,
    user: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(id: &str, settings: &SlackSettings) -> Self {
        let endpoint = match settings.webhook_url {
            Some(ref url) => url.clone(),
            None => format!(
                "https://{}.slack.com/services/hooks/incoming-webhook?token={}",
                settings.subdomain, settings.token
            ),
        };

        Self {
            id: id.to_string(),
            endpoint,
            channel: settings.channel.clone(),
            user: settings.user.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn payload<'a>(&'a self, alert: &Alert) -> SlackPayload<'a> {
        SlackPayload {
            channel: &self.channel,
            username: &self.user,
            text: alert.render_message(),
            icon_emoji: ":ghost:",
        }
    }
}

// The endpoint embeds the token, keep it out of logs
impl fmt::Debug for SlackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackChannel")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        info!(channel = %self.id, id = %alert.id, "Posting alert to Slack");
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(SEND_TIMEOUT)
            .json(&self.payload(alert))
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await
    }
}
