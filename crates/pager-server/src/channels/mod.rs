//! Notification channel adapters.

mod slack;
mod webhook;

pub use slack::SlackChannel;
pub use webhook::WebhookChannel;

use crate::config::{ChannelConfig, ConfigError};
use pager::{Channel, DeliveryError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build every configured channel, each under its map key.
pub fn build_channels(
    configs: &BTreeMap<String, ChannelConfig>,
) -> Result<Vec<Arc<dyn Channel>>, ConfigError> {
    configs
        .iter()
        .map(|(id, config)| -> Result<Arc<dyn Channel>, ConfigError> {
            match config {
                ChannelConfig::Slack(settings) => Ok(Arc::new(SlackChannel::new(id, settings))),
                ChannelConfig::Webhook(settings) => {
                    Ok(Arc::new(WebhookChannel::new(id, settings)))
                }
                ChannelConfig::Unknown => Err(ConfigError::UnknownChannel { id: id.clone() }),
            }
        })
        .collect()
}

/// Turn an HTTP response into a delivery result.
async fn check_response(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn transport_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Transport(format!("timed out: {e}"))
    } else {
        DeliveryError::Transport(e.to_string())
    }
}
