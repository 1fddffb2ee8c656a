//! Webhook notifier: one JSON POST per outcome.

use crate::config::WebhookSettings;
use crate::error::{Error, Result};
use serde_json::json;

pub async fn notify(settings: &WebhookSettings, title: &str, message: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(&settings.url)
        .json(&json!({
            "title": title,
            "message": message,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::Transport(format!(
            "webhook {} answered {}",
            settings.url,
            response.status()
        )));
    }
    Ok(())
}
