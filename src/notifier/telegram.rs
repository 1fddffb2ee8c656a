//! Telegram notifier via the Bot API sendMessage call.

use crate::config::TelegramSettings;
use crate::error::{Error, Result};
use serde_json::json;

pub async fn notify(settings: &TelegramSettings, title: &str, message: &str) -> Result<()> {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", settings.token);

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&json!({
            "chat_id": settings.chat_id,
            "text": format!("{title}\n\n{message}"),
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::Transport(format!(
            "telegram answered {}",
            response.status()
        )));
    }
    Ok(())
}
