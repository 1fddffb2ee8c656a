//! Run-outcome notification boundary.
//!
//! The pipeline reports success or failure here once cleanup is done;
//! delivery failures are logged and never affect the run result.

mod telegram;
mod webhook;

use crate::config::{ModelConfig, NotifierConfig};
use crate::error::Result;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

pub async fn success(name: &str, model: &ModelConfig) {
    let title = format!("[stashd] OK: backup {name} succeeded");
    let message = format!(
        "Backup of {name} completed successfully at {}",
        chrono::Local::now().to_rfc2822()
    );
    notify(name, model, &title, &message, Outcome::Success).await;
}

pub async fn failure(name: &str, model: &ModelConfig, reason: &str) {
    let title = format!("[stashd] Err: backup {name} failed");
    let message = format!(
        "Backup of {name} failed at {}:\n\n{reason}",
        chrono::Local::now().to_rfc2822()
    );
    notify(name, model, &title, &message, Outcome::Failure).await;
}

async fn notify(name: &str, model: &ModelConfig, title: &str, message: &str, outcome: Outcome) {
    for (notifier_name, notifier) in &model.notifiers {
        let wanted = match outcome {
            Outcome::Success => notifier.on_success(),
            Outcome::Failure => notifier.on_failure(),
        };
        if !wanted {
            continue;
        }

        if let Err(e) = deliver(notifier, title, message).await {
            error!(model = %name, notifier = %notifier_name, error = %e, "Notification failed");
        } else {
            info!(model = %name, notifier = %notifier_name, "Notified");
        }
    }
}

async fn deliver(notifier: &NotifierConfig, title: &str, message: &str) -> Result<()> {
    match notifier {
        NotifierConfig::Webhook(settings) => webhook::notify(settings, title, message).await,
        NotifierConfig::Telegram(settings) => telegram::notify(settings, title, message).await,
    }
}
