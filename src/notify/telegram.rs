//! Telegram transport.

use async_trait::async_trait;
use serde::Serialize;

use super::Notifier;
use crate::error::NotifyError;

/// Telegram Bot API base URL.
const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Sends alerts to a Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    /// Create a notifier for `chat_id`.
    pub fn new(http: reqwest::Client, bot_token: String, chat_id: String) -> Self {
        Self {
            http,
            bot_token,
            chat_id,
        }
    }

    fn render(subject: &str, body: &str) -> String {
        format!("{}\n\n{}", subject, body)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.bot_token);
        let msg = TelegramMessage {
            chat_id: &self.chat_id,
            text: Self::render(subject, body),
            disable_web_page_preview: true,
        };

        let response = self.http.post(&url).json(&msg).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_puts_subject_first() {
        let text = TelegramNotifier::render("box-1 resets 0 #1 Buy Up1-x", "price: 52¢");
        assert_eq!(text, "box-1 resets 0 #1 Buy Up1-x\n\nprice: 52¢");
    }
}
