//! Operator notification channel.
//!
//! Delivery is fire-and-forget: failures are logged and never reach the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::http_client::{HttpClient, HttpRequest};

/// Telegram's per-message character limit.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// How far back from a chunk boundary a newline is still preferred as split point.
const NEWLINE_LOOKBACK: usize = 200;

/// Message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub code: Option<String>,
    pub description: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            code: None,
            description: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Plain-text body: title, then the optional code and description lines.
    pub fn render(&self) -> String {
        let mut lines = vec![self.title.clone()];
        if let Some(code) = &self.code {
            lines.push(format!("Error code: {code}"));
        }
        if let Some(description) = &self.description {
            lines.push(format!("Description: {description}"));
        }
        lines.join("\n")
    }
}

/// Channel that carries failures to a human.
pub trait OperatorNotifier: Send + Sync {
    fn notify<'a>(&'a self, notification: Notification) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Notifier used when no channel is configured.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl OperatorNotifier for NoopNotifier {
    fn notify<'a>(&'a self, notification: Notification) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(title = %notification.title, "operator channel not configured, dropping notification");
        })
    }
}

/// Sends notifications through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    transport: Arc<dyn HttpClient>,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(transport: Arc<dyn HttpClient>, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            transport,
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: String::from("https://api.telegram.org"),
        }
    }

    /// Point at a different Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

impl OperatorNotifier for TelegramNotifier {
    fn notify<'a>(&'a self, notification: Notification) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let text = notification.render();
            for chunk in chunk_message(&text, TELEGRAM_MESSAGE_LIMIT) {
                if let Err(reason) = self.deliver(chunk).await {
                    tracing::error!(reason = %reason, "telegram notification failed");
                }
            }
        })
    }
}

impl TelegramNotifier {
    /// Send one chunk. The failure reason never contains the bot token.
    async fn deliver(&self, chunk: String) -> Result<(), String> {
        let request = HttpRequest::post(self.send_message_url())
            .with_json(&json!({ "chat_id": self.chat_id, "text": chunk }));

        match self.transport.execute(request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(self.redact(&format!(
                "HTTP {} {}: {}",
                response.status, response.status_text, response.body
            ))),
            Err(error) => Err(self.redact(&error.to_string())),
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.bot_token.is_empty() {
            return text.to_string();
        }
        text.replace(&self.bot_token, "***")
    }
}

/// In-memory notifier that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .expect("recording notifier mutex poisoned")
            .clone()
    }
}

impl OperatorNotifier for RecordingNotifier {
    fn notify<'a>(&'a self, notification: Notification) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.sent
            .lock()
            .expect("recording notifier mutex poisoned")
            .push(notification);
        Box::pin(async {})
    }
}

/// Split `text` into chunks of at most `limit` characters.
///
/// A chunk ends just after the last newline of its window when that newline lies within
/// the final 200 characters; otherwise it is cut at exactly `limit`.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            let window_floor = end.saturating_sub(NEWLINE_LOOKBACK).max(start + 1);
            if let Some(newline) = (window_floor..end).rev().find(|&index| chars[index] == '\n') {
                end = newline + 1;
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse, ScriptedHttpClient, ScriptedReply};

    #[test]
    fn render_skips_missing_lines() {
        assert_eq!(Notification::new("Tariff API error").render(), "Tariff API error");
        assert_eq!(
            Notification::new("Tariff API error")
                .with_code("429")
                .with_description("Too Many Requests")
                .render(),
            "Tariff API error\nError code: 429\nDescription: Too Many Requests"
        );
    }

    #[test]
    fn short_messages_are_not_split() {
        assert_eq!(chunk_message("hello", 4096), vec!["hello".to_string()]);
        assert_eq!(chunk_message("", 4096), vec![String::new()]);
    }

    #[test]
    fn long_messages_respect_the_limit() {
        let text = "ж".repeat(10_000);
        let chunks = chunk_message(&text, TELEGRAM_MESSAGE_LIMIT);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= TELEGRAM_MESSAGE_LIMIT));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_prefers_a_nearby_newline() {
        let text = format!("{}\n{}", "a".repeat(4_000), "b".repeat(500));
        let chunks = chunk_message(&text, TELEGRAM_MESSAGE_LIMIT);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n", "a".repeat(4_000)));
        assert_eq!(chunks[1], "b".repeat(500));
    }

    #[test]
    fn distant_newlines_are_ignored() {
        let text = format!("{}\n{}", "a".repeat(100), "b".repeat(5_000));
        let chunks = chunk_message(&text, TELEGRAM_MESSAGE_LIMIT);

        assert_eq!(chunks[0].chars().count(), TELEGRAM_MESSAGE_LIMIT);
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn telegram_posts_each_chunk_and_swallows_failures() {
        let transport = ScriptedHttpClient::new();
        transport
            .push_response(HttpResponse::new(400, r#"{"ok":false}"#))
            .push(ScriptedReply::Response(HttpResponse::ok_json(r#"{"ok":true}"#)));
        let notifier = TelegramNotifier::new(Arc::new(transport.clone()), "123:abc", "-100500")
            .with_api_base("https://telegram.test/");

        notifier
            .notify(Notification::new("x".repeat(5_000)))
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://telegram.test/bot123:abc/sendMessage");
        let body: serde_json::Value =
            serde_json::from_str(requests[0].body.as_deref().expect("body")).expect("json");
        assert_eq!(body["chat_id"], "-100500");
        assert_eq!(body["text"].as_str().map(|text| text.chars().count()), Some(4_096));
    }

    #[tokio::test]
    async fn delivery_failures_never_expose_the_bot_token() {
        let transport = ScriptedHttpClient::new();
        transport
            .push(ScriptedReply::Error(HttpError::connect(
                "connection failed: http://127.0.0.1:1/bot123456:SECRET-TOKEN/sendMessage",
            )))
            .push_response(HttpResponse::new(
                404,
                r#"{"ok":false,"description":"bot123456:SECRET-TOKEN not found"}"#,
            ));
        let notifier = TelegramNotifier::new(Arc::new(transport), "123456:SECRET-TOKEN", "-100500");

        let transport_failure = notifier.deliver("hello".to_string()).await.expect_err("connect");
        let rejection = notifier.deliver("hello".to_string()).await.expect_err("404");

        assert!(!transport_failure.contains("SECRET-TOKEN"), "{transport_failure}");
        assert!(transport_failure.contains("connection failed"));
        assert!(!rejection.contains("SECRET-TOKEN"), "{rejection}");
        assert!(rejection.starts_with("HTTP 404"));
    }

    #[tokio::test]
    async fn recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notification::new("first")).await;
        notifier.notify(Notification::new("second")).await;

        let titles: Vec<String> = notifier
            .notifications()
            .into_iter()
            .map(|notification| notification.title)
            .collect();
        assert_eq!(titles, ["first", "second"]);
    }
}
