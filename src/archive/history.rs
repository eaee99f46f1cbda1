//! Channel history fetching and message formatting
//!
//! Pages backwards through a channel's full history (newest first, 100 per
//! page) and renders each message as a single archive line.

use crate::archive::store::ArchiveStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serenity::all::{ChannelId, GetMessages, Http, Message, MessageId};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Messages per history request. Discord caps this at 100.
pub const PAGE_SIZE: u8 = 100;

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01).
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("History fetch failed: {0}")]
    Fetch(#[from] serenity::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive writer for channel is gone")]
    WriterClosed,
}

/// One message as captured for the archive. Ephemeral; exists only long
/// enough to be formatted.
#[derive(Debug, Clone)]
pub struct ArchivedMessage {
    /// Message ID, used as the pagination cursor
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub attachments: Vec<String>,
}

impl From<&Message> for ArchivedMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            timestamp: snowflake_timestamp(msg.id),
            author: msg.author.name.clone(),
            content: msg.content.clone(),
            attachments: msg.attachments.iter().map(|a| a.url.clone()).collect(),
        }
    }
}

/// Millisecond-precision creation time encoded in a Discord snowflake.
fn snowflake_timestamp(id: MessageId) -> DateTime<Utc> {
    let ms = (id.get() >> 22) + DISCORD_EPOCH_MS;
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

/// Render one message as a single archive line (no trailing newline).
///
/// Format: `<ISO-8601 timestamp> - <author>: <body>`, then one
/// ` [Attachment: <url>]` per attachment in attachment order.
pub fn format_message(msg: &ArchivedMessage) -> String {
    let mut line = format!(
        "{} - {}: {}",
        msg.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        msg.author,
        msg.content
    );
    for url in &msg.attachments {
        let _ = write!(line, " [Attachment: {}]", url);
    }
    line
}

/// Render a full archive. Non-empty archives end with exactly one trailing
/// newline; an empty message list renders as an empty string.
pub fn render_archive(messages: &[ArchivedMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut out = messages
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

/// A paged source of channel history, newest first.
///
/// Seam between the pagination logic and the Discord HTTP client so the
/// fetch loop is testable against an in-memory message set.
#[async_trait]
pub trait HistorySource {
    /// Fetch up to `limit` messages strictly older than `before` (or the
    /// newest messages when `before` is `None`), newest first.
    async fn messages_before(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<ArchivedMessage>, ArchiveError>;
}

/// History source backed by the Discord HTTP API.
pub struct SerenityHistory {
    http: Arc<Http>,
}

impl SerenityHistory {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HistorySource for SerenityHistory {
    async fn messages_before(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<ArchivedMessage>, ArchiveError> {
        let mut request = GetMessages::new().limit(limit);
        if let Some(id) = before {
            request = request.before(id);
        }
        let messages = channel.messages(&self.http, request).await?;
        Ok(messages.iter().map(ArchivedMessage::from).collect())
    }
}

/// Fetch a channel's complete history in chronological (oldest-first) order.
///
/// Requests pages of up to [`PAGE_SIZE`] messages, each page strictly older
/// than the previous one, until a short page signals exhaustion. Pages
/// accumulate in delivery order and the whole list is reversed once at the
/// end. No deduplication is performed; messages arriving mid-fetch may
/// produce duplicates or gaps, which is accepted.
pub async fn fetch_channel_history(
    source: &impl HistorySource,
    channel: ChannelId,
) -> Result<Vec<ArchivedMessage>, ArchiveError> {
    let mut messages: Vec<ArchivedMessage> = Vec::new();
    let mut before: Option<MessageId> = None;

    loop {
        let page = source.messages_before(channel, before, PAGE_SIZE).await?;
        let page_len = page.len();
        before = page.last().map(|m| m.id);
        messages.extend(page);

        if page_len < PAGE_SIZE as usize {
            break;
        }
    }

    debug!("Fetched {} messages from channel {}", messages.len(), channel);
    messages.reverse();
    Ok(messages)
}

/// Archive a channel: fetch its full history, render it, and overwrite the
/// channel's archive file. Returns the number of messages archived.
///
/// Idempotent for an unchanged channel: re-running produces byte-identical
/// output.
pub async fn archive_channel(
    source: &impl HistorySource,
    store: &ArchiveStore,
    channel: ChannelId,
    channel_name: &str,
) -> Result<usize, ArchiveError> {
    let messages = fetch_channel_history(source, channel).await?;
    let content = render_archive(&messages);
    store.overwrite(channel_name, content).await?;
    Ok(messages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(n: u64) -> ArchivedMessage {
        // Higher id = newer, one second apart.
        ArchivedMessage {
            id: MessageId::new(n),
            timestamp: DateTime::from_timestamp(1_700_000_000 + n as i64, 0).unwrap(),
            author: format!("user{}", n),
            content: format!("message {}", n),
            attachments: Vec::new(),
        }
    }

    /// In-memory source holding messages newest-first, as Discord delivers.
    struct FakeSource {
        newest_first: Vec<ArchivedMessage>,
        requests: AtomicUsize,
    }

    impl FakeSource {
        fn with_messages(count: u64) -> Self {
            let mut newest_first: Vec<ArchivedMessage> = (1..=count).map(message).collect();
            newest_first.reverse();
            Self {
                newest_first,
                requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HistorySource for FakeSource {
        async fn messages_before(
            &self,
            _channel: ChannelId,
            before: Option<MessageId>,
            limit: u8,
        ) -> Result<Vec<ArchivedMessage>, ArchiveError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let page: Vec<ArchivedMessage> = self
                .newest_first
                .iter()
                .filter(|m| before.map(|b| m.id < b).unwrap_or(true))
                .take(limit as usize)
                .cloned()
                .collect();
            Ok(page)
        }
    }

    #[tokio::test]
    async fn empty_channel_is_one_request() {
        let source = FakeSource::with_messages(0);
        let messages = fetch_channel_history(&source, ChannelId::new(1)).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(source.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_page_terminates_immediately() {
        let source = FakeSource::with_messages(50);
        let messages = fetch_channel_history(&source, ChannelId::new(1)).await.unwrap();
        assert_eq!(messages.len(), 50);
        assert_eq!(source.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multi_page_request_count() {
        let source = FakeSource::with_messages(250);
        let messages = fetch_channel_history(&source, ChannelId::new(1)).await.unwrap();
        assert_eq!(messages.len(), 250);
        assert_eq!(source.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exact_multiple_costs_one_extra_request() {
        let source = FakeSource::with_messages(200);
        let messages = fetch_channel_history(&source, ChannelId::new(1)).await.unwrap();
        assert_eq!(messages.len(), 200);
        // Full last page cannot prove exhaustion; one empty request follows.
        assert_eq!(source.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn output_is_chronological_without_duplicates() {
        let source = FakeSource::with_messages(230);
        let messages = fetch_channel_history(&source, ChannelId::new(1)).await.unwrap();
        assert_eq!(messages.len(), 230);
        for pair in messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn formatting_round_trip() {
        let msg = ArchivedMessage {
            id: MessageId::new(1),
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            author: "alice".to_string(),
            content: "hi".to_string(),
            attachments: vec!["http://x/y.png".to_string()],
        };
        assert_eq!(
            format_message(&msg),
            "2024-01-01T00:00:00.000Z - alice: hi [Attachment: http://x/y.png]"
        );
    }

    #[test]
    fn attachments_render_in_order() {
        let mut msg = message(1);
        msg.attachments = vec!["http://x/a.png".to_string(), "http://x/b.png".to_string()];
        let line = format_message(&msg);
        assert!(line.ends_with("[Attachment: http://x/a.png] [Attachment: http://x/b.png]"));
    }

    #[test]
    fn rendered_archive_has_single_trailing_newline() {
        let messages = vec![message(1), message(2)];
        let content = render_archive(&messages);
        assert!(content.ends_with('\n'));
        assert!(!content.ends_with("\n\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn empty_archive_renders_empty() {
        assert_eq!(render_archive(&[]), "");
    }

    #[test]
    fn snowflake_timestamp_matches_discord_epoch() {
        // Ids below 1 << 22 carry no offset from the Discord epoch.
        let ts = snowflake_timestamp(MessageId::new(1));
        assert_eq!(ts.timestamp_millis(), DISCORD_EPOCH_MS as i64);
    }
}
