//! Mailbox access for flyers delivered by e-mail.

pub mod imap;

use async_trait::async_trait;
use thiserror::Error;

pub use imap::{ImapConfig, ImapMailbox};

/// Messages fetched by sequence number when no message matches the search.
pub const FALLBACK_MESSAGES: u32 = 10;

/// Default number of most recent matching messages to fetch.
pub const DEFAULT_MAX_MESSAGES: usize = 5;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("message could not be parsed")]
    Unparseable,

    #[error("mailbox not configured: {0} is not set")]
    NotConfigured(&'static str),

    #[error("invalid server address: {0}")]
    InvalidServer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{command} failed: {response}")]
    Command { command: String, response: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("mailbox timed out")]
    Timeout,
}

/// What to pull from a mailbox.
#[derive(Debug, Clone)]
pub struct MailboxQuery {
    pub folder: String,
    /// Subject substrings; empty accepts every message.
    pub subjects: Vec<String>,
    /// Most recent matches to fetch.
    pub max_messages: usize,
}

impl Default for MailboxQuery {
    fn default() -> Self {
        Self {
            folder: "INBOX".to_string(),
            subjects: Vec::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

/// A complete RFC 5322 message as stored on the server.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: Option<u32>,
    pub data: Vec<u8>,
}

/// Source of raw flyer e-mails.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Recent messages matching `query`, oldest first.
    async fn fetch_messages(&self, query: &MailboxQuery) -> Result<Vec<RawMessage>, MailError>;
}

/// The `limit` highest UIDs of `found`, ascending.
pub fn recent_uids(mut found: Vec<u32>, limit: usize) -> Vec<u32> {
    found.sort_unstable();
    found.dedup();
    let skip = found.len().saturating_sub(limit);
    found.split_off(skip)
}

/// Sequence range covering the last `count` of `exists` messages.
pub fn sequence_tail(exists: u32, count: u32) -> Option<String> {
    if exists == 0 || count == 0 {
        return None;
    }
    let first = exists.saturating_sub(count - 1).max(1);
    Some(format!("{}:{}", first, exists))
}

/// Whether `subject` contains any of `filters`, ignoring case.
pub fn subject_matches(subject: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let subject = subject.to_lowercase();
    filters.iter().any(|f| subject.contains(&f.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_uids_keeps_highest() {
        assert_eq!(recent_uids(vec![9, 3, 12, 3, 40, 7, 21], 5), vec![7, 9, 12, 21, 40]);
        assert_eq!(recent_uids(vec![2, 1], 5), vec![1, 2]);
        assert!(recent_uids(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_sequence_tail() {
        assert_eq!(sequence_tail(42, 10).as_deref(), Some("33:42"));
        assert_eq!(sequence_tail(3, 10).as_deref(), Some("1:3"));
        assert_eq!(sequence_tail(0, 10), None);
    }

    #[test]
    fn test_subject_matches() {
        let filters = vec!["Leták".to_string(), "akce".to_string()];
        assert!(subject_matches("Nový LETÁK Kaufland", &filters));
        assert!(subject_matches("Víkendová AKCE", &filters));
        assert!(!subject_matches("Newsletter", &filters));
        assert!(subject_matches("anything", &[]));
    }
}
