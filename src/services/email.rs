//! Flyers delivered as e-mail attachments, from saved messages or a mailbox.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, info, warn};

use super::manager::{FlyerManager, IngestReport};
use crate::llm::Attachment;
use crate::mail::{subject_matches, MailError, MailSource, MailboxQuery};

/// Totals for one mailbox pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxReport {
    pub messages: usize,
    /// Messages whose subject matched no filter.
    pub messages_skipped: usize,
    pub messages_failed: usize,
    pub documents: IngestReport,
}

/// Image and PDF attachments of a raw RFC 5322 message.
///
/// Returns `Ok(None)` when `subject_filter` is set and no filter is a
/// case-insensitive substring of the subject.
pub fn flyer_attachments(
    raw: &[u8],
    subject_filter: &[String],
) -> Result<Option<Vec<Attachment>>, MailError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(MailError::Unparseable)?;

    let subject = message.subject().unwrap_or_default();
    if !subject_matches(subject, subject_filter) {
        debug!(subject = %subject, "Message subject does not match filter");
        return Ok(None);
    }

    let attachments = message
        .parts
        .iter()
        .filter(|part| is_attachment(part))
        .enumerate()
        .map(|(i, part)| {
            let name = part
                .attachment_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("attachment-{}", i + 1));
            Attachment::sniffed(name, part.contents().to_vec())
        })
        .filter(Attachment::is_supported)
        .collect();

    Ok(Some(attachments))
}

/// A leaf part with an attachment disposition or a `name` parameter.
fn is_attachment(part: &MessagePart) -> bool {
    if matches!(part.body, PartType::Multipart(_) | PartType::Message(_)) {
        return false;
    }
    part.content_disposition()
        .is_some_and(|disposition| disposition.is_attachment())
        || part
            .content_type()
            .and_then(|content_type| content_type.attribute("name"))
            .is_some()
}

/// Ingest every flyer attachment in `raw` for `shop`.
pub async fn ingest_email(
    manager: &FlyerManager,
    shop: &str,
    raw: &[u8],
    subject_filter: &[String],
) -> anyhow::Result<IngestReport> {
    let Some(attachments) = flyer_attachments(raw, subject_filter)? else {
        info!(shop, "Message skipped");
        return Ok(IngestReport::default());
    };
    Ok(ingest_attachments(manager, shop, attachments).await)
}

/// Ingest attachments one by one; a rejected document does not stop the rest.
async fn ingest_attachments(
    manager: &FlyerManager,
    shop: &str,
    attachments: Vec<Attachment>,
) -> IngestReport {
    let mut total = IngestReport::default();
    for attachment in attachments {
        match manager
            .ingest_document(shop, &attachment.filename, attachment.data)
            .await
        {
            Ok(report) => total.absorb(&report),
            Err(e) => {
                warn!(shop, file = %attachment.filename, error = %e, "Failed to ingest attachment");
                total.documents_failed += 1;
            }
        }
    }
    total
}

/// Pull recent flyer e-mails from `source` and ingest their attachments.
pub async fn ingest_mailbox(
    manager: &FlyerManager,
    source: &dyn MailSource,
    shop: &str,
    query: &MailboxQuery,
) -> anyhow::Result<MailboxReport> {
    let messages = source.fetch_messages(query).await?;
    let mut report = MailboxReport {
        messages: messages.len(),
        ..Default::default()
    };

    for message in messages {
        match flyer_attachments(&message.data, &query.subjects) {
            Ok(Some(attachments)) => {
                let ingested = ingest_attachments(manager, shop, attachments).await;
                report.documents.absorb(&ingested);
            }
            Ok(None) => report.messages_skipped += 1,
            Err(e) => {
                warn!(uid = ?message.uid, error = %e, "Skipping unreadable message");
                report.messages_failed += 1;
            }
        }
    }

    info!(
        shop,
        messages = report.messages,
        skipped = report.messages_skipped,
        items = report.documents.items_saved,
        "Mailbox ingestion finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ExtractionError, FlyerExtractor, ParsedFlyer, ParsedItem};
    use crate::mail::RawMessage;
    use crate::repository::diesel_flyer::tests::setup_test_db;
    use crate::repository::{DieselFlyerRepository, SqlitePool};
    use crate::scrapers::{Crawler, PageFetcher, ScrapeError};
    use crate::services::{ManagerOptions, Reconciler};
    use async_trait::async_trait;
    use base64::Engine;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const PNG: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    fn message(subject: &str, parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = format!(
            "From: letaky@example.cz\r\n\
             To: flyers@example.cz\r\n\
             Subject: {subject}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Novy letak v priloze.\r\n"
        );
        for (filename, content_type, data) in parts {
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            body.push_str(&format!(
                "--XYZ\r\n\
                 Content-Type: {content_type}\r\n\
                 Content-Disposition: attachment; filename=\"{filename}\"\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 \r\n\
                 {encoded}\r\n"
            ));
        }
        body.push_str("--XYZ--\r\n");
        body.into_bytes()
    }

    fn flyer_message(subject: &str) -> Vec<u8> {
        message(
            subject,
            &[
                ("strana1.png", "image/png", &PNG[..]),
                ("ceny.csv", "text/csv", &b"a,b"[..]),
            ],
        )
    }

    struct NoNetwork;

    #[async_trait]
    impl PageFetcher for NoNetwork {
        async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
            Err(ScrapeError::Status {
                url: url.to_string(),
                status: 503,
            })
        }

        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
            self.fetch_text(url).await.map(String::into_bytes)
        }
    }

    struct OneItem;

    #[async_trait]
    impl FlyerExtractor for OneItem {
        async fn extract(&self, _pages: &[Attachment]) -> Result<ParsedFlyer, ExtractionError> {
            Ok(ParsedFlyer {
                items: vec![ParsedItem {
                    name: "Jogurt".to_string(),
                    price: 12.9,
                    ..Default::default()
                }],
                ..Default::default()
            })
        }
    }

    fn manager(dir: &Path, pool: SqlitePool) -> FlyerManager {
        let repo = DieselFlyerRepository::new(pool);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(NoNetwork);
        FlyerManager::new(
            repo.clone(),
            Crawler::new(fetcher.clone()),
            fetcher,
            Arc::new(OneItem),
            Reconciler::new(repo, dir.join("items")),
            ManagerOptions {
                uploads_dir: dir.join("uploads"),
                page_delay: Duration::ZERO,
                retailers: Vec::new(),
            },
        )
    }

    struct CannedMailbox(Vec<RawMessage>);

    #[async_trait]
    impl MailSource for CannedMailbox {
        async fn fetch_messages(
            &self,
            _query: &MailboxQuery,
        ) -> Result<Vec<RawMessage>, MailError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_collects_image_attachments() {
        let attachments = flyer_attachments(&flyer_message("Tesco letak 12/2025"), &[])
            .unwrap()
            .unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "strana1.png");
        assert_eq!(attachments[0].content_type, "image/png");
    }

    #[test]
    fn test_named_part_without_disposition_is_attachment() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(PNG);
        let raw = format!(
            "Subject: letak\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\
             \r\n\
             --B\r\n\
             Content-Type: image/png; name=\"strana2.png\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {encoded}\r\n\
             --B--\r\n"
        );
        let attachments = flyer_attachments(raw.as_bytes(), &[]).unwrap().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "strana2.png");
    }

    #[test]
    fn test_subject_filter() {
        let raw = flyer_message("Tesco letak 12/2025");
        assert!(flyer_attachments(&raw, &["LETAK".to_string()])
            .unwrap()
            .is_some());
        assert!(flyer_attachments(&raw, &["newsletter".to_string()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unparseable_message_is_an_error() {
        assert!(matches!(
            flyer_attachments(b"", &[]),
            Err(MailError::Unparseable)
        ));
    }

    #[tokio::test]
    async fn test_bad_attachment_does_not_stop_the_rest() {
        let (pool, dir) = setup_test_db().await;
        let manager = manager(dir.path(), pool);
        let raw = message(
            "Letak",
            &[
                ("broken.pdf", "application/pdf", &b"%PDF-1.4\ngarbage"[..]),
                ("strana1.png", "image/png", &PNG[..]),
            ],
        );

        let report = ingest_email(&manager, "tesco", &raw, &[]).await.unwrap();
        assert_eq!(report.documents_failed, 1);
        assert_eq!(report.pages, 1);
        assert_eq!(report.flyers_created, 1);
        assert_eq!(report.items_saved, 1);
        assert_eq!(manager.repository().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_email_reports_unparseable() {
        let (pool, dir) = setup_test_db().await;
        let manager = manager(dir.path(), pool);
        assert!(ingest_email(&manager, "tesco", b"", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_mailbox() {
        let (pool, dir) = setup_test_db().await;
        let manager = manager(dir.path(), pool);
        let mailbox = CannedMailbox(vec![
            RawMessage {
                uid: Some(3),
                data: flyer_message("Kaufland letak tydne"),
            },
            RawMessage {
                uid: Some(4),
                data: flyer_message("Newsletter"),
            },
            RawMessage {
                uid: Some(5),
                data: Vec::new(),
            },
        ]);
        let query = MailboxQuery {
            subjects: vec!["letak".to_string()],
            ..Default::default()
        };

        let report = ingest_mailbox(&manager, &mailbox, "kaufland", &query)
            .await
            .unwrap();
        assert_eq!(report.messages, 3);
        assert_eq!(report.messages_skipped, 1);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.documents.flyers_created, 1);
        assert_eq!(report.documents.items_saved, 1);
    }
}
