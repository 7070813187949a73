//! Minimal IMAP4rev1 client over implicit TLS.
//!
//! Only what flyer retrieval needs: LOGIN, SELECT, UID SEARCH, FETCH of whole
//! messages and LOGOUT. Server literals are read into memory.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::{
    recent_uids, sequence_tail, MailError, MailSource, MailboxQuery, RawMessage,
    DEFAULT_MAX_MESSAGES, FALLBACK_MESSAGES,
};

const IMAPS_PORT: u16 = 993;

static UID_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUID (\d+)").expect("valid UID regex"));

/// IMAP account settings. Credentials usually come from `IMAP_*` variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// `host:port`; the port defaults to 993.
    pub server: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub folder: String,
    /// Subject substrings searched for; empty searches every message.
    pub subjects: Vec<String>,
    pub max_messages: usize,
    pub timeout_secs: u64,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            server: None,
            user: None,
            password: None,
            folder: "INBOX".to_string(),
            subjects: Vec::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
            timeout_secs: 120,
        }
    }
}

impl ImapConfig {
    /// Query for the configured folder and subjects.
    pub fn query(&self) -> MailboxQuery {
        MailboxQuery {
            folder: self.folder.clone(),
            subjects: self.subjects.clone(),
            max_messages: self.max_messages,
        }
    }
}

/// A mailbox reached over IMAPS.
pub struct ImapMailbox {
    host: String,
    port: u16,
    user: String,
    password: String,
    timeout: Duration,
}

impl ImapMailbox {
    pub fn new(config: &ImapConfig) -> Result<Self, MailError> {
        let server = config
            .server
            .as_deref()
            .ok_or(MailError::NotConfigured("IMAP_SERVER"))?;
        let (host, port) = split_server(server)?;

        Ok(Self {
            host,
            port,
            user: config
                .user
                .clone()
                .ok_or(MailError::NotConfigured("IMAP_USER"))?,
            password: config
                .password
                .clone()
                .ok_or(MailError::NotConfigured("IMAP_PASSWORD"))?,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    async fn connect(&self) -> Result<ImapSession<TlsStream<TcpStream>>, MailError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| MailError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = ServerName::try_from(self.host.clone())
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(name, tcp)
            .await?;

        let mut session = ImapSession::new(tls);
        session.greeting().await?;
        Ok(session)
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    async fn fetch_messages(&self, query: &MailboxQuery) -> Result<Vec<RawMessage>, MailError> {
        info!(host = %self.host, folder = %query.folder, subjects = ?query.subjects, "Connecting to IMAP server");
        let work = async {
            let mut session = self.connect().await?;
            fetch_matching(&mut session, &self.user, &self.password, query).await
        };
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| MailError::Timeout)?
    }
}

/// Log in, select the folder and fetch the most recent matching messages.
///
/// Falls back to the last [`FALLBACK_MESSAGES`] messages by sequence number
/// when the subject search finds nothing.
async fn fetch_matching<S>(
    session: &mut ImapSession<S>,
    user: &str,
    password: &str,
    query: &MailboxQuery,
) -> Result<Vec<RawMessage>, MailError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.login(user, password).await?;
    let exists = session.select(&query.folder).await?;

    let found = search_subjects(session, &query.subjects).await?;
    let messages = if found.is_empty() {
        match sequence_tail(exists, FALLBACK_MESSAGES) {
            Some(range) => {
                debug!(range = %range, "Search found nothing, fetching latest messages");
                session.fetch(&range, false).await?
            }
            None => Vec::new(),
        }
    } else {
        let uids = recent_uids(found, query.max_messages);
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        session.fetch(&set, true).await?
    };

    if let Err(e) = session.logout().await {
        debug!(error = %e, "LOGOUT failed");
    }

    info!(messages = messages.len(), exists, "Fetched mailbox messages");
    Ok(messages)
}

/// Union of per-subject UID searches. A failing subject is logged and skipped.
async fn search_subjects<S>(
    session: &mut ImapSession<S>,
    subjects: &[String],
) -> Result<Vec<u32>, MailError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if subjects.is_empty() {
        return session.uid_search("ALL", None).await;
    }

    let mut found = Vec::new();
    for subject in subjects {
        let result = if is_quotable(subject) {
            session
                .uid_search(&format!("SUBJECT {}", quote(subject)), None)
                .await
        } else {
            session
                .uid_search("CHARSET UTF-8 SUBJECT", Some(subject.as_bytes()))
                .await
        };
        match result {
            Ok(uids) => found.extend(uids),
            Err(MailError::Command { response, .. }) => {
                warn!(subject = %subject, response = %response, "Subject search failed");
            }
            Err(e) => return Err(e),
        }
    }
    found.sort_unstable();
    found.dedup();
    Ok(found)
}

/// One untagged or tagged server response, with the literals it carried.
#[derive(Debug, Default)]
struct Response {
    text: String,
    literals: Vec<Vec<u8>>,
}

struct ImapSession<S> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    async fn greeting(&mut self) -> Result<(), MailError> {
        let response = self.read_response().await?;
        if response.text.starts_with("* OK") || response.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                response.text
            )))
        }
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<(), MailError> {
        self.run(&format!("LOGIN {} {}", quote(user), quote(password)), None)
            .await
            .map(|_| ())
    }

    /// SELECT `folder`, returning its message count.
    async fn select(&mut self, folder: &str) -> Result<u32, MailError> {
        let responses = self.run(&format!("SELECT {}", quote(folder)), None).await?;
        Ok(responses
            .iter()
            .filter_map(|r| {
                let rest = r.text.strip_prefix("* ")?;
                let (count, kind) = rest.split_once(' ')?;
                kind.eq_ignore_ascii_case("EXISTS")
                    .then(|| count.parse().ok())
                    .flatten()
            })
            .last()
            .unwrap_or(0))
    }

    async fn uid_search(
        &mut self,
        criteria: &str,
        literal: Option<&[u8]>,
    ) -> Result<Vec<u32>, MailError> {
        let responses = self
            .run(&format!("UID SEARCH {}", criteria), literal)
            .await?;
        Ok(responses
            .iter()
            .filter_map(|r| r.text.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
            .collect())
    }

    /// Fetch whole messages by UID set or sequence range, sorted by UID.
    async fn fetch(&mut self, set: &str, by_uid: bool) -> Result<Vec<RawMessage>, MailError> {
        let command = format!(
            "{}FETCH {} (UID BODY.PEEK[])",
            if by_uid { "UID " } else { "" },
            set
        );
        let responses = self.run(&command, None).await?;

        let mut messages: Vec<RawMessage> = responses
            .into_iter()
            .filter(|r| r.text.to_ascii_uppercase().contains(" FETCH "))
            .filter_map(|r| {
                let uid = UID_ITEM
                    .captures(&r.text)
                    .and_then(|c| c[1].parse().ok());
                let data = r.literals.into_iter().next()?;
                Some(RawMessage { uid, data })
            })
            .collect();
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn logout(&mut self) -> Result<(), MailError> {
        self.run("LOGOUT", None).await.map(|_| ())
    }

    /// Send a tagged command and collect untagged responses until its
    /// completion. A trailing `literal` is sent after the server's
    /// continuation request.
    async fn run(
        &mut self,
        command: &str,
        literal: Option<&[u8]>,
    ) -> Result<Vec<Response>, MailError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        match literal {
            None => self.send(format!("{} {}\r\n", tag, command).as_bytes()).await?,
            Some(data) => {
                self.send(format!("{} {} {{{}}}\r\n", tag, command, data.len()).as_bytes())
                    .await?;
                let response = self.read_response().await?;
                if !response.text.starts_with('+') {
                    return Err(completion_error(command, &tag, &response.text));
                }
                self.send(data).await?;
                self.send(b"\r\n").await?;
            }
        }

        let mut untagged = Vec::new();
        loop {
            let response = self.read_response().await?;
            if let Some(status) = response
                .text
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '))
            {
                if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
                    return Ok(untagged);
                }
                return Err(completion_error(command, &tag, &response.text));
            }
            untagged.push(response);
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), MailError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read one response line, following any literals it announces.
    async fn read_response(&mut self) -> Result<Response, MailError> {
        let mut response = Response::default();
        loop {
            let mut line = Vec::new();
            if self.stream.read_until(b'\n', &mut line).await? == 0 {
                return Err(MailError::Protocol("connection closed".to_string()));
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }

            match literal_len(&line) {
                Some((prefix_len, len)) => {
                    response
                        .text
                        .push_str(&String::from_utf8_lossy(&line[..prefix_len]));
                    let mut data = vec![0; len];
                    self.stream.read_exact(&mut data).await?;
                    response.literals.push(data);
                }
                None => {
                    response.text.push_str(&String::from_utf8_lossy(&line));
                    return Ok(response);
                }
            }
        }
    }
}

fn completion_error(command: &str, tag: &str, text: &str) -> MailError {
    MailError::Command {
        command: verb(command).to_string(),
        response: text
            .strip_prefix(tag)
            .unwrap_or(text)
            .trim()
            .to_string(),
    }
}

/// Command name without arguments, so credentials never reach logs.
fn verb(command: &str) -> &str {
    let end = match command.strip_prefix("UID ") {
        Some(rest) => 4 + rest.find(' ').unwrap_or(rest.len()),
        None => command.find(' ').unwrap_or(command.len()),
    };
    &command[..end]
}

/// `{N}` or `{N+}` at the end of a line: the offset of the brace and N.
fn literal_len(line: &[u8]) -> Option<(usize, usize)> {
    if line.last() != Some(&b'}') {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = std::str::from_utf8(&line[open + 1..line.len() - 1]).ok()?;
    let len = digits.trim_end_matches('+').parse().ok()?;
    Some((open, len))
}

fn is_quotable(value: &str) -> bool {
    value.is_ascii() && !value.contains(['\r', '\n'])
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn split_server(server: &str) -> Result<(String, u16), MailError> {
    let server = server.trim();
    let (host, port) = match server.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse()
                .map_err(|_| MailError::InvalidServer(server.to_string()))?,
        ),
        None => (server, IMAPS_PORT),
    };
    if host.is_empty() {
        return Err(MailError::InvalidServer(server.to_string()));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    const FLYER_MAIL: &str = "Subject: Letak Kaufland\r\n\r\nbody\r\n";

    fn fetch_response(seq: u32, uid: u32, message: &str) -> String {
        format!(
            "* {} FETCH (UID {} BODY[] {{{}}}\r\n{})\r\n",
            seq,
            uid,
            message.len(),
            message
        )
    }

    /// Scripted server: answers each command by its verb and arguments.
    async fn serve(stream: DuplexStream, search_hits: &'static str) -> Vec<String> {
        let mut stream = BufReader::new(stream);
        let mut received = Vec::new();
        stream
            .get_mut()
            .write_all(b"* OK IMAP4rev1 ready\r\n")
            .await
            .unwrap();

        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            let (tag, command) = line.split_once(' ').unwrap();
            let tag = tag.to_string();
            received.push(command.to_string());

            let reply = if command.starts_with("LOGIN") {
                format!("{} OK LOGIN completed\r\n", tag)
            } else if command.starts_with("SELECT") {
                format!("* 12 EXISTS\r\n* 0 RECENT\r\n{} OK [READ-WRITE] SELECT\r\n", tag)
            } else if command.starts_with("UID SEARCH SUBJECT \"letak\"") {
                format!("* SEARCH {}\r\n{} OK SEARCH\r\n", search_hits, tag)
            } else if command.starts_with("UID SEARCH SUBJECT") {
                format!("{} NO [BADCHARSET] unsupported\r\n", tag)
            } else if command.starts_with("UID FETCH") {
                format!(
                    "{}{}{} OK FETCH\r\n",
                    fetch_response(4, 31, FLYER_MAIL),
                    fetch_response(5, 40, "Subject: x\r\n\r\ny\r\n"),
                    tag
                )
            } else if command.starts_with("FETCH") {
                format!("{}{} OK FETCH\r\n", fetch_response(12, 77, FLYER_MAIL), tag)
            } else if command.starts_with("LOGOUT") {
                format!("* BYE\r\n{} OK LOGOUT\r\n", tag)
            } else {
                format!("{} BAD unknown\r\n", tag)
            };
            stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
            if command.starts_with("LOGOUT") {
                break;
            }
        }
        received
    }

    fn query(subjects: &[&str]) -> MailboxQuery {
        MailboxQuery {
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetches_latest_matching_uids() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(serve(server, "3 40 31 7 18 25"));

        let mut session = ImapSession::new(client);
        session.greeting().await.unwrap();
        let messages = fetch_matching(&mut session, "user", "p\"w", &query(&["letak", "akce"]))
            .await
            .unwrap();
        drop(session);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].uid, Some(31));
        assert_eq!(messages[0].data, FLYER_MAIL.as_bytes());
        assert_eq!(messages[1].uid, Some(40));

        let commands = server.await.unwrap();
        assert_eq!(commands[0], r#"LOGIN "user" "p\"w""#);
        assert_eq!(commands[1], r#"SELECT "INBOX""#);
        assert!(commands.contains(&"UID FETCH 7,18,25,31,40 (UID BODY.PEEK[])".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some("LOGOUT"));
    }

    #[tokio::test]
    async fn test_empty_search_falls_back_to_sequence() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(serve(server, ""));

        let mut session = ImapSession::new(client);
        session.greeting().await.unwrap();
        let messages = fetch_matching(&mut session, "user", "pw", &query(&["letak"]))
            .await
            .unwrap();
        drop(session);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uid, Some(77));
        let commands = server.await.unwrap();
        assert!(commands.contains(&"FETCH 3:12 (UID BODY.PEEK[])".to_string()));
    }

    #[test]
    fn test_literal_len() {
        assert_eq!(literal_len(b"* 4 FETCH (UID 31 BODY[] {120}"), Some((25, 120)));
        assert_eq!(literal_len(b"{7+}"), Some((0, 7)));
        assert_eq!(literal_len(b"* OK done"), None);
    }

    #[test]
    fn test_verb_hides_arguments() {
        assert_eq!(verb("LOGIN \"user\" \"secret\""), "LOGIN");
        assert_eq!(verb("UID SEARCH SUBJECT \"x\""), "UID SEARCH");
        assert_eq!(verb("LOGOUT"), "LOGOUT");
    }

    #[test]
    fn test_split_server() {
        assert_eq!(
            split_server("imap.example.cz:993").unwrap(),
            ("imap.example.cz".to_string(), 993)
        );
        assert_eq!(
            split_server("imap.example.cz").unwrap(),
            ("imap.example.cz".to_string(), IMAPS_PORT)
        );
        assert!(split_server("imap.example.cz:imaps").is_err());
        assert!(split_server(":993").is_err());
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = ImapConfig {
            server: Some("imap.example.cz:993".to_string()),
            user: Some("flyers".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ImapMailbox::new(&config),
            Err(MailError::NotConfigured("IMAP_PASSWORD"))
        ));
    }
}
