//! Configuration management for flyerfeed using the prefer crate.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::GeminiConfig;
use crate::mail::ImapConfig;
use crate::scrapers::RETAILERS;

/// Hours between crawls unless overridden.
pub const DEFAULT_CRAWL_COOLDOWN_HOURS: u64 = 12;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Root for uploaded and downloaded files; page images go under `flyer_pages/`.
    pub uploads_dir: PathBuf,
    /// Root of the sharded tree of cropped item images.
    pub items_dir: PathBuf,
    /// User agent config (None = default, "impersonate" = real browser UA).
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Base delay between requests to the same host in milliseconds.
    pub request_delay_ms: u64,
    /// Pause between flyer detail pages and image downloads in milliseconds.
    pub page_delay_ms: u64,
    /// Minimum hours between two crawls.
    pub crawl_cooldown_hours: u64,
    /// Hours between scheduler ticks.
    pub tick_interval_hours: u64,
    /// Run a tick as soon as the scheduler starts.
    pub run_on_start: bool,
    /// Resolution used when rasterizing PDF pages.
    pub pdf_dpi: u32,
    /// Retailers to crawl, by id.
    pub retailers: Vec<String>,
    /// Extraction service configuration.
    pub extraction: GeminiConfig,
    /// Flyer mailbox; disabled until a server and credentials are set.
    pub mailbox: ImapConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/flyerfeed/ for user data
        let data_dir = dirs::document_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("flyerfeed");

        Self {
            uploads_dir: data_dir.join("uploads"),
            items_dir: data_dir.join("flyer_items"),
            data_dir,
            database_filename: "flyerfeed.db".to_string(),
            user_agent: None,
            request_timeout: 15,
            request_delay_ms: 250,
            page_delay_ms: 500,
            crawl_cooldown_hours: DEFAULT_CRAWL_COOLDOWN_HOURS,
            tick_interval_hours: 24,
            run_on_start: true,
            pdf_dpi: crate::services::splitter::NATIVE_DPI,
            retailers: RETAILERS.iter().map(|r| r.id.to_string()).collect(),
            extraction: GeminiConfig::default(),
            mailbox: ImapConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            uploads_dir: data_dir.join("uploads"),
            items_dir: data_dir.join("flyer_items"),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn crawl_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.crawl_cooldown_hours as i64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_hours.max(1) * 3600)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.uploads_dir)?;
        fs::create_dir_all(&self.items_dir)?;
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("FLYERFEED_DATA_DIR") {
            let data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
            self.uploads_dir = data_dir.join("uploads");
            self.items_dir = data_dir.join("flyer_items");
            self.data_dir = data_dir;
        }
        if let Some(uploads) = get("UPLOADS_PATH") {
            self.uploads_dir = PathBuf::from(shellexpand::tilde(&uploads).as_ref());
        }
        if let Some(hours) = get("FLYER_FETCH_DELAY_HOURS").and_then(|h| h.trim().parse().ok()) {
            self.crawl_cooldown_hours = hours;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.extraction.api_key = Some(key);
        }
        if let Some(server) = get("IMAP_SERVER") {
            self.mailbox.server = Some(server);
        }
        if let Some(user) = get("IMAP_USER") {
            self.mailbox.user = Some(user);
        }
        if let Some(password) = get("IMAP_PASSWORD") {
            self.mailbox.password = Some(password);
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Uploads directory.
    #[serde(default)]
    pub uploads_dir: Option<String>,
    /// Cropped item image directory.
    #[serde(default)]
    pub items_dir: Option<String>,
    /// User agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    /// Delay between flyer pages in milliseconds.
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    /// Hours between crawls.
    #[serde(default)]
    pub crawl_cooldown_hours: Option<u64>,
    /// Hours between scheduler ticks.
    #[serde(default)]
    pub tick_interval_hours: Option<u64>,
    /// Whether the scheduler ticks immediately on start.
    #[serde(default)]
    pub run_on_start: Option<bool>,
    /// PDF rasterization DPI.
    #[serde(default)]
    pub pdf_dpi: Option<u32>,
    /// Retailer ids to crawl.
    #[serde(default)]
    pub retailers: Option<Vec<String>>,
    /// `extraction.*` keys.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// `mailbox.*` keys.
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

/// Extraction service overrides from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Mailbox overrides from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// `host:port` of the IMAPS server.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    /// Subject substrings to search for.
    #[serde(default)]
    pub subjects: Option<Vec<String>>,
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers flyerfeed config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("flyerfeed").await {
            Ok(pref_config) => Config {
                target: pref_config.get("target").ok(),
                database: pref_config.get("database").ok(),
                uploads_dir: pref_config.get("uploads_dir").ok(),
                items_dir: pref_config.get("items_dir").ok(),
                user_agent: pref_config.get("user_agent").ok(),
                request_timeout: pref_config.get("request_timeout").ok(),
                request_delay_ms: pref_config.get("request_delay_ms").ok(),
                page_delay_ms: pref_config.get("page_delay_ms").ok(),
                crawl_cooldown_hours: pref_config.get("crawl_cooldown_hours").ok(),
                tick_interval_hours: pref_config.get("tick_interval_hours").ok(),
                run_on_start: pref_config.get("run_on_start").ok(),
                pdf_dpi: pref_config.get("pdf_dpi").ok(),
                retailers: pref_config.get("retailers").ok(),
                extraction: ExtractionConfig {
                    endpoint: pref_config.get("extraction.endpoint").ok(),
                    model: pref_config.get("extraction.model").ok(),
                    api_key: pref_config.get("extraction.api_key").ok(),
                    timeout_secs: pref_config.get("extraction.timeout_secs").ok(),
                    prompt: pref_config.get("extraction.prompt").ok(),
                },
                mailbox: MailboxConfig {
                    server: pref_config.get("mailbox.server").ok(),
                    user: pref_config.get("mailbox.user").ok(),
                    password: pref_config.get("mailbox.password").ok(),
                    folder: pref_config.get("mailbox.folder").ok(),
                    subjects: pref_config.get("mailbox.subjects").ok(),
                    max_messages: pref_config.get("mailbox.max_messages").ok(),
                    timeout_secs: pref_config.get("mailbox.timeout_secs").ok(),
                },
            },
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
            settings.uploads_dir = settings.data_dir.join("uploads");
            settings.items_dir = settings.data_dir.join("flyer_items");
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref uploads) = self.uploads_dir {
            settings.uploads_dir = PathBuf::from(shellexpand::tilde(uploads).as_ref());
        }
        if let Some(ref items) = self.items_dir {
            settings.items_dir = PathBuf::from(shellexpand::tilde(items).as_ref());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(delay) = self.page_delay_ms {
            settings.page_delay_ms = delay;
        }
        if let Some(hours) = self.crawl_cooldown_hours {
            settings.crawl_cooldown_hours = hours;
        }
        if let Some(hours) = self.tick_interval_hours {
            settings.tick_interval_hours = hours;
        }
        if let Some(run) = self.run_on_start {
            settings.run_on_start = run;
        }
        if let Some(dpi) = self.pdf_dpi {
            settings.pdf_dpi = dpi;
        }
        if let Some(ref retailers) = self.retailers {
            settings.retailers = retailers.clone();
        }
        self.extraction.apply_to(&mut settings.extraction);
        self.mailbox.apply_to(&mut settings.mailbox);
    }
}

impl ExtractionConfig {
    fn apply_to(&self, extraction: &mut GeminiConfig) {
        if let Some(ref endpoint) = self.endpoint {
            extraction.endpoint = endpoint.clone();
        }
        if let Some(ref model) = self.model {
            extraction.model = model.clone();
        }
        if let Some(ref key) = self.api_key {
            extraction.api_key = Some(key.clone());
        }
        if let Some(secs) = self.timeout_secs {
            extraction.timeout_secs = secs;
        }
        if let Some(ref prompt) = self.prompt {
            extraction.prompt = Some(prompt.clone());
        }
    }
}

impl MailboxConfig {
    fn apply_to(&self, mailbox: &mut ImapConfig) {
        if let Some(ref server) = self.server {
            mailbox.server = Some(server.clone());
        }
        if let Some(ref user) = self.user {
            mailbox.user = Some(user.clone());
        }
        if let Some(ref password) = self.password {
            mailbox.password = Some(password.clone());
        }
        if let Some(ref folder) = self.folder {
            mailbox.folder = folder.clone();
        }
        if let Some(ref subjects) = self.subjects {
            mailbox.subjects = subjects.clone();
        }
        if let Some(max) = self.max_messages {
            mailbox.max_messages = max;
        }
        if let Some(secs) = self.timeout_secs {
            mailbox.timeout_secs = secs;
        }
    }
}

/// Load settings: defaults, then config file, then environment.
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings.apply_env();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/flyers/flyerfeed.db"));
        assert_eq!(settings.uploads_dir, PathBuf::from("/srv/flyers/uploads"));
        assert_eq!(settings.crawl_cooldown(), chrono::Duration::hours(12));
        assert_eq!(settings.request_timeout(), Duration::from_secs(15));
        assert_eq!(settings.retailers.len(), RETAILERS.len());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLYER_FETCH_DELAY_HOURS", "6"),
            ("UPLOADS_PATH", "/var/uploads"),
            ("GEMINI_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        settings.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.crawl_cooldown_hours, 6);
        assert_eq!(settings.uploads_dir, PathBuf::from("/var/uploads"));
        assert_eq!(settings.extraction.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_cooldown_is_ignored() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        settings.apply_env_with(|k| (k == "FLYER_FETCH_DELAY_HOURS").then(|| "soon".to_string()));
        assert_eq!(settings.crawl_cooldown_hours, DEFAULT_CRAWL_COOLDOWN_HOURS);
    }

    #[test]
    fn test_config_applies() {
        let config = Config {
            retailers: Some(vec!["lidl".to_string()]),
            pdf_dpi: Some(150),
            run_on_start: Some(false),
            ..Default::default()
        };
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.retailers, vec!["lidl"]);
        assert_eq!(settings.pdf_dpi, 150);
        assert!(!settings.run_on_start);
    }

    #[test]
    fn test_section_keys_apply_field_by_field() {
        let config = Config {
            extraction: ExtractionConfig {
                model: Some("gemini-2.5-pro".to_string()),
                timeout_secs: Some(60),
                ..Default::default()
            },
            mailbox: MailboxConfig {
                folder: Some("Letaky".to_string()),
                subjects: Some(vec!["letak".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.extraction.model, "gemini-2.5-pro");
        assert_eq!(settings.extraction.timeout_secs, 60);
        assert_eq!(settings.extraction.endpoint, GeminiConfig::default().endpoint);
        assert_eq!(settings.mailbox.folder, "Letaky");
        assert_eq!(settings.mailbox.subjects, vec!["letak"]);
        assert_eq!(settings.mailbox.max_messages, crate::mail::DEFAULT_MAX_MESSAGES);
    }

    #[test]
    fn test_imap_env() {
        let env: HashMap<&str, &str> = [
            ("IMAP_SERVER", "imap.example.cz:993"),
            ("IMAP_USER", "letaky"),
            ("IMAP_PASSWORD", "tajne"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::with_data_dir(PathBuf::from("/srv/flyers"));
        settings.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.mailbox.server.as_deref(), Some("imap.example.cz:993"));
        assert_eq!(settings.mailbox.user.as_deref(), Some("letaky"));
        assert_eq!(settings.mailbox.password.as_deref(), Some("tajne"));
        assert_eq!(settings.mailbox.folder, "INBOX");
    }
}
