use backon::{BackoffBuilder, ExponentialBuilder};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use reqwest::header::{HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::importers::sheet_parser::SourceFile;
use crate::utils::apply_inbank_prefix;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

const MAX_RETRIES: usize = 5;
const RETRY_MIN_DELAY: Duration = Duration::from_millis(500);

/// Maps each requested URL to the name its file was stored under
pub const CACHE_INDEX_FILE: &str = "cache_index.json";

static CONTENT_DISPOSITION_NAME: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#)
        .case_insensitive(true)
        .build()
        .unwrap()
});

static BANK_SECTOR_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[Bb]ank[Ss]ector/").unwrap());
static MORTGAGE_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[Mm]ortgage/").unwrap());
static LOANS_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[Ll]oans_to_corporations/").unwrap());

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("File not found (404): {0}")]
    NotFound(String),

    #[error("Server error (5xx): {0}")]
    ServerError(String),

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Got an HTML page instead of a file: {0}")]
    HtmlContent(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cache I/O failed for {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Worth another attempt at the same URL
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DownloadError::ServerError(_) => true,
            DownloadError::Status { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// A retrieved file with the name it should be stored under
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub url: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl DownloadedFile {
    pub fn into_source(self) -> SourceFile {
        SourceFile::new(self.file_name, self.bytes)
    }
}

/// HTTP client with the browser User-Agent the publisher expects
pub fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// Downloader for cbr.ru statistics files
#[derive(Clone)]
pub struct CbrDownloader {
    client: Client,
    prefix: Option<String>,
    cache_dir: Option<PathBuf>,
    cache_index: Arc<Mutex<()>>,
    retry_delay: Duration,
}

impl CbrDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(http_client(timeout))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            prefix: None,
            cache_dir: None,
            cache_index: Arc::new(Mutex::new(())),
            retry_delay: RETRY_MIN_DELAY,
        }
    }

    /// Route every request through an internal gateway prefix
    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.map(str::to_string);
        self
    }

    /// Reuse files already present in `dir` and store new downloads there
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Download one file, trying directory-case variants of the URL in turn
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<DownloadedFile, DownloadError> {
        if let Some(cached) = self.cached(url)? {
            return Ok(cached);
        }

        let mut last_error = None;
        for candidate in url_variants(url) {
            let request_url = match &self.prefix {
                Some(prefix) => apply_inbank_prefix(prefix, &candidate)?,
                None => candidate.clone(),
            };

            match self.fetch_with_retry(&request_url).await {
                Ok((disposition, bytes)) => {
                    let file_name = file_name_for(&candidate, disposition.as_deref());
                    info!("Downloaded {} ({} bytes) from {}", file_name, bytes.len(), candidate);
                    let file = DownloadedFile {
                        url: candidate,
                        file_name,
                        bytes,
                    };
                    self.store(url, &file)?;
                    return Ok(file);
                }
                Err(e) => {
                    debug!("Candidate {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| DownloadError::InvalidUrl(url.to_string()));
        warn!("Failed to download {}: {}", url, error);
        Err(error)
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<(Option<String>, Vec<u8>), DownloadError> {
        let mut delays = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_factor(2.0)
            .with_max_times(MAX_RETRIES)
            .build();

        loop {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => match delays.next() {
                    Some(delay) => {
                        warn!("Request to {} failed ({}), retrying in {:?}", url, e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<(Option<String>, Vec<u8>), DownloadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(DownloadError::NotFound(format!("{url} not found on server")));
        }
        if status.is_server_error() {
            return Err(DownloadError::ServerError(format!(
                "Server error {status} while downloading {url}"
            )));
        }
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = header_text(&response, CONTENT_TYPE).unwrap_or_default();
        if content_type.to_ascii_lowercase().contains("text/html") {
            return Err(DownloadError::HtmlContent(url.to_string()));
        }
        let disposition = header_text(&response, CONTENT_DISPOSITION);

        let bytes = response.bytes().await?;
        Ok((disposition, bytes.to_vec()))
    }

    fn cached(&self, url: &str) -> Result<Option<DownloadedFile>, DownloadError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(None);
        };
        let file_name = self
            .read_index(dir)?
            .remove(url)
            .unwrap_or_else(|| file_name_for(url, None));
        let path = dir.join(&file_name);
        if !path.is_file() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path).map_err(|source| cache_error(&path, source))?;
        debug!("Using cached {}", path.display());
        Ok(Some(DownloadedFile {
            url: url.to_string(),
            file_name,
            bytes,
        }))
    }

    fn store(&self, url: &str, file: &DownloadedFile) -> Result<(), DownloadError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|source| cache_error(dir, source))?;
        let path = dir.join(&file.file_name);
        std::fs::write(&path, &file.bytes).map_err(|source| cache_error(&path, source))?;

        let _guard = self.cache_index.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = read_index_file(dir)?;
        index.insert(url.to_string(), file.file_name.clone());
        let index_path = dir.join(CACHE_INDEX_FILE);
        let json = serde_json::to_vec_pretty(&index).map_err(|e| {
            cache_error(&index_path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(&index_path, json).map_err(|source| cache_error(&index_path, source))
    }

    fn read_index(&self, dir: &Path) -> Result<BTreeMap<String, String>, DownloadError> {
        let _guard = self.cache_index.lock().unwrap_or_else(|e| e.into_inner());
        read_index_file(dir)
    }
}

fn read_index_file(dir: &Path) -> Result<BTreeMap<String, String>, DownloadError> {
    let path = dir.join(CACHE_INDEX_FILE);
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let text = std::fs::read(&path).map_err(|source| cache_error(&path, source))?;
    match serde_json::from_slice(&text) {
        Ok(index) => Ok(index),
        Err(e) => {
            warn!("Ignoring unreadable cache index {}: {}", path.display(), e);
            Ok(BTreeMap::new())
        }
    }
}

fn header_text(response: &reqwest::Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn cache_error(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Cache {
        path: path.display().to_string(),
        source,
    }
}

/// The URL itself, then every directory-case variant the publisher is known to use
pub fn url_variants(url: &str) -> Vec<String> {
    let mut variants = vec![url.to_string()];
    for bank_sector in ["BankSector", "banksector"] {
        for mortgage in ["Mortgage", "mortgage"] {
            for loans in ["Loans_to_corporations", "loans_to_corporations"] {
                let variant = BANK_SECTOR_DIR.replace_all(url, format!("/{bank_sector}/").as_str());
                let variant = MORTGAGE_DIR.replace_all(&variant, format!("/{mortgage}/").as_str());
                let variant = LOANS_DIR
                    .replace_all(&variant, format!("/{loans}/").as_str())
                    .into_owned();
                if !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
        }
    }
    variants
}

/// Storage name: `Content-Disposition` filename, else the last URL segment
pub fn file_name_for(url: &str, content_disposition: Option<&str>) -> String {
    let from_header = content_disposition
        .and_then(|cd| CONTENT_DISPOSITION_NAME.captures(cd))
        .map(|caps| caps[1].trim().to_string());

    let raw = from_header.unwrap_or_else(|| {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.rsplit('/').next().unwrap_or_default().to_string()
    });
    let decoded = urlencoding::decode(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw);
    let name = decoded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let name = if name.is_empty() {
        "downloaded_file".to_string()
    } else {
        name
    };
    mark_reissued(name)
}

/// `obs_tabl20c` is republished under the same name; keep the new edition apart
fn mark_reissued(name: String) -> String {
    let lower = name.to_lowercase();
    // Latin or Cyrillic "c"
    if !(lower.contains("obs_tabl20c") || lower.contains("obs_tabl20\u{0441}")) {
        return name;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}new.{ext}"),
        None => format!("{name}new"),
    }
}
