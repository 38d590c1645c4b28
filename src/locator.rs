use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

use crate::config::ConfigError;
use crate::fetch_error::FetchError;
use crate::importers::downloader::http_client;
use crate::utils::apply_inbank_prefix;

pub const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Whether a file name or URL path ends in one of `extensions` (case-insensitive)
pub fn has_extension(name: &str, extensions: &[&str]) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Every spreadsheet link on a page, resolved against `base`, deduplicated and sorted
pub fn extract_spreadsheet_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = BTreeSet::new();

    for element in document.select(&LINKS) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(full) = base.join(href.trim()) else {
            trace!(href, "Skipping unparseable link");
            continue;
        };
        if has_extension(full.path(), &SPREADSHEET_EXTENSIONS) {
            trace!(url = %full, "Found spreadsheet link");
            links.insert(full.to_string());
        }
    }

    links.into_iter().collect()
}

/// Spreadsheet files directly inside `dir`, sorted by path
///
/// Office lock files (`~$name.xlsx`) are skipped.
pub fn list_directory(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, FetchError> {
    let directory_error = |source| FetchError::Directory {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(directory_error)? {
        let path = entry.map_err(directory_error)?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if path.is_file() && !name.starts_with("~$") && has_extension(&name, extensions) {
            files.push(path);
        }
    }
    files.sort();

    debug!("Found {} files in {}", files.len(), dir.display());
    Ok(files)
}

/// Finds the spreadsheet files published on an index page
#[derive(Clone)]
pub struct IndexLocator {
    client: Client,
    index_url: String,
    prefix: Option<String>,
}

impl IndexLocator {
    pub fn new(index_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(http_client(timeout), index_url)
    }

    pub fn with_client(client: Client, index_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            prefix: None,
        }
    }

    /// Remap the index and every file URL through an internal gateway prefix
    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.map(str::to_string);
        self
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// URL to request for a public URL
    pub fn resolve(&self, url: &str) -> Result<String, ConfigError> {
        match &self.prefix {
            Some(prefix) => apply_inbank_prefix(prefix, url),
            None => Ok(url.to_string()),
        }
    }

    /// Public URLs of all spreadsheets linked from the index page
    ///
    /// Links are resolved against the public index URL; remapping through the
    /// gateway happens at download time.
    #[instrument(skip(self), fields(url = %self.index_url))]
    pub async fn locate(&self) -> Result<Vec<String>, FetchError> {
        let base = Url::parse(&self.index_url).map_err(|e| FetchError::InvalidUrl {
            url: self.index_url.clone(),
            msg: e.to_string(),
        })?;
        let request_url = self.resolve(&self.index_url)?;

        debug!("Sending HTTP request to index page {}", request_url);
        let response = self.client.get(&request_url).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request_url,
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        debug!("Retrieved index page, size: {} bytes", html.len());

        let links = extract_spreadsheet_links(&html, &base);
        info!("Found {} spreadsheet links", links.len());
        Ok(links)
    }
}
