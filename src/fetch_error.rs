use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Index page {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("Invalid URL {url}: {msg}")]
    InvalidUrl { url: String, msg: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to list directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
