use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::importers::archiver::{save_archive, ArchiveError};
use crate::importers::downloader::CbrDownloader;

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub archived: usize,
    /// URLs that could not be downloaded, with the reason
    pub failed: Vec<(String, String)>,
}

/// Downloads a list of series files and packs them into one zip
#[derive(Clone)]
pub struct ArchiveService {
    downloader: CbrDownloader,
    concurrency: usize,
    progress: ProgressBar,
}

impl ArchiveService {
    pub fn new(downloader: CbrDownloader, concurrency: usize) -> Self {
        Self {
            downloader,
            concurrency: concurrency.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    #[instrument(skip(self, urls), fields(urls = urls.len(), output = %output.display()))]
    pub async fn run(&self, urls: &[String], output: &Path) -> Result<ArchiveReport, ArchiveError> {
        self.progress.set_length(urls.len() as u64);
        self.progress.set_position(0);

        // `buffered` keeps the entries in the order the URLs were given
        let results: Vec<_> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.downloader.download(&url).await;
                self.progress.inc(1);
                (url, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut files = Vec::new();
        let mut failed = Vec::new();
        for (url, result) in results {
            match result {
                Ok(file) => files.push(file),
                Err(e) => {
                    warn!("Not archiving {}: {}", url, e);
                    failed.push((url, e.to_string()));
                }
            }
        }
        self.progress
            .finish_with_message(format!("{} downloaded, {} failed", files.len(), failed.len()));

        if files.is_empty() {
            return Err(ArchiveError::NothingDownloaded);
        }

        let archived = files.len();
        let path = output.to_path_buf();
        let path = tokio::task::spawn_blocking(move || save_archive(&path, &files))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;

        info!("Archived {} of {} files into {}", archived, urls.len(), path.display());
        Ok(ArchiveReport {
            path,
            archived,
            failed,
        })
    }
}
