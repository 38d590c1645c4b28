use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::dataset::{aggregate, LongFormDataset};
use crate::fetch_error::FetchError;
use crate::importers::downloader::CbrDownloader;
use crate::importers::recipe::LayoutRecipe;
use crate::importers::sheet_parser::{ParseWarning, SheetParser, SourceFile};
use crate::locator::{list_directory, IndexLocator, SPREADSHEET_EXTENSIONS};
use crate::pivot::{build_pivots, latest_source, IndicatorOrder, PivotError, UnknownIndicatorPolicy};
use crate::render::{plan_workbook, save_workbook, RenderError, RenderOptions};

/// Error types for pipeline runs; per-file problems are warnings, not errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to locate source files: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Pivot(#[from] PivotError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub recipe: LayoutRecipe,
    pub policy: UnknownIndicatorPolicy,
    /// Files parsed (and downloaded) at once
    pub concurrency: usize,
    pub render: RenderOptions,
    /// Also write the long-form dataset as JSON
    pub dataset_json: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(recipe: LayoutRecipe) -> Self {
        Self {
            recipe,
            policy: UnknownIndicatorPolicy::default(),
            concurrency: 4,
            render: RenderOptions::default(),
            dataset_json: None,
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub files: usize,
    pub records: usize,
    pub warnings: Vec<ParseWarning>,
    pub indicators: Vec<String>,
    /// `None` when there was nothing to write
    pub output: Option<PathBuf>,
}

/// Locator → parser → aggregator → pivot builder → renderer
#[derive(Clone)]
pub struct EscrowService {
    options: PipelineOptions,
    progress: ProgressBar,
}

impl EscrowService {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report per-file progress on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Files linked from the index page, downloaded through `downloader`
    #[instrument(skip(self, locator, downloader), fields(index = %locator.index_url()))]
    pub async fn run_index(
        &self,
        locator: &IndexLocator,
        downloader: &CbrDownloader,
        output: &Path,
    ) -> Result<PipelineReport, PipelineError> {
        let links = locator.locate().await?;
        info!("Downloading {} files", links.len());

        self.progress.set_length(links.len() as u64);
        self.progress.set_position(0);
        self.progress.set_message("downloading");

        let results: Vec<_> = stream::iter(links)
            .map(|url| async move {
                let result = downloader.download(&url).await;
                (url, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut sources = Vec::new();
        let mut warnings = Vec::new();
        for (url, result) in results {
            match result {
                Ok(file) => sources.push(file.into_source()),
                Err(e) => {
                    warn!("Skipping {}: {}", url, e);
                    warnings.push(ParseWarning {
                        source: url,
                        message: e.to_string(),
                    });
                }
            }
            self.progress.inc(1);
        }

        let mut report = self.process(sources, output).await?;
        warnings.append(&mut report.warnings);
        report.warnings = warnings;
        Ok(report)
    }

    /// Spreadsheets found directly inside `dir`
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn run_directory(&self, dir: &Path, output: &Path) -> Result<PipelineReport, PipelineError> {
        let paths = list_directory(dir, &SPREADSHEET_EXTENSIONS)?;
        info!("Reading {} files from {}", paths.len(), dir.display());

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await.map_err(|source| PipelineError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            sources.push(SourceFile::new(name, bytes));
        }

        self.process(sources, output).await
    }

    /// Parse, aggregate, pivot and render already-fetched files
    pub async fn process(&self, sources: Vec<SourceFile>, output: &Path) -> Result<PipelineReport, PipelineError> {
        let start_time = Instant::now();
        let parser = Arc::new(SheetParser::new(self.options.recipe.clone())?);
        let files = sources.len();

        let latest = latest_source(sources.iter().map(|s| s.name.as_str()))
            .and_then(|name| sources.iter().find(|s| s.name == name))
            .cloned();

        let (dataset, warnings) = self.parse_all(&parser, sources).await?;

        let order = match latest {
            Some(source) => reference_order(&parser, source).await?,
            None => {
                debug!("No dated source file, indicators will be sorted alphabetically");
                None
            }
        };

        let pivots = build_pivots(&dataset, order.as_ref(), self.options.policy)?;
        let indicators: Vec<String> = pivots.matrices.iter().map(|m| m.indicator.clone()).collect();

        if let Some(path) = &self.options.dataset_json {
            dataset.save_json(path).map_err(|source| PipelineError::Io {
                path: path.display().to_string(),
                source,
            })?;
            info!("Saved long-form dataset to {}", path.display());
        }

        let output = if pivots.is_empty() {
            warn!("No data parsed, workbook not written");
            None
        } else {
            let plans = plan_workbook(&pivots, &self.options.render);
            let path = output.to_path_buf();
            let saved = tokio::task::spawn_blocking(move || save_workbook(&plans, &path))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))??;
            Some(saved)
        };

        info!(
            "Pipeline finished in {:.2}s: {} files, {} records, {} warnings, {} sheets",
            start_time.elapsed().as_secs_f64(),
            files,
            dataset.len(),
            warnings.len(),
            indicators.len()
        );

        Ok(PipelineReport {
            files,
            records: dataset.len(),
            warnings,
            indicators,
            output,
        })
    }

    /// Parse every file on a bounded blocking pool; one bad file never stops the run
    async fn parse_all(
        &self,
        parser: &Arc<SheetParser>,
        sources: Vec<SourceFile>,
    ) -> Result<(LongFormDataset, Vec<ParseWarning>), PipelineError> {
        self.progress.set_length(sources.len() as u64);
        self.progress.set_position(0);
        self.progress.set_message("parsing");

        let results: Vec<_> = stream::iter(sources)
            .map(|source| {
                let parser = Arc::clone(parser);
                tokio::task::spawn_blocking(move || {
                    let outcome = parser.parse(&source);
                    (source.name, outcome)
                })
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut fragments = Vec::with_capacity(results.len());
        let mut warnings = Vec::new();
        for result in results {
            let (name, outcome) = result.map_err(|e| PipelineError::Task(e.to_string()))?;
            if let Some(warning) = outcome.warning.clone() {
                warnings.push(warning);
            }
            fragments.push(outcome.into_fragment(name));
            self.progress.inc(1);
        }
        self.progress.finish_with_message(format!("{} warnings", warnings.len()));

        warnings.sort_by(|a, b| a.source.cmp(&b.source));
        Ok((aggregate(fragments), warnings))
    }
}

/// Indicator order from the header row of the most recent file
async fn reference_order(
    parser: &Arc<SheetParser>,
    source: SourceFile,
) -> Result<Option<IndicatorOrder>, PipelineError> {
    let parser = Arc::clone(parser);
    let name = source.name.clone();
    let headers = tokio::task::spawn_blocking(move || parser.header_indicators(&source))
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?;

    match headers {
        Ok(headers) => {
            let order = IndicatorOrder::from_headers(headers);
            info!("Indicator order from {}: {} indicators", name, order.len());
            Ok(Some(order))
        }
        Err(e) => {
            warn!("Cannot read header row of {}: {}, sorting indicators alphabetically", name, e);
            Ok(None)
        }
    }
}
