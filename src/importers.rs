//! Source-side pieces: recipes, spreadsheet parsing, downloading and zip packaging

pub mod archiver;
pub mod downloader;
pub mod recipe;
pub mod sheet_parser;

pub use archiver::{save_archive, ArchiveError};
pub use downloader::{CbrDownloader, DownloadError, DownloadedFile};
pub use recipe::{LayoutRecipe, PeriodRule};
pub use sheet_parser::{ParseError, ParseOutcome, ParseWarning, SheetParser, SourceFile};
