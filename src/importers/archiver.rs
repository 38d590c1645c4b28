use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::importers::downloader::DownloadedFile;

pub const DEFAULT_ARCHIVE_NAME: &str = "CBR Collected Series Files.zip";

/// Full time-series files (not monthly snapshots) collected by default
pub const DEFAULT_SERIES_URLS: [&str; 16] = [
    // household loans
    "https://www.cbr.ru/vfs/statistics/BankSector/Mortgage/02_05_Debt_ind.xlsx",
    // mortgage
    "https://www.cbr.ru/vfs/statistics/banksector/mortgage/02_41_Mortgage_ihc.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Mortgage/02_02_Mortgage.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Mortgage/02_03_Scpa_mortgage.xlsx",
    // corporate loans
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_01_A_New_loans_corp_by_activity.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_01_C_New_loans_corp_by_activity.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_02_A_Debt_corp_by_activity.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_02_C_Debt_corp_by_activity.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_11_Debt_sme.xlsx",
    "https://www.cbr.ru/vfs/statistics/BankSector/Loans_to_corporations/01_11_F_Debt_sme_by_activity.xlsx",
    // debt securities
    "https://www.cbr.ru/vfs/statistics/debt_securities/66-debt_securities.xlsx",
    // funds
    "https://www.cbr.ru/vfs/statistics/BankSector/Borrowings/02_01_Funds_all.xlsx",
    "https://www.cbr.ru/vfs/statistics/banksector/borrowings/02_29_Budget_all.xlsx",
    // households
    "https://cbr.ru/vfs/statistics/households/households_bm.xlsx",
    "https://cbr.ru/vfs/statistics/households/households_om.xlsx",
    "https://www.cbr.ru/Content/Document/File/115862/obs_tabl20%D1%81.xlsx",
];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No file could be downloaded; check the URLs and network access")]
    NothingDownloaded,

    #[error("Archive task failed: {0}")]
    Task(String),
}

/// Entry name not used yet in the archive: `name.xlsx`, `name (2).xlsx`, ...
fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem} ({n}).{ext}"),
            None => format!("{name} ({n})"),
        };
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Write the files as deflated entries, one per file, in the given order
pub fn write_archive<W: Write + Seek>(writer: W, files: &[DownloadedFile]) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for file in files {
        let entry = unique_entry_name(&file.file_name, &mut used);
        debug!("Adding {} ({} bytes)", entry, file.bytes.len());
        zip.start_file(entry.as_str(), options)?;
        zip.write_all(&file.bytes).map_err(|source| ArchiveError::Io {
            path: entry.clone(),
            source,
        })?;
    }

    Ok(zip.finish()?)
}

pub fn save_archive(path: &Path, files: &[DownloadedFile]) -> Result<PathBuf, ArchiveError> {
    let io_error = |path: &Path, source| ArchiveError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = write_archive(BufWriter::new(file), files)?;
    writer.flush().map_err(|e| io_error(path, e))?;

    info!("Packed {} files into {}", files.len(), path.display());
    Ok(path.to_path_buf())
}
