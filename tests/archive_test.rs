// Collecting series files into a zip archive

use cbr_stats::importers::archiver::ArchiveError;
use cbr_stats::importers::CbrDownloader;
use cbr_stats::services::ArchiveService;
use mockito::Server;
use std::io::Read;
use std::time::Duration;
use zip::ZipArchive;

fn downloader() -> CbrDownloader {
    CbrDownloader::with_client(reqwest::Client::new()).with_retry_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn test_archive_skips_failed_downloads() {
    let mut server = Server::new_async().await;

    let _funds = server
        .mock("GET", "/vfs/02_01_Funds_all.xlsx")
        .with_status(200)
        .with_body(b"funds")
        .create_async()
        .await;
    let _budget = server
        .mock("GET", "/vfs/02_29_Budget_all.xlsx")
        .with_status(200)
        .with_body(b"budget")
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/vfs/66-debt_securities.xlsx")
        .with_status(404)
        .create_async()
        .await;

    let urls: Vec<String> = ["02_01_Funds_all.xlsx", "66-debt_securities.xlsx", "02_29_Budget_all.xlsx"]
        .iter()
        .map(|name| format!("{}/vfs/{name}", server.url()))
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("CBR Collected Series Files.zip");
    let report = ArchiveService::new(downloader(), 2)
        .run(&urls, &output)
        .await
        .unwrap();

    assert_eq!(report.archived, 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].0.ends_with("66-debt_securities.xlsx"));

    let mut archive = ZipArchive::new(std::fs::File::open(&report.path).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    let mut content = String::new();
    archive
        .by_name("02_29_Budget_all.xlsx")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "budget");
}

#[tokio::test]
async fn test_archive_nothing_downloaded() {
    let mut server = Server::new_async().await;
    let _missing = server
        .mock("GET", "/vfs/a.xlsx")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.zip");
    let result = ArchiveService::new(downloader(), 1)
        .run(&[format!("{}/vfs/a.xlsx", server.url())], &output)
        .await;

    assert!(matches!(result, Err(ArchiveError::NothingDownloaded)));
    assert!(!output.exists());
}
