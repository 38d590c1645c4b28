pub mod archive_service;
pub mod escrow_service;

pub use archive_service::{ArchiveReport, ArchiveService};
pub use escrow_service::{EscrowService, PipelineError, PipelineOptions, PipelineReport};
