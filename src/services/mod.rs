//! Service layer for flyerfeed business logic.
//!
//! The CLI only wires these together; crawling, extraction and scheduling
//! live here so they can be driven from tests with fake fetchers and
//! extractors.

pub mod cropper;
pub mod email;
pub mod manager;
pub mod reconcile;
pub mod scheduler;
pub mod splitter;

pub use cropper::{crop_item, CropError};
pub use email::{flyer_attachments, ingest_email, ingest_mailbox, MailboxReport};
pub use manager::{
    DownloadReport, FlyerManager, IngestReport, ManagerOptions, PipelineStats, ProcessReport,
};
pub use reconcile::{PageContext, Reconciler, SaveSummary};
pub use scheduler::{PipelineJobs, Scheduler, SchedulerConfig, TickOutcome, FLYER_DOWNLOAD_JOB};
pub use splitter::{PageSplitter, SplitError};
