use std::path::Path;

use crate::models::Counters;

/// Events emitted by the index resolver, extraction jobs and the dispatcher.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    ListingMonth {
        year: i32,
        month: u32,
    },
    ListingFailed {
        url: &'a str,
        error: &'a str,
    },
    FilesResolved {
        count: usize,
    },
    JobStarted {
        job: &'a str,
        locator: &'a str,
    },
    DownloadFailed {
        job: &'a str,
        error: &'a str,
    },
    StreamingStarted {
        job: &'a str,
        content_length: Option<u64>,
    },
    RecordDiscarded {
        job: &'a str,
        url: Option<&'a str>,
    },
    RecordErrored {
        job: &'a str,
        url: Option<&'a str>,
        error: &'a str,
    },
    Counters {
        job: &'a str,
        counters: Counters,
    },
    Progress {
        job: &'a str,
        percent_complete: f64,
        minutes_left: f64,
    },
    ProgressUnknown {
        job: &'a str,
    },
    LimitReached {
        job: &'a str,
        limit: u64,
    },
    StreamInterrupted {
        job: &'a str,
        error: &'a str,
    },
    Saving {
        job: &'a str,
        location: &'a Path,
        articles: usize,
    },
    JobCompleted {
        job: &'a str,
        counters: Counters,
    },
    JobFailed {
        job: &'a str,
        error: &'a str,
    },
    Aggregate {
        counters: Counters,
    },
    EmptyOutputIgnored {
        location: &'a Path,
    },
    Cancelled {
        pending: usize,
    },
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl HarvestReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::ListingMonth { year, month } => {
                tracing::info!("Getting WARC paths for {year}-{month:02}");
            }
            HarvestEvent::ListingFailed { url, error } => {
                tracing::warn!(%url, %error, "Failed to download WARC paths");
            }
            HarvestEvent::FilesResolved { count } => {
                tracing::info!("Found {count} WARC files to process");
            }
            HarvestEvent::JobStarted { job, locator } => {
                tracing::info!(%job, %locator, "Downloading WARC file");
            }
            HarvestEvent::DownloadFailed { job, error } => {
                tracing::warn!(%job, %error, "Failed to download WARC file");
            }
            HarvestEvent::StreamingStarted {
                job,
                content_length,
            } => {
                tracing::info!(%job, ?content_length, "Iterating through records");
            }
            HarvestEvent::RecordDiscarded { job, url } => {
                tracing::debug!(%job, url = url.unwrap_or("-"), "Ignoring record");
            }
            HarvestEvent::RecordErrored { job, url, error } => {
                tracing::debug!(%job, url = url.unwrap_or("-"), %error, "Record failed");
            }
            HarvestEvent::Counters { job, counters } => {
                tracing::info!(%job, "Counter update {counters}");
            }
            HarvestEvent::Progress {
                job,
                percent_complete,
                minutes_left,
            } => {
                tracing::info!(
                    %job,
                    "Extraction {percent_complete:.2}% complete, ~{minutes_left:.0} mins left"
                );
            }
            HarvestEvent::ProgressUnknown { job } => {
                tracing::debug!(%job, "File size unknown, cannot report progress");
            }
            HarvestEvent::LimitReached { job, limit } => {
                tracing::info!(%job, %limit, "Passed record limit, stopping");
            }
            HarvestEvent::StreamInterrupted { job, error } => {
                tracing::warn!(%job, %error, "Record stream ended early");
            }
            HarvestEvent::Saving {
                job,
                location,
                articles,
            } => {
                tracing::info!(%job, location = %location.display(), %articles, "Saving articles");
            }
            HarvestEvent::JobCompleted { job, counters } => {
                tracing::info!(%job, "Job completed {counters}");
            }
            HarvestEvent::JobFailed { job, error } => {
                tracing::error!(%job, %error, "Job exited with error");
            }
            HarvestEvent::Aggregate { counters } => {
                tracing::info!("Counter update {counters}");
            }
            HarvestEvent::EmptyOutputIgnored { location } => {
                tracing::info!(location = %location.display(), "Ignoring output since it is empty");
            }
            HarvestEvent::Cancelled { pending } => {
                tracing::warn!(%pending, "Cancelled, not starting remaining jobs");
            }
        }
    }
}
