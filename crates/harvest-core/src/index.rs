//! Monthly archive listings and date filtering.

use std::io::Read;

use chrono::Datelike;
use flate2::read::MultiGzDecoder;
use url::Url;

use crate::config::DateWindow;
use crate::error::AppError;
use crate::models::{ArchiveFileReference, parse_capture_time};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::traits::ArchiveTransport;

pub const DEFAULT_BASE_URL: &str = "https://data.commoncrawl.org/";

const NEWS_ROUTE: &str = "crawl-data/CC-NEWS";
const PATHS_FILE: &str = "warc.paths.gz";

/// Calendar months from the month of `start` through the month of `end`,
/// inclusive, as `(year, month)`.
pub fn months_covered(window: &DateWindow) -> Vec<(i32, u32)> {
    let (start, end) = (window.start(), window.end());
    let mut months = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());

    while (year, month) <= (end.year(), end.month()) {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

/// Keep the paths whose embedded capture time lies inside `window`.
///
/// Paths that do not follow the archive naming scheme are dropped.
pub fn filter_by_date<S: AsRef<str>>(
    base: &Url,
    paths: &[S],
    window: &DateWindow,
) -> Vec<ArchiveFileReference> {
    paths
        .iter()
        .filter(|path| parse_capture_time(path.as_ref()).is_some_and(|ts| window.contains(ts)))
        .filter_map(|path| ArchiveFileReference::parse(base, path.as_ref()))
        .collect()
}

/// Resolves archive file references from the monthly `warc.paths.gz`
/// listings of a Common Crawl compatible host.
#[derive(Debug, Clone)]
pub struct ArchiveIndex<T: ArchiveTransport> {
    transport: T,
    base_url: Url,
}

impl<T: ArchiveTransport> ArchiveIndex<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            base_url: Url::parse(DEFAULT_BASE_URL).expect("valid default base URL"),
        }
    }

    /// Use another host (e.g. a mirror). A trailing `/` is added if missing.
    pub fn with_base_url(transport: T, base_url: &str) -> Result<Self, AppError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::ConfigError(format!("Invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            transport,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the listing for one month.
    pub fn paths_url(&self, year: i32, month: u32) -> String {
        format!("{}{NEWS_ROUTE}/{year}/{month:02}/{PATHS_FILE}", self.base_url)
    }

    /// Archive paths published for one month.
    ///
    /// A failed download or an undecodable listing is reported and yields
    /// an empty list.
    pub async fn list_references<R: HarvestReporter>(
        &self,
        year: i32,
        month: u32,
        reporter: &R,
    ) -> Vec<String> {
        let url = self.paths_url(year, month);
        match self.fetch_listing(&url).await {
            Ok(paths) => paths,
            Err(e) => {
                let error = e.to_string();
                reporter.report(HarvestEvent::ListingFailed {
                    url: &url,
                    error: &error,
                });
                Vec::new()
            }
        }
    }

    async fn fetch_listing(&self, url: &str) -> Result<Vec<String>, AppError> {
        let compressed = self.transport.fetch(url).await?;

        let mut listing = String::new();
        MultiGzDecoder::new(compressed.as_slice())
            .read_to_string(&mut listing)
            .map_err(|e| AppError::DecodeError(format!("Invalid paths listing: {e}")))?;

        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Filter paths against `window`, resolving them against this host.
    pub fn filter_by_date<S: AsRef<str>>(
        &self,
        paths: &[S],
        window: &DateWindow,
    ) -> Vec<ArchiveFileReference> {
        filter_by_date(&self.base_url, paths, window)
    }

    /// All archive files captured inside `window`, in listing order.
    pub async fn resolve<R: HarvestReporter>(
        &self,
        window: &DateWindow,
        reporter: &R,
    ) -> Vec<ArchiveFileReference> {
        let mut paths = Vec::new();
        for (year, month) in months_covered(window) {
            reporter.report(HarvestEvent::ListingMonth { year, month });
            paths.extend(self.list_references(year, month, reporter).await);
        }

        let references = self.filter_by_date(&paths, window);
        reporter.report(HarvestEvent::FilesResolved {
            count: references.len(),
        });
        references
    }
}
