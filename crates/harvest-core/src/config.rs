//! Validated configuration value objects.
//!
//! Every type here is immutable once built; invalid input is rejected with
//! [`AppError::ConfigError`] at construction, never at run time.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use glob::Pattern;

use crate::error::AppError;
use crate::models::ArticleField;

/// Records between two progress reports unless configured otherwise.
pub const DEFAULT_REPORT_EVERY: u64 = 5000;

/// Ordered set of shell-style URL glob patterns.
///
/// Matching is case-sensitive and `*` also matches `/`, so
/// `*.example.com/*` accepts `https://news.example.com/politics/a.html`.
#[derive(Debug, Clone)]
pub struct UrlPatterns {
    patterns: Vec<Pattern>,
}

impl UrlPatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Pattern::new(p)
                    .map_err(|e| AppError::ConfigError(format!("Invalid URL pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if patterns.is_empty() {
            tracing::warn!("Empty patterns list. All source URLs will be rejected.");
        }

        Ok(Self { patterns })
    }

    /// True if `url` matches at least one pattern.
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Capture window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    /// Build a window checked against the current time.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AppError> {
        Self::with_clock(start, end, Utc::now())
    }

    /// Build a window checked against an explicit `now`.
    pub fn with_clock(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if end > now {
            return Err(AppError::ConfigError(format!(
                "End date {end} is in the future"
            )));
        }
        if start >= end {
            return Err(AppError::ConfigError(format!(
                "Start date {start} is on or after the end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// URL patterns plus capture window.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub patterns: UrlPatterns,
    pub window: DateWindow,
}

impl FilterCriteria {
    pub fn new(patterns: UrlPatterns, window: DateWindow) -> Self {
        Self { patterns, window }
    }
}

/// Settings shared by every extraction job of a run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    output_dir: PathBuf,
    record_limit: Option<u64>,
    workers: NonZeroUsize,
    report_every: u64,
    flush_every: Option<usize>,
    partition_by: Vec<ArticleField>,
}

impl HarvestConfig {
    pub fn builder(output_dir: impl Into<PathBuf>) -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            output_dir: output_dir.into(),
            record_limit: None,
            workers: None,
            report_every: DEFAULT_REPORT_EVERY,
            flush_every: None,
            partition_by: Vec::new(),
        }
    }

    /// Directory every job writes its output location into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Maximum records each job iterates over.
    pub fn record_limit(&self) -> Option<u64> {
        self.record_limit
    }

    /// Number of jobs allowed to run at once.
    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Records between two progress reports.
    pub fn report_every(&self) -> u64 {
        self.report_every
    }

    /// Buffered articles that trigger an intermediate write.
    pub fn flush_every(&self) -> Option<usize> {
        self.flush_every
    }

    pub fn partition_by(&self) -> &[ArticleField] {
        &self.partition_by
    }
}

/// Builder for [`HarvestConfig`]; all checks run in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct HarvestConfigBuilder {
    output_dir: PathBuf,
    record_limit: Option<u64>,
    workers: Option<usize>,
    report_every: u64,
    flush_every: Option<usize>,
    partition_by: Vec<ArticleField>,
}

impl HarvestConfigBuilder {
    pub fn record_limit(mut self, limit: u64) -> Self {
        self.record_limit = Some(limit);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn report_every(mut self, n: u64) -> Self {
        self.report_every = n;
        self
    }

    pub fn flush_every(mut self, n: usize) -> Self {
        self.flush_every = Some(n);
        self
    }

    pub fn partition_by(mut self, fields: impl IntoIterator<Item = ArticleField>) -> Self {
        self.partition_by = fields.into_iter().collect();
        self
    }

    /// Validate the settings and prepare the output directory.
    ///
    /// The directory is created if missing; an existing path that is not a
    /// directory is rejected.
    pub fn build(self) -> Result<HarvestConfig, AppError> {
        if self.record_limit == Some(0) {
            return Err(AppError::ConfigError(
                "Record limit must be greater than zero".into(),
            ));
        }
        if self.report_every == 0 {
            return Err(AppError::ConfigError(
                "Report interval must be greater than zero".into(),
            ));
        }
        if self.flush_every == Some(0) {
            return Err(AppError::ConfigError(
                "Flush size must be greater than zero".into(),
            ));
        }

        let workers = match self.workers {
            Some(n) => NonZeroUsize::new(n).ok_or_else(|| {
                AppError::ConfigError("Worker count must be at least 1".into())
            })?,
            None => std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        };

        let mut partition_by: Vec<ArticleField> = Vec::with_capacity(self.partition_by.len());
        for field in self.partition_by {
            if !field.is_partition_key() {
                return Err(AppError::ConfigError(format!(
                    "Column '{field}' cannot be used as a partition key"
                )));
            }
            if partition_by.contains(&field) {
                return Err(AppError::ConfigError(format!(
                    "Partition key '{field}' given twice"
                )));
            }
            partition_by.push(field);
        }

        if self.output_dir.exists() {
            if !self.output_dir.is_dir() {
                return Err(AppError::ConfigError(format!(
                    "'{}' is not a directory",
                    self.output_dir.display()
                )));
            }
        } else {
            tracing::debug!(path = %self.output_dir.display(), "Creating output directory");
            std::fs::create_dir_all(&self.output_dir).map_err(|e| {
                AppError::ConfigError(format!(
                    "Cannot create output directory '{}': {e}",
                    self.output_dir.display()
                ))
            })?;
        }

        Ok(HarvestConfig {
            output_dir: self.output_dir,
            record_limit: self.record_limit,
            workers,
            report_every: self.report_every,
            flush_every: self.flush_every,
            partition_by,
        })
    }
}
