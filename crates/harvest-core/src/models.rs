use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

static ARCHIVE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CC-NEWS-(?P<time>\d{14})-(?P<serial>\d{5})").expect("valid archive filename regex")
});

/// Parse the capture timestamp embedded in an archive filename.
///
/// Example: `crawl-data/CC-NEWS/2022/04/CC-NEWS-20220401000546-00192.warc.gz`
/// → `2022-04-01T00:05:46Z`. Returns `None` for anything that does not
/// follow the naming scheme (including impossible dates).
pub fn parse_capture_time(path: &str) -> Option<DateTime<Utc>> {
    let caps = ARCHIVE_FILE_RE.captures(path)?;
    NaiveDateTime::parse_from_str(&caps["time"], "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// One archive file to be harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFileReference {
    locator: String,
    captured_at: DateTime<Utc>,
    serial: u32,
    short_name: String,
}

impl ArchiveFileReference {
    /// Build a reference from a path listed in a monthly index.
    ///
    /// Relative paths are resolved against `base`. Returns `None` if the
    /// filename carries no valid capture timestamp.
    pub fn parse(base: &Url, path: &str) -> Option<Self> {
        let path = path.trim();
        let caps = ARCHIVE_FILE_RE.captures(path)?;
        let captured_at = parse_capture_time(path)?;
        let serial = caps["serial"].parse().ok()?;

        let locator = match Url::parse(path) {
            Ok(url) => url,
            Err(_) => base.join(path.trim_start_matches('/')).ok()?,
        };

        let short_name = locator
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|file| file.split('.').next())
            .filter(|name| !name.is_empty())?
            .to_string();

        Some(Self {
            locator: locator.to_string(),
            captured_at,
            serial,
            short_name,
        })
    }

    /// Absolute URL the archive file is downloaded from.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Basename of the locator without extensions, e.g. `CC-NEWS-20220401000546-00192`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Whether the locator points at a gzip-compressed archive.
    pub fn is_gzipped(&self) -> bool {
        self.locator.ends_with(".gz")
    }
}

/// Structured article produced by a content extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub title: String,
    pub text: String,
    pub url: String,
    pub source_domain: String,
    pub publish_date: Option<NaiveDate>,
}

/// An article extracted from an archive record, ready for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedArticle {
    pub title: String,
    pub main_text: String,
    pub url: String,
    pub source_domain: String,
    pub date_publish: Option<NaiveDate>,
    pub date_crawled: NaiveDate,
    pub language: String,
}

impl ExtractedArticle {
    pub fn new(parsed: ParsedArticle, date_crawled: NaiveDate, language: impl Into<String>) -> Self {
        Self {
            title: parsed.title,
            main_text: parsed.text,
            url: parsed.url,
            source_domain: parsed.source_domain,
            date_publish: parsed.publish_date,
            date_crawled,
            language: language.into(),
        }
    }

    /// String value of a column, dates rendered as `%Y-%m-%d`.
    pub fn field(&self, field: ArticleField) -> Option<String> {
        match field {
            ArticleField::Title => Some(self.title.clone()),
            ArticleField::MainText => Some(self.main_text.clone()),
            ArticleField::Url => Some(self.url.clone()),
            ArticleField::SourceDomain => Some(self.source_domain.clone()),
            ArticleField::DatePublish => self.date_publish.map(|d| d.format("%Y-%m-%d").to_string()),
            ArticleField::DateCrawled => Some(self.date_crawled.format("%Y-%m-%d").to_string()),
            ArticleField::Language => Some(self.language.clone()),
        }
    }
}

/// Output columns of an extracted article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleField {
    Title,
    MainText,
    Url,
    SourceDomain,
    DatePublish,
    DateCrawled,
    Language,
}

impl ArticleField {
    /// All columns in output order.
    pub const ALL: [ArticleField; 7] = [
        ArticleField::Title,
        ArticleField::MainText,
        ArticleField::Url,
        ArticleField::SourceDomain,
        ArticleField::DatePublish,
        ArticleField::DateCrawled,
        ArticleField::Language,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleField::Title => "title",
            ArticleField::MainText => "main_text",
            ArticleField::Url => "url",
            ArticleField::SourceDomain => "source_domain",
            ArticleField::DatePublish => "date_publish",
            ArticleField::DateCrawled => "date_crawled",
            ArticleField::Language => "language",
        }
    }

    /// Whether the column may hold nulls.
    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            ArticleField::Title | ArticleField::MainText | ArticleField::DatePublish
        )
    }

    /// Free-text columns have one value per article and cannot partition.
    pub fn is_partition_key(&self) -> bool {
        !matches!(
            self,
            ArticleField::Title | ArticleField::MainText | ArticleField::Url
        )
    }
}

impl fmt::Display for ArticleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArticleField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArticleField::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| AppError::ConfigError(format!("Unknown article field: '{s}'")))
    }
}

/// Per-record outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub extracted: u64,
    pub discarded: u64,
    pub errored: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.extracted + self.discarded + self.errored
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Self) {
        self.extracted += other.extracted;
        self.discarded += other.discarded;
        self.errored += other.errored;
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "extracted={} discarded={} errored={} total={}",
            self.extracted,
            self.discarded,
            self.errored,
            self.total()
        )
    }
}

/// Lifecycle of an extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Downloading,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Downloading => "downloading",
            JobState::Streaming => "streaming",
            JobState::Finalizing => "finalizing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a completed extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub job_name: String,
    pub location: PathBuf,
    pub counters: Counters,
    pub state: JobState,
}

/// Final report of a dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    /// Output locations holding at least one article.
    pub locations: Vec<PathBuf>,
    pub counters: Counters,
    /// Names of jobs that failed outright.
    pub failed_jobs: Vec<String>,
    pub cancelled: bool,
}
