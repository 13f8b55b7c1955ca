use std::sync::LazyLock;

use regex::Regex;

use crate::config::UrlPatterns;
use crate::warc::{ArchiveRecord, RecordKind};

static CONTENT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<mime>[\w/]+);\s?charset=(?P<charset>.*)$").expect("valid content type regex")
});

/// Checks whether an archive record should be extracted to an article.
///
/// A record is eligible when:
/// - it is a `response` record with HTTP headers,
/// - its `Content-Type` is exactly `text/html` with a UTF-8 charset,
/// - its target URL matches one of the patterns.
pub fn is_eligible(record: &ArchiveRecord, patterns: &UrlPatterns) -> bool {
    if record.kind() != &RecordKind::Response {
        return false;
    }

    let Some(http) = record.http_headers() else {
        return false;
    };
    let (Some(source), Some(content_type)) = (record.target_uri(), http.get("Content-Type")) else {
        return false;
    };

    is_utf8_html(content_type) && patterns.matches(source)
}

fn is_utf8_html(content_type: &str) -> bool {
    CONTENT_TYPE_RE
        .captures(content_type.trim())
        .is_some_and(|caps| {
            &caps["mime"] == "text/html" && caps["charset"].eq_ignore_ascii_case("utf-8")
        })
}
