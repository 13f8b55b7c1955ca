use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use harvest_core::error::AppError;
use harvest_core::models::ParsedArticle;
use harvest_core::traits::ContentExtractor;
use scraper::{ElementRef, Html, Selector};
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static ARTICLE_P: LazyLock<Selector> = LazyLock::new(|| selector("article p"));
static P: LazyLock<Selector> = LazyLock::new(|| selector("p"));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| selector(r#"link[rel="canonical"]"#));
static OG_URL: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:url"]"#));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));
static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"script[type="application/ld+json"]"#));

/// Meta tags carrying a publication date, most specific first.
static DATE_META: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"meta[property="article:published_time"]"#,
        r#"meta[property="og:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="pubdate"]"#,
        r#"meta[name="publishdate"]"#,
        r#"meta[name="parsely-pub-date"]"#,
        r#"meta[name="dc.date"]"#,
        r#"meta[name="DC.date.issued"]"#,
        r#"meta[name="date"]"#,
    ]
    .into_iter()
    .map(selector)
    .collect()
});

/// Heuristic article extractor over the page's HTML structure.
///
/// - title: `og:title`, then `<title>`, then the first `<h1>`
/// - text: paragraphs inside `<article>`, else every `<p>` of the page
/// - url: `link[rel=canonical]`, then `og:url`, then the captured URL
/// - publish date: common meta tags, `<time datetime>`, JSON-LD `datePublished`
#[derive(Debug, Clone, Default)]
pub struct HtmlArticleExtractor;

impl HtmlArticleExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ContentExtractor for HtmlArticleExtractor {
    fn extract(&self, url: &str, html: &str) -> Result<ParsedArticle, AppError> {
        let document = Html::parse_document(html);

        let title = extract_title(&document).unwrap_or_default();
        let text = extract_text(&document);
        if title.is_empty() && text.is_empty() {
            return Err(AppError::ExtractionError(format!(
                "No article content found at {url}"
            )));
        }

        let url = canonical_url(&document, url);
        let source_domain = source_domain(&url)
            .ok_or_else(|| AppError::ExtractionError(format!("URL has no host: {url}")))?;

        Ok(ParsedArticle {
            title,
            text,
            url,
            source_domain,
            publish_date: publish_date(&document),
        })
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(String::from)
}

fn extract_title(document: &Html) -> Option<String> {
    meta_content(document, &OG_TITLE).or_else(|| {
        [&*TITLE, &*H1].into_iter().find_map(|sel| {
            document
                .select(sel)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    })
}

fn paragraphs(document: &Html, selector: &Selector) -> Vec<String> {
    document
        .select(selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

fn extract_text(document: &Html) -> String {
    let mut found = paragraphs(document, &ARTICLE_P);
    if found.is_empty() {
        found = paragraphs(document, &P);
    }
    found.join("\n\n")
}

/// Absolute canonical URL of the page, falling back to `captured`.
fn canonical_url(document: &Html, captured: &str) -> String {
    let declared = document
        .select(&CANONICAL)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(String::from)
        .or_else(|| meta_content(document, &OG_URL));

    declared
        .and_then(|href| {
            Url::parse(captured)
                .and_then(|base| base.join(&href))
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
        })
        .map(String::from)
        .unwrap_or_else(|| captured.to_string())
}

/// `scheme://host` of a URL.
fn source_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{host}", parsed.scheme()))
}

fn publish_date(document: &Html) -> Option<NaiveDate> {
    DATE_META
        .iter()
        .filter_map(|sel| meta_content(document, sel))
        .chain(
            document
                .select(&TIME)
                .filter_map(|el| el.value().attr("datetime"))
                .map(String::from),
        )
        .chain(json_ld_dates(document))
        .find_map(|value| parse_date(&value))
}

fn json_ld_dates(document: &Html) -> Vec<String> {
    document
        .select(&JSON_LD)
        .filter_map(|script| {
            serde_json::from_str::<serde_json::Value>(script.text().collect::<String>().trim()).ok()
        })
        .flat_map(|json| match json {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        })
        .filter_map(|item| item.get("datePublished")?.as_str().map(String::from))
        .collect()
}

/// Parse RFC 3339 timestamps or a leading `YYYY-MM-DD`.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.date_naive());
    }
    value
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}
