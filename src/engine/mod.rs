//! The extraction engine and common types for Madara-family sites.
//!
//! One engine implements every contract — listing extraction, chapter
//! discovery, page resolution — configured by a plain per-site
//! [`SiteConfig`] record. Site quirks are configuration fields, not
//! subclasses. The engine never fetches the initial document; callers
//! hand it already-fetched HTML, and only the chapter-discovery AJAX
//! escalation goes back over the wire, through the [`Fetcher`] seam.

mod chapters;
mod listing;
mod pages;

use crate::config::{AjaxMethod, SiteConfig};
use crate::dates::DateVocabulary;
use crate::error::{ConfigError, ExtractError};
use crate::headers::HeaderProfile;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::Selector;
use std::time::Duration;
use url::Url;

/// One catalog entry from a listing page, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Site-root-relative URL with a leading slash.
    pub relative_url: String,

    /// Entry title.
    pub title: String,

    /// Cover thumbnail, absolute, when the card carries one.
    pub thumbnail_url: Option<String>,
}

/// One chapter of a catalog item.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    /// Site-root-relative URL with a leading slash.
    pub relative_url: String,

    /// Human-readable chapter name.
    pub display_name: String,

    /// Best-effort chapter number from the name or URL; `None` means
    /// the ordering is unknown.
    pub numeric_index: Option<f32>,

    /// Upload time in epoch milliseconds, `0` when unknown.
    pub uploaded_at_millis: i64,
}

/// One page image of a chapter. List order is reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based position within the chapter.
    pub index: usize,

    /// Absolute image URL.
    pub image_url: String,
}

/// Result of parsing one catalog listing page.
#[derive(Debug, Clone)]
pub struct Listing {
    pub entries: Vec<CatalogEntry>,
    pub has_next_page: bool,
}

/// A secondary AJAX request issued during chapter discovery.
#[derive(Debug, Clone)]
pub struct AjaxRequest {
    pub url: String,
    pub method: AjaxMethod,
    pub form: Vec<(String, String)>,
}

/// Transport seam for the engine's secondary requests.
///
/// Production uses [`HttpFetcher`]; tests inject canned fragments.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Executes one request and returns the response body.
    async fn fetch(&self, request: AjaxRequest) -> Result<String, ExtractError>;
}

/// [`Fetcher`] backed by a `reqwest` client carrying the header
/// profile's header set.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a client with the profile's headers as defaults.
    pub fn new(profile: &HeaderProfile, config: &SiteConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .default_headers(profile.header_map(config))
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: AjaxRequest) -> Result<String, ExtractError> {
        let response = match request.method {
            AjaxMethod::Post => {
                self.client
                    .post(&request.url)
                    .header("X-Requested-With", "XMLHttpRequest")
                    .form(&request.form)
                    .send()
                    .await?
            }
            AjaxMethod::Get => {
                self.client
                    .get(&request.url)
                    .header("X-Requested-With", "XMLHttpRequest")
                    .query(&request.form)
                    .send()
                    .await?
            }
        };
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// CSS selectors compiled once from the site configuration.
pub(crate) struct Selectors {
    pub login_marker: Selector,
    pub card: Selector,
    pub card_link: Selector,
    pub card_titles: Vec<Selector>,
    pub next_page: Selector,
    pub chapter_item: Selector,
    pub chapter_link: Selector,
    pub chapter_date: Selector,
    pub id_holder: Selector,
    pub reading_content: Selector,
    pub image: Selector,
    pub protector: Selector,
    // Fixed selectors, not configurable.
    pub script: Selector,
    pub anchor: Selector,
    pub shortlink: Selector,
    pub img: Selector,
}

impl Selectors {
    fn compile(config: &SiteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            login_marker: parse_selector("login_marker_selector", &config.login_marker_selector)?,
            card: parse_selector("listing.card_selector", &config.listing.card_selector)?,
            card_link: parse_selector("listing.link_selector", &config.listing.link_selector)?,
            card_titles: config
                .listing
                .title_selectors
                .iter()
                .map(|s| parse_selector("listing.title_selectors", s))
                .collect::<Result<_, _>>()?,
            next_page: parse_selector(
                "listing.next_page_selector",
                &config.listing.next_page_selector,
            )?,
            chapter_item: parse_selector("chapters.item_selector", &config.chapters.item_selector)?,
            chapter_link: parse_selector("chapters.link_selector", &config.chapters.link_selector)?,
            chapter_date: parse_selector("chapters.date_selector", &config.chapters.date_selector)?,
            id_holder: parse_selector(
                "chapters.id_holder_selector",
                &config.chapters.id_holder_selector,
            )?,
            reading_content: parse_selector(
                "pages.reading_content_selector",
                &config.pages.reading_content_selector,
            )?,
            image: parse_selector("pages.image_selector", &config.pages.image_selector)?,
            protector: parse_selector("pages.protector_selector", &config.pages.protector_selector)?,
            script: Selector::parse("script").unwrap(),
            anchor: Selector::parse("a").unwrap(),
            shortlink: Selector::parse("link[rel=shortlink]").unwrap(),
            img: Selector::parse("img").unwrap(),
        })
    }
}

fn parse_selector(key: &str, selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector {
        key: key.to_string(),
        selector: selector.to_string(),
    })
}

/// Regexes derived from configurable script-variable names.
pub(crate) struct Patterns {
    pub preloaded: Regex,
    pub quoted: Regex,
}

impl Patterns {
    fn compile(config: &SiteConfig) -> Result<Self, ConfigError> {
        let preloaded_var = regex::escape(&config.pages.preloaded_var);
        let quoted_var = regex::escape(&config.pages.quoted_var);
        Ok(Self {
            preloaded: Regex::new(&format!(r"{preloaded_var}\s*=\s*(\[[^\]]*\])"))
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            quoted: Regex::new(&format!(r#"{quoted_var}\s*=\s*'(\[.*?\])'"#))
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
        })
    }
}

/// The content-extraction engine for one configured site.
///
/// Construction compiles every selector and pattern once; afterwards
/// the engine is read-only and safe to share across concurrent
/// operations. Each call owns its document tree; nothing is cached
/// between calls.
pub struct Engine {
    config: SiteConfig,
    profile: HeaderProfile,
    vocab: DateVocabulary,
    selectors: Selectors,
    patterns: Patterns,
    fetcher: Box<dyn Fetcher>,
}

impl Engine {
    /// Creates an engine with a fresh header profile and an HTTP
    /// fetcher for the AJAX escalation.
    pub fn new(config: SiteConfig) -> crate::error::Result<Self> {
        let profile = HeaderProfile::new();
        let fetcher = HttpFetcher::new(&profile, &config)?;
        Ok(Self::assemble(config, profile, Box::new(fetcher))?)
    }

    /// Creates an engine with a caller-supplied fetcher.
    pub fn with_fetcher(
        config: SiteConfig,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self, ConfigError> {
        Self::assemble(config, HeaderProfile::new(), fetcher)
    }

    fn assemble(
        config: SiteConfig,
        profile: HeaderProfile,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let selectors = Selectors::compile(&config)?;
        let patterns = Patterns::compile(&config)?;
        let vocab = DateVocabulary::for_locale(&config.dates.locale);
        Ok(Self {
            config,
            profile,
            vocab,
            selectors,
            patterns,
            fetcher,
        })
    }

    /// The site configuration this engine was built with.
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Header set for requests the caller issues itself (the initial
    /// page fetches). Stable for the engine's lifetime.
    pub fn header_map(&self) -> HeaderMap {
        self.profile.header_map(&self.config)
    }

    pub(crate) fn vocab(&self) -> &DateVocabulary {
        &self.vocab
    }

    pub(crate) fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    pub(crate) fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    pub(crate) fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }
}

/// Normalizes a recovered URL to absolute form.
pub(crate) fn absolutize(base: &str, url: &str) -> String {
    let url = url.trim();
    let base = base.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if url.starts_with('/') {
        format!("{base}{url}")
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{base}/{url}")
    }
}

/// Normalizes a link to site-root-relative form with a leading slash.
pub(crate) fn to_relative(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//") {
        let candidate = if let Some(rest) = url.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            url.to_string()
        };
        if let Ok(parsed) = Url::parse(&candidate) {
            let mut relative = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                relative.push('?');
                relative.push_str(query);
            }
            if relative.is_empty() {
                relative.push('/');
            }
            return relative;
        }
    }
    if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize() {
        let base = "https://example-scans.com";
        assert_eq!(
            absolutize(base, "//cdn.example.org/a.jpg"),
            "https://cdn.example.org/a.jpg"
        );
        assert_eq!(
            absolutize(base, "/uploads/a.jpg"),
            "https://example-scans.com/uploads/a.jpg"
        );
        assert_eq!(
            absolutize(base, "https://other.org/a.jpg"),
            "https://other.org/a.jpg"
        );
        assert_eq!(
            absolutize(base, "uploads/a.jpg"),
            "https://example-scans.com/uploads/a.jpg"
        );
        assert_eq!(
            absolutize(&format!("{base}/"), " /uploads/a.jpg "),
            "https://example-scans.com/uploads/a.jpg"
        );
    }

    #[test]
    fn test_to_relative() {
        assert_eq!(
            to_relative("https://example-scans.com/manga/solo-hero/"),
            "/manga/solo-hero/"
        );
        assert_eq!(
            to_relative("https://example-scans.com/?p=123"),
            "/?p=123"
        );
        assert_eq!(to_relative("/manga/solo-hero/"), "/manga/solo-hero/");
        assert_eq!(to_relative("manga/solo-hero/"), "/manga/solo-hero/");
        assert_eq!(to_relative("https://example-scans.com"), "/");
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let mut config = SiteConfig::for_site("https://example-scans.com");
        config.listing.card_selector = "div[".to_string();
        let err = Engine::with_fetcher(config, Box::new(test_support::CannedFetcher::empty()))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidSelector { .. }));
    }
}
