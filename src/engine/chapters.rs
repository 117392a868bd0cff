//! Chapter discovery protocol.
//!
//! Discovery escalates through a small state machine: parse the
//! already-fetched document first, then fall back to the site's AJAX
//! endpoint keyed by a numeric manga id, then to the chapter-list
//! suffix endpoint. Later states depend on what earlier states found,
//! so the round trips are sequential by design. Partial results are
//! always unioned, never discarded.

use super::{Chapter, Engine, AjaxRequest, to_relative};
use crate::dates::parse_chapter_date;
use crate::error::ExtractError;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

/// `manga_id` assignment inside an inline script.
static MANGA_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"manga_id\s*=\s*"?(\d+)"#).unwrap());

/// Post id in a shortlink href, `?p=1234`.
static SHORTLINK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]p=(\d+)").unwrap());

/// Chapter number following a chapter word in a display name.
static NAME_INDEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:chapter|ch\.?|cap(?:[ií]tulo)?)\s*(\d+(?:\.\d+)?)").unwrap());

/// First bare number in a display name.
static NUMBER_INDEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap());

/// Chapter number in a URL segment; `chapter-10-5` reads as 10.5.
static URL_INDEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)chapter[-_/](\d+(?:[.-]\d+)?)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscoveryState {
    Direct,
    AjaxById,
    AjaxBySuffix,
    Done,
    Failed,
}

/// What the initially-fetched document yielded.
struct DirectScan {
    chapters: Vec<Chapter>,
    manga_id: Option<String>,
    needs_async: bool,
    login_walled: bool,
}

impl Engine {
    /// Discovers the chapter list for the catalog item whose page is
    /// `html`, fetched from `page_url`. Returns chapters deduplicated
    /// by relative URL and sorted ascending by numeric index.
    pub async fn chapter_list(
        &self,
        html: &str,
        page_url: &str,
    ) -> Result<Vec<Chapter>, ExtractError> {
        let mut chapters = Vec::new();
        let mut manga_id = None;
        let mut state = DiscoveryState::Direct;

        loop {
            state = match state {
                DiscoveryState::Direct => {
                    let scan = self.scan_direct(html);
                    if scan.login_walled {
                        return Err(ExtractError::LoginRequired(page_url.to_string()));
                    }
                    chapters = scan.chapters;
                    manga_id = scan.manga_id;
                    if !chapters.is_empty() && !scan.needs_async {
                        DiscoveryState::Done
                    } else if self.config().chapters.use_ajax {
                        log::debug!(
                            "escalating to AJAX for {page_url} ({} direct chapters)",
                            chapters.len()
                        );
                        DiscoveryState::AjaxById
                    } else if chapters.is_empty() {
                        DiscoveryState::Failed
                    } else {
                        DiscoveryState::Done
                    }
                }
                DiscoveryState::AjaxById => match manga_id.as_deref() {
                    Some(id) => {
                        let found = self.fetch_chapters_by_id(id).await?;
                        let got_any = !found.is_empty();
                        chapters.extend(found);
                        if got_any {
                            DiscoveryState::Done
                        } else {
                            DiscoveryState::AjaxBySuffix
                        }
                    }
                    None => DiscoveryState::AjaxBySuffix,
                },
                DiscoveryState::AjaxBySuffix => {
                    let found = self.fetch_chapters_by_suffix(page_url).await?;
                    chapters.extend(found);
                    if chapters.is_empty() {
                        DiscoveryState::Failed
                    } else {
                        DiscoveryState::Done
                    }
                }
                DiscoveryState::Done => {
                    return Ok(finalize_chapters(chapters));
                }
                DiscoveryState::Failed => {
                    log::warn!("no chapters found for {page_url} after all fallbacks");
                    return Err(ExtractError::NoChaptersFound(page_url.to_string()));
                }
            };
        }
    }

    /// Parses the already-fetched document without touching the wire.
    fn scan_direct(&self, html: &str) -> DirectScan {
        let doc = Html::parse_document(html);
        let selectors = self.selectors();

        let login_walled = doc.select(&selectors.login_marker).next().is_some();

        let chapters: Vec<Chapter> = doc
            .select(&selectors.chapter_item)
            .filter_map(|item| self.chapter_from_item(item))
            .collect();

        let holder = doc.select(&selectors.id_holder).next();
        let needs_async = holder.is_some();

        // Three id sources, tried in order: holder attribute, script
        // variable, shortlink post id.
        let mut manga_id = holder
            .and_then(|el| el.value().attr(&self.config().chapters.id_attribute))
            .map(|s| s.to_string());
        if manga_id.is_none() {
            manga_id = doc.select(&selectors.script).find_map(|script| {
                let text: String = script.text().collect();
                MANGA_ID_REGEX
                    .captures(&text)
                    .map(|cap| cap[1].to_string())
            });
        }
        if manga_id.is_none() {
            manga_id = doc
                .select(&selectors.shortlink)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| SHORTLINK_ID_REGEX.captures(href))
                .map(|cap| cap[1].to_string());
        }

        DirectScan {
            chapters,
            manga_id,
            needs_async,
            login_walled,
        }
    }

    async fn fetch_chapters_by_id(&self, id: &str) -> Result<Vec<Chapter>, ExtractError> {
        let chapters_cfg = &self.config().chapters;
        let url = format!("{}{}", self.config().site_root(), chapters_cfg.ajax_endpoint);
        let body = self
            .fetcher()
            .fetch(AjaxRequest {
                url: url.clone(),
                method: chapters_cfg.ajax_method,
                form: vec![
                    ("action".to_string(), chapters_cfg.ajax_action.clone()),
                    ("manga".to_string(), id.to_string()),
                ],
            })
            .await?;
        let fragment = unwrap_ajax_body(&url, body)?;
        Ok(self.chapters_from_fragment(&fragment))
    }

    async fn fetch_chapters_by_suffix(&self, page_url: &str) -> Result<Vec<Chapter>, ExtractError> {
        let url = format!(
            "{}/{}",
            page_url.trim_end_matches('/'),
            self.config().chapters.chapter_suffix
        );
        let body = self
            .fetcher()
            .fetch(AjaxRequest {
                url: url.clone(),
                method: crate::config::AjaxMethod::Post,
                form: Vec::new(),
            })
            .await?;
        let fragment = unwrap_ajax_body(&url, body)?;
        Ok(self.chapters_from_fragment(&fragment))
    }

    /// Parses an AJAX response fragment. Falls back to bare anchors
    /// when the fragment does not use the configured item structure.
    fn chapters_from_fragment(&self, fragment: &str) -> Vec<Chapter> {
        let doc = Html::parse_fragment(fragment);
        let selectors = self.selectors();

        let chapters: Vec<Chapter> = doc
            .select(&selectors.chapter_item)
            .filter_map(|item| self.chapter_from_item(item))
            .collect();
        if !chapters.is_empty() {
            return chapters;
        }

        let anchors: Vec<Chapter> = doc
            .select(&selectors.anchor)
            .filter_map(|a| self.chapter_from_anchor(a))
            .collect();
        if !anchors.is_empty() {
            log::debug!(
                "fragment fell back to bare anchors, {} found",
                anchors.len()
            );
        }
        anchors
    }

    fn chapter_from_item(&self, item: ElementRef<'_>) -> Option<Chapter> {
        let link = item.select(&self.selectors().chapter_link).next()?;
        let date_text = item
            .select(&self.selectors().chapter_date)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        self.build_chapter(link, &date_text)
    }

    fn chapter_from_anchor(&self, anchor: ElementRef<'_>) -> Option<Chapter> {
        self.build_chapter(anchor, "")
    }

    fn build_chapter(&self, link: ElementRef<'_>, date_text: &str) -> Option<Chapter> {
        let href = link
            .value()
            .attr("href")
            .or_else(|| link.value().attr("data-href"))?
            .trim();
        if href.is_empty() || href == "#" {
            return None;
        }

        let relative_url = to_relative(href);
        let text = link.text().collect::<String>().trim().to_string();
        let display_name = if text.is_empty() || text == "#" {
            derive_display_name(&relative_url)
        } else {
            text
        };
        let numeric_index = numeric_index(&display_name, &relative_url);
        let uploaded_at_millis =
            parse_chapter_date(date_text, &self.config().dates.format, self.vocab());

        Some(Chapter {
            relative_url,
            display_name,
            numeric_index,
            uploaded_at_millis,
        })
    }
}

/// Unwraps an AJAX body into an HTML fragment. Some deployments wrap
/// the fragment in a `{success, data}` JSON envelope.
fn unwrap_ajax_body(url: &str, body: String) -> Result<String, ExtractError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::MalformedResponse {
            url: url.to_string(),
            message: "empty body".to_string(),
        });
    }
    if trimmed.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| ExtractError::MalformedResponse {
                url: url.to_string(),
                message: format!("invalid JSON envelope: {e}"),
            })?;
        return value
            .get("data")
            .and_then(|d| d.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ExtractError::MalformedResponse {
                url: url.to_string(),
                message: "JSON envelope without a data field".to_string(),
            });
    }
    Ok(body)
}

/// Deduplicates by relative URL (first occurrence wins) and sorts
/// ascending by numeric index, missing indexes first.
fn finalize_chapters(mut chapters: Vec<Chapter>) -> Vec<Chapter> {
    let mut seen = HashSet::new();
    chapters.retain(|c| seen.insert(c.relative_url.clone()));
    chapters.sort_by(|a, b| match (a.numeric_index, b.numeric_index) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    });
    chapters
}

fn derive_display_name(relative_url: &str) -> String {
    if let Some(cap) = URL_INDEX_REGEX.captures(relative_url) {
        format!("Chapter {}", cap[1].replace('-', "."))
    } else {
        relative_url.to_string()
    }
}

fn numeric_index(display_name: &str, relative_url: &str) -> Option<f32> {
    if let Some(cap) = NAME_INDEX_REGEX.captures(display_name) {
        return cap[1].parse().ok();
    }
    if let Some(cap) = NUMBER_INDEX_REGEX.captures(display_name) {
        return cap[1].parse().ok();
    }
    URL_INDEX_REGEX
        .captures(relative_url)
        .and_then(|cap| cap[1].replace('-', ".").parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AjaxMethod, SiteConfig};
    use crate::engine::Engine;
    use crate::engine::test_support::{CannedFetcher, test_engine};
    use chrono::{TimeZone, Utc};

    const AJAX_URL: &str = "https://example-scans.com/wp-admin/admin-ajax.php";

    fn item(href: &str, name: &str, date: &str) -> String {
        let date_span = if date.is_empty() {
            String::new()
        } else {
            format!("<span class=\"chapter-release-date\"><i>{date}</i></span>")
        };
        format!("<li class=\"wp-manga-chapter\"><a href=\"{href}\">{name}</a>{date_span}</li>")
    }

    fn doc(body: &str) -> String {
        format!("<html><body>{body}</body></html>")
    }

    #[tokio::test]
    async fn test_direct_only() {
        let engine = test_engine(CannedFetcher::empty());
        let html = doc(&format!(
            "<ul>{}{}</ul>",
            item(
                "https://example-scans.com/manga/solo-hero/chapter-2/",
                "Chapter 2",
                "January 3rd, 2024"
            ),
            item("/manga/solo-hero/chapter-1/", "Chapter 1", "")
        ));

        let chapters = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].relative_url, "/manga/solo-hero/chapter-1/");
        assert_eq!(chapters[0].numeric_index, Some(1.0));
        assert_eq!(chapters[0].uploaded_at_millis, 0);
        assert_eq!(chapters[1].display_name, "Chapter 2");
        assert_eq!(
            chapters[1].uploaded_at_millis,
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0)
                .unwrap()
                .timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_async_marker_unions_with_direct() {
        // DIRECT finds {a, b}; AJAX returns {b, c}; result is {a, b, c}.
        let fragment = format!(
            "{}{}",
            item("/manga/solo-hero/chapter-2/", "Chapter 2", ""),
            item("/manga/solo-hero/chapter-3/", "Chapter 3", "")
        );
        let fetcher = CannedFetcher::new(vec![(AJAX_URL, fragment.as_str())]);
        let engine = test_engine(fetcher.clone());
        let html = doc(&format!(
            "<div id=\"manga-chapters-holder\" data-id=\"1234\"></div><ul>{}{}</ul>",
            item("/manga/solo-hero/chapter-1/", "Chapter 1", ""),
            item("/manga/solo-hero/chapter-2/", "Chapter 2", "")
        ));

        let chapters = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        let urls: Vec<&str> = chapters.iter().map(|c| c.relative_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "/manga/solo-hero/chapter-1/",
                "/manga/solo-hero/chapter-2/",
                "/manga/solo-hero/chapter-3/"
            ]
        );

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, AjaxMethod::Post);
        assert!(
            requests[0]
                .form
                .contains(&("action".to_string(), "manga_get_chapters".to_string()))
        );
        assert!(
            requests[0]
                .form
                .contains(&("manga".to_string(), "1234".to_string()))
        );
    }

    #[tokio::test]
    async fn test_id_from_script_variable() {
        let fragment = item("/manga/solo-hero/chapter-1/", "Chapter 1", "");
        let fetcher = CannedFetcher::new(vec![(AJAX_URL, fragment.as_str())]);
        let engine = test_engine(fetcher.clone());
        let html = doc("<script>var manga_id = 42;</script>");

        let chapters = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        assert_eq!(chapters.len(), 1);
        assert!(
            fetcher.requests()[0]
                .form
                .contains(&("manga".to_string(), "42".to_string()))
        );
    }

    #[tokio::test]
    async fn test_id_from_shortlink() {
        let fragment = item("/manga/solo-hero/chapter-1/", "Chapter 1", "");
        let fetcher = CannedFetcher::new(vec![(AJAX_URL, fragment.as_str())]);
        let engine = test_engine(fetcher.clone());
        let html = doc("<link rel=\"shortlink\" href=\"https://example-scans.com/?p=777\">");

        engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        assert!(
            fetcher.requests()[0]
                .form
                .contains(&("manga".to_string(), "777".to_string()))
        );
    }

    #[tokio::test]
    async fn test_suffix_fallback_when_no_id() {
        let suffix_url = "https://example-scans.com/manga/solo-hero/ajax/chapters/";
        let fragment = item("/manga/solo-hero/chapter-1/", "Chapter 1", "");
        let fetcher = CannedFetcher::new(vec![(suffix_url, fragment.as_str())]);
        let engine = test_engine(fetcher.clone());

        let chapters = engine
            .chapter_list(
                &doc("<p>nothing here</p>"),
                "https://example-scans.com/manga/solo-hero/",
            )
            .await
            .unwrap();

        assert_eq!(chapters.len(), 1);
        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, suffix_url);
        assert!(requests[0].form.is_empty());
    }

    #[tokio::test]
    async fn test_suffix_fallback_when_id_yields_nothing() {
        let suffix_url = "https://example-scans.com/manga/solo-hero/ajax/chapters/";
        let fragment = item("/manga/solo-hero/chapter-1/", "Chapter 1", "");
        let fetcher = CannedFetcher::new(vec![
            (AJAX_URL, "<div></div>"),
            (suffix_url, fragment.as_str()),
        ]);
        let engine = test_engine(fetcher.clone());
        let html = doc("<div id=\"manga-chapters-holder\" data-id=\"9\"></div>");

        let chapters = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        assert_eq!(chapters.len(), 1);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_all_states_empty_is_failure() {
        let suffix_url = "https://example-scans.com/manga/solo-hero/ajax/chapters/";
        let engine = test_engine(CannedFetcher::new(vec![(suffix_url, "<div></div>")]));

        let err = engine
            .chapter_list(
                &doc("<p>nothing</p>"),
                "https://example-scans.com/manga/solo-hero/",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::NoChaptersFound(_)));
    }

    #[tokio::test]
    async fn test_no_ajax_config_fails_without_escalating() {
        let mut config = SiteConfig::for_site("https://example-scans.com");
        config.chapters.use_ajax = false;
        let engine =
            Engine::with_fetcher(config, Box::new(CannedFetcher::empty())).unwrap();

        let err = engine
            .chapter_list(
                &doc("<p>nothing</p>"),
                "https://example-scans.com/manga/solo-hero/",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::NoChaptersFound(_)));
    }

    #[tokio::test]
    async fn test_login_wall() {
        let engine = test_engine(CannedFetcher::empty());
        let html = doc("<div class=\"login-required\">Please sign in</div>");

        let err = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::LoginRequired(_)));
    }

    #[tokio::test]
    async fn test_json_enveloped_ajax_body() {
        let envelope = serde_json::json!({
            "success": true,
            "data": item("/manga/solo-hero/chapter-5/", "Chapter 5", ""),
        })
        .to_string();
        let engine = test_engine(CannedFetcher::new(vec![(AJAX_URL, envelope.as_str())]));
        let html = doc("<div id=\"manga-chapters-holder\" data-id=\"3\"></div>");

        let chapters = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap();

        assert_eq!(chapters[0].relative_url, "/manga/solo-hero/chapter-5/");
    }

    #[tokio::test]
    async fn test_blank_ajax_body_is_malformed() {
        let engine = test_engine(CannedFetcher::new(vec![(AJAX_URL, "  ")]));
        let html = doc("<div id=\"manga-chapters-holder\" data-id=\"3\"></div>");

        let err = engine
            .chapter_list(&html, "https://example-scans.com/manga/solo-hero/")
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::MalformedResponse { .. }));
    }

    #[test]
    fn test_numeric_index_extraction() {
        assert_eq!(numeric_index("Chapter 10.5", "/x/"), Some(10.5));
        assert_eq!(numeric_index("Ch.7", "/x/"), Some(7.0));
        assert_eq!(numeric_index("Episode 3", "/x/"), Some(3.0));
        assert_eq!(
            numeric_index("Finale", "/manga/x/chapter-22-5/"),
            Some(22.5)
        );
        assert_eq!(numeric_index("Prologue", "/manga/x/extra/"), None);
    }

    #[test]
    fn test_finalize_sorts_missing_index_first() {
        let chapter = |url: &str, idx: Option<f32>| Chapter {
            relative_url: url.to_string(),
            display_name: url.to_string(),
            numeric_index: idx,
            uploaded_at_millis: 0,
        };
        let out = finalize_chapters(vec![
            chapter("/c/2/", Some(2.0)),
            chapter("/c/extra/", None),
            chapter("/c/1/", Some(1.0)),
            chapter("/c/2/", Some(2.0)),
        ]);
        let urls: Vec<&str> = out.iter().map(|c| c.relative_url.as_str()).collect();
        assert_eq!(urls, vec!["/c/extra/", "/c/1/", "/c/2/"]);
    }
}
