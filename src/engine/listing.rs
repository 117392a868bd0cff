//! Catalog listing extraction.
//!
//! Popular, latest and search results all render the same repeated
//! card markup; one extractor covers the three flows. Cards missing a
//! link are skipped rather than failing the whole page.

use super::{CatalogEntry, Engine, Listing, absolutize, to_relative};
use crate::error::ExtractError;
use scraper::{ElementRef, Html};

/// Thumbnail attributes in preference order.
const THUMB_ATTRS: [&str; 4] = ["src", "data-src", "data-lazy-src", "data-cfsrc"];

impl Engine {
    /// Maps a listing document's card elements into catalog entries,
    /// in document order, plus whether a further page exists.
    pub fn parse_listing(&self, html: &str) -> Result<Listing, ExtractError> {
        let doc = Html::parse_document(html);
        let selectors = self.selectors();

        if doc.select(&selectors.login_marker).next().is_some() {
            return Err(ExtractError::LoginRequired(self.config().base_url.clone()));
        }

        let mut entries = Vec::new();
        for card in doc.select(&selectors.card) {
            let Some(link) = card.select(&selectors.card_link).next() else {
                log::debug!("skipping card without a link");
                continue;
            };
            let Some(href) = link.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() {
                continue;
            }

            let Some(title) = self.card_title(card, link) else {
                continue;
            };

            entries.push(CatalogEntry {
                relative_url: to_relative(href),
                title,
                thumbnail_url: self.card_thumbnail(card),
            });
        }

        let has_next_page = self.has_next_page(&doc, &entries);
        Ok(Listing {
            entries,
            has_next_page,
        })
    }

    /// First non-blank of the configured title candidates, then the
    /// link's `title` attribute, then the link text.
    fn card_title(&self, card: ElementRef<'_>, link: ElementRef<'_>) -> Option<String> {
        for selector in &self.selectors().card_titles {
            if let Some(el) = card.select(selector).next() {
                let text = el.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        let attr_title = link
            .value()
            .attr("title")
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(title) = attr_title {
            return Some(title.to_string());
        }
        let text = link.text().collect::<String>().trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }

    /// First non-blank of `src`/deferred attributes, then the first
    /// `srcset` candidate.
    fn card_thumbnail(&self, card: ElementRef<'_>) -> Option<String> {
        let img = card.select(&self.selectors().img).next()?;
        let url = THUMB_ATTRS
            .iter()
            .find_map(|attr| img.value().attr(attr))
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .or_else(|| first_srcset_candidate(img.value().attr("srcset")?))?;
        Some(absolutize(self.config().site_root(), &url))
    }

    fn has_next_page(&self, doc: &Html, entries: &[CatalogEntry]) -> bool {
        if let Some(control) = doc.select(&self.selectors().next_page).next() {
            let disabled = control.value().classes().any(|c| c == "disabled")
                || control.value().attr("disabled").is_some();
            return !disabled;
        }
        self.config().listing.next_page_fallback && !entries.is_empty()
    }
}

fn first_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()?
        .split_whitespace()
        .next()
        .map(str::to_string)
}
