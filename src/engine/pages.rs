//! Page-source resolution.
//!
//! A chapter's image list can be embedded five different ways. The
//! strategies run in strict priority order and the first non-empty
//! result wins; no strategy mixes its output with another. A protector
//! element is special: once present, resolution is committed to
//! decryption, because sites that protect chapters do not also embed
//! the plain forms.

use super::{Engine, Page, absolutize};
use crate::cipher;
use crate::error::{CipherError, ExtractError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Deserialize;
use std::sync::LazyLock;

/// Base64 argument of an `atob(..)` call.
static ATOB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"atob\s*\(\s*["']([A-Za-z0-9+/=\s]+)["']\s*\)"#).unwrap());

/// Image attributes in preference order; deferred-loading attributes
/// win over the primary source.
const IMAGE_ATTRS: [&str; 3] = ["data-src", "data-lazy-src", "src"];

/// Protector payload as the site embeds it: base64 ciphertext plus
/// hex salt. Exists only during resolution.
#[derive(Debug, Deserialize)]
struct CipherBlob {
    ct: String,
    s: String,
}

impl Engine {
    /// Resolves the ordered page-image list of the chapter document
    /// `html`. Fails with [`ExtractError::NoPagesFound`] when every
    /// strategy yields nothing.
    pub fn page_list(&self, html: &str) -> Result<Vec<Page>, ExtractError> {
        let doc = Html::parse_document(html);
        let selectors = self.selectors();

        if doc.select(&selectors.login_marker).next().is_some() {
            return Err(ExtractError::LoginRequired(self.config().base_url.clone()));
        }

        if let Some(protector) = doc.select(&selectors.protector).next() {
            log::debug!("resolving pages from protector blob");
            let urls = self.resolve_protector(protector)?;
            return self.build_pages(urls);
        }

        let scripts: Vec<String> = doc
            .select(&selectors.script)
            .map(|s| s.text().collect())
            .collect();

        if let Some(urls) = self.preloaded_array(&scripts) {
            log::debug!("resolving pages from preloaded script array");
            return self.build_pages(urls);
        }
        if let Some(urls) = atob_array(&scripts) {
            log::debug!("resolving pages from base64 script array");
            return self.build_pages(urls);
        }
        if let Some(urls) = self.quoted_array(&scripts) {
            log::debug!("resolving pages from quoted script array");
            return self.build_pages(urls);
        }
        if let Some(urls) = self.markup_images(&doc) {
            return self.build_pages(urls);
        }

        Err(ExtractError::NoPagesFound)
    }

    fn build_pages(&self, urls: Vec<String>) -> Result<Vec<Page>, ExtractError> {
        let base = self.config().site_root();
        let pages: Vec<Page> = urls
            .iter()
            .map(|url| absolutize(base, url))
            .enumerate()
            .map(|(index, image_url)| Page { index, image_url })
            .collect();
        if pages.is_empty() {
            return Err(ExtractError::NoPagesFound);
        }
        Ok(pages)
    }

    /// Strategy 1: password-encrypted protector blob.
    fn resolve_protector(&self, el: ElementRef<'_>) -> Result<Vec<String>, ExtractError> {
        let pages_cfg = &self.config().pages;
        let source = protector_source(el)?;

        let password = extract_between(&source, &pages_cfg.protector_password_marker, "'")
            .ok_or_else(|| {
                CipherError::MalformedBlob("protector password marker not found".to_string())
            })?;
        let payload =
            extract_between(&source, &pages_cfg.protector_data_marker, "'").ok_or_else(|| {
                CipherError::MalformedBlob("protector data marker not found".to_string())
            })?;
        let blob: CipherBlob = serde_json::from_str(payload)
            .map_err(|e| CipherError::MalformedBlob(format!("protector payload: {e}")))?;

        let plaintext = cipher::decrypt_with_salt(&blob.ct, &blob.s, password)?;
        Ok(split_protected_list(&plaintext))
    }

    /// Strategy 2: plain JSON array assigned to a script variable.
    fn preloaded_array(&self, scripts: &[String]) -> Option<Vec<String>> {
        scripts.iter().find_map(|script| {
            let cap = self.patterns().preloaded.captures(script)?;
            parse_url_array(&cap[1])
        })
    }

    /// Strategy 4: quoted, escaped JSON array assigned to a variable.
    fn quoted_array(&self, scripts: &[String]) -> Option<Vec<String>> {
        scripts.iter().find_map(|script| {
            let cap = self.patterns().quoted.captures(script)?;
            let unescaped = cap[1].replace("\\\"", "\"").replace("\\/", "/");
            parse_url_array(&unescaped)
        })
    }

    /// Strategy 5: image elements in the reading container.
    fn markup_images(&self, doc: &Html) -> Option<Vec<String>> {
        let selectors = self.selectors();
        let container = doc.select(&selectors.reading_content).next()?;
        let urls: Vec<String> = container
            .select(&selectors.image)
            .filter_map(|img| {
                IMAGE_ATTRS
                    .iter()
                    .find_map(|attr| img.value().attr(attr))
                    .map(str::trim)
                    .filter(|src| !src.is_empty())
                    .map(str::to_string)
            })
            .collect();
        if urls.is_empty() { None } else { Some(urls) }
    }
}

/// Strategy 3: base64 argument of an `atob(..)` decode call.
fn atob_array(scripts: &[String]) -> Option<Vec<String>> {
    scripts.iter().find_map(|script| {
        let cap = ATOB_REGEX.captures(script)?;
        let compact: String = cap[1].split_whitespace().collect();
        let bytes = BASE64.decode(compact).ok()?;
        let decoded = String::from_utf8(bytes).ok()?;
        parse_url_array(&decoded)
    })
}

/// Reads the protector element's script, decoding a base64 `src` when
/// present and falling back to the inline content.
fn protector_source(el: ElementRef<'_>) -> Result<String, CipherError> {
    if let Some(src) = el.value().attr("src")
        && let Some((_, b64)) = src.split_once("base64,")
    {
        let bytes = BASE64.decode(b64.trim())?;
        return Ok(String::from_utf8(bytes)?);
    }
    Ok(el.text().collect())
}

fn extract_between<'a>(haystack: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let after = &haystack[haystack.find(start)? + start.len()..];
    Some(&after[..after.find(end)?])
}

/// The decrypted protector payload is a JSON-like array string; strip
/// the structural characters and split on commas.
fn split_protected_list(plaintext: &str) -> Vec<String> {
    plaintext
        .replace(['[', ']', '"', '\\'], "")
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_url_array(raw: &str) -> Option<Vec<String>> {
    let urls: Vec<String> = serde_json::from_str(raw).ok()?;
    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() { None } else { Some(urls) }
}
