//! Per-site configuration for the extraction engine.
//!
//! A Madara-family site is described by a plain configuration record:
//! selectors, endpoint paths, date patterns and locale tables. Site
//! quirks are optional fields with defaults matching the stock
//! WP-Manga theme, so most sites only need to set `base_url`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP method used for the chapter AJAX escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AjaxMethod {
    Post,
    Get,
}

/// Main per-site configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site root, e.g. `https://example-scans.com`. No trailing slash.
    pub base_url: String,

    /// Header name the per-session random token is bound to.
    pub token_header: String,

    /// Selector whose presence means the content is behind a login wall.
    pub login_marker_selector: String,

    /// Catalog listing settings.
    pub listing: ListingConfig,

    /// Chapter discovery settings.
    pub chapters: ChapterConfig,

    /// Page-source resolution settings.
    pub pages: PageConfig,

    /// Upload-date parsing settings.
    pub dates: DateConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_header: "X-Client-ID".to_string(),
            login_marker_selector: ".login-required, .content-blocked".to_string(),
            listing: ListingConfig::default(),
            chapters: ChapterConfig::default(),
            pages: PageConfig::default(),
            dates: DateConfig::default(),
        }
    }
}

/// Catalog listing (popular/latest/search) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Repeated card element, one per catalog entry.
    pub card_selector: String,

    /// Primary link inside a card. Cards without one are skipped.
    pub link_selector: String,

    /// Title candidates, tried in order; first non-blank wins.
    pub title_selectors: Vec<String>,

    /// "Next page" control.
    pub next_page_selector: String,

    /// When true, a non-empty entry list counts as having a next page
    /// even without a next control (for sites that hide it).
    pub next_page_fallback: bool,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            card_selector: "div.page-item-detail".to_string(),
            link_selector: "a".to_string(),
            title_selectors: vec![
                "h3 a".to_string(),
                "h5 a".to_string(),
                ".post-title a".to_string(),
            ],
            next_page_selector: "a.nextpostslink, div.nav-previous a, a.next.page-numbers"
                .to_string(),
            next_page_fallback: false,
        }
    }
}

/// Chapter discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterConfig {
    /// One element per chapter in the list.
    pub item_selector: String,

    /// Link inside a chapter item.
    pub link_selector: String,

    /// Release-date element inside a chapter item.
    pub date_selector: String,

    /// Element whose presence means the list is loaded asynchronously.
    /// Doubles as the first source of the numeric manga id.
    pub id_holder_selector: String,

    /// Attribute on the holder carrying the manga id.
    pub id_attribute: String,

    /// AJAX endpoint path, relative to the site root.
    pub ajax_endpoint: String,

    /// `action` form field sent to the AJAX endpoint.
    pub ajax_action: String,

    /// Method for the id-based AJAX request.
    pub ajax_method: AjaxMethod,

    /// Suffix appended to the chapter-list page URL for the second
    /// AJAX fallback, e.g. `ajax/chapters/`.
    pub chapter_suffix: String,

    /// Whether the site uses the AJAX escalation at all.
    pub use_ajax: bool,
}

impl Default for ChapterConfig {
    fn default() -> Self {
        Self {
            item_selector: "li.wp-manga-chapter".to_string(),
            link_selector: "a".to_string(),
            date_selector: "span.chapter-release-date".to_string(),
            id_holder_selector: "div#manga-chapters-holder".to_string(),
            id_attribute: "data-id".to_string(),
            ajax_endpoint: "/wp-admin/admin-ajax.php".to_string(),
            ajax_action: "manga_get_chapters".to_string(),
            ajax_method: AjaxMethod::Post,
            chapter_suffix: "ajax/chapters/".to_string(),
            use_ajax: true,
        }
    }
}

/// Page-source resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Container holding the chapter's image elements.
    pub reading_content_selector: String,

    /// Image elements inside the reading container.
    pub image_selector: String,

    /// Encrypted-protector element.
    pub protector_selector: String,

    /// Marker preceding the protector password token.
    pub protector_password_marker: String,

    /// Marker preceding the protector ciphertext JSON.
    pub protector_data_marker: String,

    /// Script variable assigned a plain JSON array of image URLs.
    pub preloaded_var: String,

    /// Script variable assigned a quoted, escaped JSON array.
    pub quoted_var: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            reading_content_selector: "div.reading-content".to_string(),
            image_selector: "img".to_string(),
            protector_selector: "#chapter-protector-data".to_string(),
            protector_password_marker: "wpmangaprotectornonce='".to_string(),
            protector_data_marker: "chapter_data='".to_string(),
            preloaded_var: "chapter_preloaded_images".to_string(),
            quoted_var: "chapter_data".to_string(),
        }
    }
}

/// Upload-date parsing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DateConfig {
    /// `chrono` format pattern for absolute dates, e.g. `%B %d, %Y`.
    pub format: String,

    /// Locale code for the relative-date word tables (`en`, `id`).
    pub locale: String,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            format: "%B %d, %Y".to_string(),
            locale: "en".to_string(),
        }
    }
}

impl SiteConfig {
    /// Creates a configuration for a site at the given root URL, with
    /// stock WP-Manga defaults for everything else.
    pub fn for_site(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingValue("base_url".to_string()));
        }
        if !self.base_url.starts_with("http") {
            return Err(ConfigError::Parse(format!(
                "base_url must be absolute, got '{}'",
                self.base_url
            )));
        }
        if self.dates.format.is_empty() {
            return Err(ConfigError::MissingValue("dates.format".to_string()));
        }
        Ok(())
    }

    /// Site root without a trailing slash.
    pub fn site_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
