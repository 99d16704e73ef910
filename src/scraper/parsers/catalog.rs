//! Region map discovery from a directory's catalog page.

use crate::config::{RegionConfig, ShapeSelection};
use crate::error::ExtractionError;
use crate::scraper::Page;
use regex::Regex;
use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use super::{element_text, selector};

const KRP_PAGES: [&str; 3] = ["311.html", "310.html", "305.html"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CatalogKind {
    /// Flat per-region tables, one page per size code.
    Kazdata,
    /// Paginated card listings, one URL per region.
    Statsnet,
}

impl CatalogKind {
    pub fn detect(url: &str) -> Self {
        if url.contains("statsnet") {
            CatalogKind::Statsnet
        } else {
            CatalogKind::Kazdata
        }
    }
}

/// Discover the ordered region map a catalog page links to.
pub fn discover_regions(page: &Page, kind: CatalogKind) -> Result<Vec<RegionConfig>, ExtractionError> {
    let origin = Url::parse(&page.url)
        .map_err(|e| ExtractionError::Selector(format!("catalog url {}: {e}", page.url)))?;

    let regions = match kind {
        CatalogKind::Kazdata => discover_kazdata(page, &origin)?,
        CatalogKind::Statsnet => discover_statsnet(page, &origin)?,
    };

    if regions.is_empty() {
        warn!("No region links found on {}", page.url);
    } else {
        info!("Discovered {} regions on {}", regions.len(), page.url);
    }
    Ok(regions)
}

fn push_url(regions: &mut Vec<RegionConfig>, key: &str, url: String, fresh: impl FnOnce() -> RegionConfig) {
    match regions.iter_mut().find(|r| r.key == key) {
        Some(region) => {
            if !region.urls.contains(&url) {
                region.urls.push(url);
            }
        }
        None => {
            let mut region = fresh();
            region.urls.push(url);
            regions.push(region);
        }
    }
}

// ── KazDATA ───────────────────────────────────────────────────────────────────

/// Size-code pages live under `/04/`; catalog links sometimes omit it.
fn kazdata_url(origin: &Url, href: &str) -> Option<String> {
    if href.starts_with("http") {
        let mut url = Url::parse(href).ok()?;
        if !url.path().contains("/04/") {
            let path = format!("/04{}", url.path());
            url.set_path(&path);
        }
        return Some(url.to_string());
    }

    let relative = href.trim_start_matches('/');
    let relative = if relative.starts_with("04/") {
        relative.to_string()
    } else {
        format!("04/{relative}")
    };
    origin.join(&format!("/{relative}")).ok().map(|u| u.to_string())
}

fn discover_kazdata(page: &Page, origin: &Url) -> Result<Vec<RegionConfig>, ExtractionError> {
    let doc = Html::parse_document(&page.html);
    let links = selector(r#"a[href*="kazakhstan"]"#)?;
    let region_re = Regex::new(r"kazakhstan-([a-z-]+)-\d{3}")
        .map_err(|e| ExtractionError::Selector(e.to_string()))?;

    let mut regions: Vec<RegionConfig> = Vec::new();
    for href in doc.select(&links).filter_map(|a| a.value().attr("href")) {
        if !KRP_PAGES.iter().any(|p| href.contains(p)) {
            continue;
        }
        let Some(key) = region_re.captures(href).and_then(|c| c.get(1)) else {
            debug!("No region key in {}", href);
            continue;
        };
        let Some(url) = kazdata_url(origin, href) else {
            debug!("Unusable link {}", href);
            continue;
        };

        push_url(&mut regions, key.as_str(), url, || RegionConfig {
            key: key.as_str().to_string(),
            urls: Vec::new(),
            paginate: false,
            shape: Some(ShapeSelection::Table),
        });
    }
    Ok(regions)
}

// ── statsnet ──────────────────────────────────────────────────────────────────

fn discover_statsnet(page: &Page, origin: &Url) -> Result<Vec<RegionConfig>, ExtractionError> {
    let doc = Html::parse_document(&page.html);
    let links = selector(r#"a[href^="/states/kz/"]"#)?;

    let mut regions: Vec<RegionConfig> = Vec::new();
    for a in doc.select(&links) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let path = href.trim_end_matches('/');
        let Some(key) = path.strip_prefix("/states/kz/").filter(|k| !k.is_empty()) else {
            continue;
        };
        let key = key.rsplit('/').next().unwrap_or(key);
        let Ok(url) = origin.join(path) else {
            continue;
        };

        debug!("Region {} ({})", key, element_text(a).trim());
        push_url(&mut regions, key, url.to_string(), || RegionConfig {
            key: key.to_string(),
            urls: Vec::new(),
            paginate: true,
            shape: Some(ShapeSelection::Card),
        });
    }
    Ok(regions)
}
