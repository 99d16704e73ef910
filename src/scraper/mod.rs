#[cfg(feature = "browser")]
pub mod browser;
pub mod cleaner;
pub mod http_client;
pub mod parsers;
pub mod proxy;
pub mod retry;

use crate::config::{FetchConfig, FetchEngine};
use crate::error::FetchError;
use anyhow::Result;
use async_trait::async_trait;

pub use self::http_client::HttpPageFetcher;

/// A navigated page: final markup plus the URL it was requested from.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub html: String,
}

// ── Fetcher trait ─────────────────────────────────────────────────────────────

/// Swappable page source. Implementations own the session (and proxy
/// checkout) lifecycle; `release` must close whatever is still open.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;

    async fn release(&self) {}
}

/// Build the fetcher selected by `fetch.engine`.
pub fn build_fetcher(config: &FetchConfig) -> Result<Box<dyn PageFetcher>> {
    match config.engine {
        FetchEngine::Http => Ok(Box::new(HttpPageFetcher::new(config))),
        #[cfg(feature = "browser")]
        FetchEngine::Browser => Ok(Box::new(browser::BrowserPageFetcher::new(config))),
        #[cfg(not(feature = "browser"))]
        FetchEngine::Browser => Err(anyhow::anyhow!(
            "fetch.engine = \"browser\" requires building with `--features browser`"
        )),
    }
}
