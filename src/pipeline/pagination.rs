//! Page-by-page crawl of one (region, source URL) pair.

use crate::models::{CompanyRecord, RecordShape};
use crate::scraper::parsers::RecordExtractor;
use crate::scraper::{Page, PageFetcher};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// URL of page `page` of a listing. Page 1 is the bare URL.
pub fn page_url(base: &str, page: u32) -> String {
    if page <= 1 {
        return base.to_string();
    }

    match Url::parse(base) {
        Ok(mut url) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "page")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair("page", &page.to_string());
            url.to_string()
        }
        Err(_) => {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{base}{sep}page={page}")
        }
    }
}

#[derive(Debug)]
enum PageState {
    Init,
    Fetching(u32),
    Extracting(u32, Page),
    Continue(u32),
    Stop,
}

#[derive(Debug, Default)]
pub struct SourceCrawl {
    pub records: Vec<CompanyRecord>,
    pub pages_visited: u32,
    pub fetch_failures: u32,
}

pub struct PaginationDriver<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a RecordExtractor,
    page_delay: Duration,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, extractor: &'a RecordExtractor, page_delay: Duration) -> Self {
        Self {
            fetcher,
            extractor,
            page_delay,
        }
    }

    /// Visit pages 1, 2, … until a page yields nothing or `max_pages` is reached.
    /// A fetch that fails after retries ends the source like an empty page.
    pub async fn crawl(
        &self,
        region: &str,
        source_url: &str,
        max_pages: u32,
        forced: Option<RecordShape>,
    ) -> SourceCrawl {
        let max_pages = max_pages.max(1);
        let mut out = SourceCrawl::default();
        let mut state = PageState::Init;

        loop {
            state = match state {
                PageState::Init => PageState::Fetching(1),

                PageState::Fetching(n) => {
                    let url = page_url(source_url, n);
                    out.pages_visited += 1;
                    match self.fetcher.fetch(&url).await {
                        Ok(page) => PageState::Extracting(n, page),
                        Err(e) => {
                            warn!("[{}] skipping page {}: {}", region, n, e);
                            out.fetch_failures += 1;
                            PageState::Stop
                        }
                    }
                }

                PageState::Extracting(n, page) => {
                    let records = match self.extractor.extract(&page, region, forced) {
                        Ok(records) => records,
                        Err(e) => {
                            warn!("[{}] page {} of {}: {}", region, n, source_url, e);
                            Vec::new()
                        }
                    };

                    if records.is_empty() {
                        info!("[{}] page {}: no records, done with {}", region, n, source_url);
                        PageState::Stop
                    } else {
                        info!("[{}] page {}: {} records", region, n, records.len());
                        out.records.extend(records);
                        PageState::Continue(n)
                    }
                }

                PageState::Continue(n) if n >= max_pages => {
                    debug!("[{}] page ceiling {} reached for {}", region, max_pages, source_url);
                    PageState::Stop
                }

                PageState::Continue(n) => {
                    sleep(self.page_delay).await;
                    PageState::Fetching(n + 1)
                }

                PageState::Stop => break,
            };
        }

        out
    }
}
