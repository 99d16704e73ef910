//! Crawl orchestrator: region map → pagination → dedup → batch files.
//!
//! Regions run one after another in the order given. Each region's sources
//! are crawled sequentially into one batch, deduplicated once, and written to
//! `{region}_{suffix}.csv`. Nothing below this level aborts the run: fetch and
//! extraction failures become empty pages, write failures mark the region as
//! `persist_failed`. `run` always returns the collected [`CrawlRunStats`].

pub mod dedup;
pub mod pagination;

use crate::config::{AppConfig, RegionConfig};
use crate::error::ExtractionError;
use crate::models::{
    CompanyRecord, CrawlRunStats, RecordShape, RegionBatch, RegionOutcome, RegionStatus,
};
use crate::scraper::PageFetcher;
use crate::scraper::parsers::RecordExtractor;
use crate::storage::{merge, write_records, write_summary};
use std::path::PathBuf;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use self::dedup::dedup;
use self::pagination::PaginationDriver;

pub struct Pipeline {
    config: AppConfig,
    extractor: RecordExtractor,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self, ExtractionError> {
        let extractor = RecordExtractor::new(config.crawl.link_base.clone())?;
        Ok(Self { config, extractor })
    }

    pub fn region_file(&self, key: &str) -> PathBuf {
        self.config
            .output
            .dir
            .join(format!("{}_{}.csv", key, self.config.output.file_suffix))
    }

    pub fn summary_file(&self) -> PathBuf {
        self.config.output.dir.join(&self.config.output.summary_name)
    }

    pub async fn run(&self, fetcher: &dyn PageFetcher, regions: &[RegionConfig]) -> CrawlRunStats {
        let driver = PaginationDriver::new(fetcher, &self.extractor, self.config.crawl.page_delay());
        let mut stats = CrawlRunStats::default();
        let mut written: Vec<PathBuf> = Vec::new();

        for (i, region) in regions.iter().enumerate() {
            if i > 0 {
                sleep(self.config.crawl.region_delay()).await;
            }

            let (outcome, records) = self.crawl_region(&driver, fetcher, region).await;
            if let (RegionStatus::Written, Some(file)) = (outcome.status, &outcome.file) {
                written.push(file.clone());
            }
            stats.record_region(outcome, &records);
        }

        if self.config.output.consolidated {
            stats.consolidated_file = self.consolidate(&written);
        }

        let summary = self.summary_file();
        if let Err(e) = write_summary(&stats, &summary) {
            warn!("Could not write run summary: {}", e);
        }

        info!(
            "=== Done: {} regions | {} with records | {} records | {} failed to persist ===",
            stats.regions_attempted,
            stats.regions_with_records,
            stats.total_records,
            stats.failed_regions().count(),
        );
        stats
    }

    async fn crawl_region(
        &self,
        driver: &PaginationDriver<'_>,
        fetcher: &dyn PageFetcher,
        region: &RegionConfig,
    ) -> (RegionOutcome, Vec<CompanyRecord>) {
        let crawl = &self.config.crawl;
        info!("=== Region {} ({} sources) ===", region.key, region.urls.len());

        let forced = region.shape.unwrap_or(crawl.shape).forced();
        let max_pages = if region.paginate { crawl.max_pages } else { 1 };

        let mut batch = RegionBatch::new(&region.key);
        let mut pages_visited = 0;
        let mut fetch_failures = 0;
        for url in &region.urls {
            let source = driver.crawl(&batch.key, url, max_pages, forced).await;
            pages_visited += source.pages_visited;
            fetch_failures += source.fetch_failures;
            batch.append(source.records);
        }
        fetcher.release().await;
        debug!(
            "[{}] {} raw records from {} sources",
            batch.key,
            batch.records.len(),
            region.urls.len()
        );

        let records = dedup(batch.records, crawl.dedup_policy);
        let mut outcome = RegionOutcome {
            region: region.key.clone(),
            status: RegionStatus::Empty,
            records: records.len(),
            pages_visited,
            fetch_failures,
            file: None,
            error: None,
        };

        let Some(first) = records.first() else {
            warn!("[{}] no records found ({} fetch failures)", region.key, fetch_failures);
            return (outcome, records);
        };

        let shape = forced.unwrap_or(first.shape);
        let dropped = off_shape_count(&records, shape);
        if dropped > 0 {
            warn!(
                "[{}] sources mix table and card records; writing {} schema, {} records lose their other-shape fields",
                region.key,
                shape.as_str(),
                dropped
            );
        }
        let path = self.region_file(&region.key);
        match write_records(&records, shape, &path) {
            Ok(n) => {
                info!("[{}] {} unique records → {:?}", region.key, n, path);
                outcome.status = RegionStatus::Written;
                outcome.file = Some(path);
            }
            Err(e) => {
                warn!("[{}] failed to persist {} records: {}", region.key, records.len(), e);
                outcome.status = RegionStatus::PersistFailed;
                outcome.error = Some(e.to_string());
            }
        }
        (outcome, records)
    }

    fn consolidate(&self, written: &[PathBuf]) -> Option<PathBuf> {
        if written.is_empty() {
            return None;
        }

        let path = self.config.output.dir.join(&self.config.output.consolidated_name);
        match merge(written, &path) {
            Ok(_) => Some(path),
            Err(e) => {
                warn!("Consolidated file not written: {}", e);
                None
            }
        }
    }
}

/// Records whose own shape differs from the file schema `shape`.
fn off_shape_count(records: &[CompanyRecord], shape: RecordShape) -> usize {
    records.iter().filter(|r| r.shape != shape).count()
}

#[cfg(test)]
pub(crate) mod stubs {
    use crate::error::FetchError;
    use crate::scraper::parsers::fixtures::table_page;
    use crate::scraper::{Page, PageFetcher};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    /// Serves table pages with one record per page. Pages past `record_pages`
    /// are empty; URLs containing `fail_marker` always fail.
    pub struct StubFetcher {
        record_pages: Option<u32>,
        fail_marker: Option<String>,
        pub visits: AtomicU32,
        pub releases: AtomicU32,
        urls: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn build(record_pages: Option<u32>, fail_marker: Option<&str>) -> Self {
            Self {
                record_pages,
                fail_marker: fail_marker.map(str::to_string),
                visits: AtomicU32::new(0),
                releases: AtomicU32::new(0),
                urls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_record_pages(k: u32) -> Self {
            Self::build(Some(k), None)
        }

        pub fn always_records() -> Self {
            Self::build(None, None)
        }

        pub fn failing(marker: &str) -> Self {
            Self::build(None, Some(marker))
        }

        pub fn failing_for(marker: &str, record_pages: u32) -> Self {
            Self::build(Some(record_pages), Some(marker))
        }

        pub fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    fn page_number(url: &str) -> u32 {
        Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "page")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .unwrap_or(1)
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
            self.visits.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());

            if let Some(marker) = &self.fail_marker {
                if url.contains(marker.as_str()) {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: 3,
                        last: Box::new(FetchError::Connection {
                            url: url.to_string(),
                            reason: "connection refused".into(),
                        }),
                    });
                }
            }

            let n = page_number(url);
            let html = if self.record_pages.is_none_or(|k| n <= k) {
                let bin = format!("{}", 1_000_000_000u64 + n as u64);
                let name = format!("Company {n}");
                table_page(&[(bin.as_str(), name.as_str())])
            } else {
                table_page(&[])
            };
            Ok(Page {
                url: url.to_string(),
                html,
            })
        }

        async fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stubs::StubFetcher;
    use super::*;
    use crate::config::DedupPolicy;
    use crate::loader::load_batch;
    use std::sync::atomic::Ordering;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.crawl.page_delay_ms = 0;
        cfg.crawl.region_delay_ms = 0;
        cfg.crawl.regions = Vec::new();
        cfg.output.dir = dir.to_path_buf();
        cfg
    }

    fn region(key: &str, urls: &[&str]) -> RegionConfig {
        RegionConfig::new(key, urls.iter().map(|u| u.to_string()).collect())
    }

    #[tokio::test]
    async fn test_failing_region_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = StubFetcher::failing_for("bad.test", 2);
        let regions = vec![
            region("broken", &["https://bad.test/list"]),
            region("almaty", &["https://good.test/almaty"]),
            region("astana", &["https://good.test/astana"]),
        ];

        let stats = pipeline.run(&fetcher, &regions).await;

        assert_eq!(stats.regions_attempted, 3);
        assert_eq!(stats.regions_with_records, 2);
        assert_eq!(stats.total_records, 4);

        let broken = stats.region("broken").unwrap();
        assert_eq!(broken.status, RegionStatus::Empty);
        assert_eq!(broken.records, 0);
        assert_eq!(broken.fetch_failures, 1);
        assert!(broken.file.is_none());

        for key in ["almaty", "astana"] {
            let outcome = stats.region(key).unwrap();
            assert_eq!(outcome.status, RegionStatus::Written);
            assert_eq!(outcome.records, 2);
            assert_eq!(outcome.pages_visited, 3);
        }

        assert_eq!(fetcher.releases.load(Ordering::SeqCst), 3);
        assert!(pipeline.summary_file().exists());
        assert!(!pipeline.region_file("broken").exists());
    }

    #[tokio::test]
    async fn test_region_files_and_consolidated_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = StubFetcher::with_record_pages(1);
        let regions = vec![
            region("zhambyl", &["https://good.test/zhambyl"]),
            region("abay", &["https://good.test/abay"]),
        ];

        let stats = pipeline.run(&fetcher, &regions).await;

        let (_, zhambyl) = load_batch(&pipeline.region_file("zhambyl")).unwrap();
        assert_eq!(zhambyl.len(), 1);
        assert_eq!(zhambyl[0].region.as_deref(), Some("zhambyl"));

        let consolidated = stats.consolidated_file.unwrap();
        let (_, all) = load_batch(&consolidated).unwrap();
        let regions: Vec<_> = all.iter().map(|r| r.region.clone().unwrap()).collect();
        assert_eq!(regions, vec!["zhambyl", "abay"]);
    }

    #[tokio::test]
    async fn test_sources_merge_and_dedup_within_region() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = StubFetcher::with_record_pages(2);
        let regions = vec![region(
            "pavlodar",
            &["https://good.test/311", "https://good.test/310"],
        )];

        let stats = pipeline.run(&fetcher, &regions).await;

        let outcome = stats.region("pavlodar").unwrap();
        assert_eq!(outcome.pages_visited, 6);
        assert_eq!(outcome.records, 2);

        let (_, records) = load_batch(&pipeline.region_file("pavlodar")).unwrap();
        assert!(records.iter().all(|r| r.source_url.as_deref().unwrap().contains("/311")));
    }

    #[tokio::test]
    async fn test_last_wins_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.crawl.dedup_policy = DedupPolicy::LastWins;
        let pipeline = Pipeline::new(cfg).unwrap();
        let fetcher = StubFetcher::with_record_pages(1);
        let regions = vec![region(
            "pavlodar",
            &["https://good.test/311", "https://good.test/310"],
        )];

        pipeline.run(&fetcher, &regions).await;

        let (_, records) = load_batch(&pipeline.region_file("pavlodar")).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].source_url.as_deref().unwrap().contains("/310"));
    }

    #[tokio::test]
    async fn test_non_paginated_region_visits_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = StubFetcher::always_records();
        let mut kazdata = region("pavlodar", &["https://good.test/311"]);
        kazdata.paginate = false;

        let stats = pipeline.run(&fetcher, &[kazdata]).await;
        assert_eq!(stats.region("pavlodar").unwrap().pages_visited, 1);
        assert_eq!(fetcher.visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_per_region() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let pipeline = Pipeline::new(config(&blocker)).unwrap();
        let fetcher = StubFetcher::with_record_pages(1);
        let regions = vec![
            region("almaty", &["https://good.test/almaty"]),
            region("astana", &["https://good.test/astana"]),
        ];

        let stats = pipeline.run(&fetcher, &regions).await;

        assert_eq!(stats.regions_attempted, 2);
        assert_eq!(stats.failed_regions().count(), 2);
        let almaty = stats.region("almaty").unwrap();
        assert_eq!(almaty.status, RegionStatus::PersistFailed);
        assert_eq!(almaty.records, 1);
        assert!(almaty.error.is_some());
        assert!(stats.consolidated_file.is_none());
    }

    #[tokio::test]
    async fn test_region_named_like_consolidated_file_keeps_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = StubFetcher::with_record_pages(1);
        let regions = vec![
            region("almaty", &["https://good.test/almaty"]),
            region("all", &["https://good.test/all"]),
        ];

        let stats = pipeline.run(&fetcher, &regions).await;

        assert_eq!(stats.region("all").unwrap().status, RegionStatus::Written);
        assert!(stats.consolidated_file.is_none());
        let (_, records) = load_batch(&pipeline.region_file("all")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region.as_deref(), Some("all"));
    }

    #[test]
    fn test_off_shape_records_are_counted() {
        use crate::models::fixtures::{card_record, table_record};

        let records = vec![
            table_record("1111111111", "A"),
            card_record("2222222222", "B"),
            table_record("3333333333", "C"),
        ];
        assert_eq!(off_shape_count(&records, RecordShape::Table), 1);
        assert_eq!(off_shape_count(&records, RecordShape::Card), 2);
        assert_eq!(off_shape_count(&records[..1], RecordShape::Table), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_card_crawl_over_http() {
        use crate::config::FetchConfig;
        use crate::models::{CARD_COLUMNS, RecordShape};
        use crate::scraper::HttpPageFetcher;
        use crate::scraper::parsers::fixtures::{card, card_page};
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/states/kz/almaty"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(card_page(&[
                card("ТОО Beta", "222222222222", "ui-status--red"),
                card("ТОО Alpha (dup)", "111111111111", "ui-status--green"),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/states/kz/almaty"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Конец списка</body></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/states/kz/almaty"))
            .respond_with(ResponseTemplate::new(200).set_body_string(card_page(&[card(
                "ТОО   Alpha",
                "111111111111",
                "ui-status--green",
            )])))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        let fetcher = HttpPageFetcher::new(&FetchConfig {
            settle_delay_ms: 0,
            retry_backoff_ms: 0,
            ..FetchConfig::default()
        });
        let url = format!("{}/states/kz/almaty", server.uri());
        let regions = vec![region("almaty", &[url.as_str()])];

        let stats = pipeline.run(&fetcher, &regions).await;

        let outcome = stats.region("almaty").unwrap();
        assert_eq!(outcome.status, RegionStatus::Written);
        assert_eq!(outcome.pages_visited, 3);
        assert_eq!(outcome.records, 2);

        let path = pipeline.region_file("almaty");
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with(&CARD_COLUMNS.join(",")));

        let (shape, records) = load_batch(&path).unwrap();
        assert_eq!(shape, RecordShape::Card);
        assert_eq!(records[0].name, "ТОО Alpha");
        assert_eq!(records[1].name, "ТОО Beta");
        assert_eq!(records[1].status.as_deref(), Some(crate::models::STATUS_INACTIVE));
    }
}
