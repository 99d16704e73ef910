use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::RecordShape;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Page fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub engine: FetchEngine,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause after navigation so client-rendered lists can finish.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub use_proxy: bool,

    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,

    #[serde(default = "default_true")]
    pub retry_without_proxy: bool,

    #[serde(default)]
    pub session_scope: SessionScope,

    #[serde(default = "default_true")]
    pub headless: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchEngine {
    #[default]
    Http,
    Browser,
}

/// How long one session (and its proxy checkout) lives.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    #[default]
    Region,
    Page,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Crawl configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    #[serde(default = "default_region_delay_ms")]
    pub region_delay_ms: u64,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,

    #[serde(default)]
    pub shape: ShapeSelection,

    #[serde(default = "default_link_base")]
    pub link_base: String,

    #[serde(default = "default_regions")]
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    FirstWins,
    LastWins,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShapeSelection {
    #[default]
    Auto,
    Table,
    Card,
}

impl ShapeSelection {
    pub fn forced(self) -> Option<RecordShape> {
        match self {
            ShapeSelection::Auto => None,
            ShapeSelection::Table => Some(RecordShape::Table),
            ShapeSelection::Card => Some(RecordShape::Card),
        }
    }
}

/// One entry of the region map. Order in the file is crawl order.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegionConfig {
    pub key: String,
    pub urls: Vec<String>,
    #[serde(default = "default_true")]
    pub paginate: bool,
    #[serde(default)]
    pub shape: Option<ShapeSelection>,
}

impl RegionConfig {
    pub fn new(key: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            key: key.into(),
            urls,
            paginate: true,
            shape: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    #[serde(default = "default_true")]
    pub consolidated: bool,

    #[serde(default = "default_consolidated_name")]
    pub consolidated_name: String,

    #[serde(default = "default_summary_name")]
    pub summary_name: String,
}

/// Local catalog (DuckDB) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    30
}
fn default_settle_delay_ms() -> u64 {
    3000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    5000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
        .to_string()
}
fn default_max_pages() -> u32 {
    50
}
fn default_page_delay_ms() -> u64 {
    3000
}
fn default_region_delay_ms() -> u64 {
    5000
}
fn default_link_base() -> String {
    "https://statsnet.co".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/regions")
}
fn default_file_suffix() -> String {
    "companies".to_string()
}
fn default_consolidated_name() -> String {
    "all_companies.csv".to_string()
}
fn default_summary_name() -> String {
    "run_summary.csv".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.duckdb")
}
fn default_true() -> bool {
    true
}

/// KazDATA large-enterprise lists. Pages are `2015-kazakhstan-{page}.html`,
/// usually one per KRP size code (311, 310, 305).
const KAZDATA_PAGES: &[(&str, &[&str])] = &[
    (
        "pavlodar",
        &[
            "pavlodar-i-oblast-311",
            "pavlodar-i-oblast-310",
            "pavlodar-i-oblast-305",
        ],
    ),
    (
        "almaty_oblast",
        &[
            "almaty-oblast-311",
            "almaty-oblast-310",
            "almaty-oblast-305",
            "almaty-i-oblast-311",
            "taldykorgan-i-oblast-311",
        ],
    ),
    (
        "astana",
        &[
            "astana-311",
            "astana-310",
            "astana-305",
        ],
    ),
    (
        "almaty_city",
        &[
            "almaty-311",
            "almaty-310",
            "almaty-305",
        ],
    ),
    (
        "shymkent",
        &[
            "shymkent-311",
            "shymkent-310",
            "shymkent-305",
        ],
    ),
    (
        "karaganda",
        &[
            "karaganda-311",
            "karaganda-310",
            "karaganda-305",
        ],
    ),
    (
        "aktobe",
        &[
            "aktobe-311",
            "aktobe-310",
            "aktobe-305",
        ],
    ),
    (
        "atyrau",
        &[
            "atyrau-311",
            "atyrau-310",
            "atyrau-305",
        ],
    ),
    (
        "kostanay",
        &[
            "kostanay-311",
            "kostanay-310",
            "kostanay-305",
        ],
    ),
    (
        "mangistau",
        &[
            "aktau-311",
            "aktau-310",
            "aktau-305",
        ],
    ),
    (
        "semey",
        &[
            "semey-311",
            "semey-310",
            "semey-305",
        ],
    ),
    (
        "oral",
        &[
            "oral-311",
            "oral-310",
            "oral-305",
        ],
    ),
    (
        "taraz",
        &[
            "taraz-311",
            "taraz-310",
            "taraz-305",
        ],
    ),
    (
        "kokshetau",
        &[
            "kokshetau-311",
            "kokshetau-310",
            "kokshetau-305",
        ],
    ),
    (
        "petropavlovsk",
        &[
            "petropavlovsk-311",
            "petropavlovsk-310",
            "petropavlovsk-305",
        ],
    ),
    (
        "turkestan",
        &[
            "turkestan-311",
            "turkestan-310",
            "turkestan-305",
        ],
    ),
];

fn default_regions() -> Vec<RegionConfig> {
    KAZDATA_PAGES
        .iter()
        .map(|(key, pages)| RegionConfig {
            key: key.to_string(),
            urls: pages
                .iter()
                .map(|page| format!("https://kazdata.kz/04/2015-kazakhstan-{page}.html"))
                .collect(),
            paginate: false,
            shape: Some(ShapeSelection::Table),
        })
        .collect()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            engine: FetchEngine::default(),
            timeout_secs: default_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: default_user_agent(),
            use_proxy: false,
            proxies: Vec::new(),
            retry_without_proxy: true,
            session_scope: SessionScope::default(),
            headless: true,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            region_delay_ms: default_region_delay_ms(),
            dedup_policy: DedupPolicy::default(),
            shape: ShapeSelection::default(),
            link_base: default_link_base(),
            regions: default_regions(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            file_suffix: default_file_suffix(),
            consolidated: true,
            consolidated_name: default_consolidated_name(),
            summary_name: default_summary_name(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            crawl: CrawlConfig::default(),
            output: OutputConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl CrawlConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn region_delay(&self) -> Duration {
        Duration::from_millis(self.region_delay_ms)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("SCRAPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(app_cfg)
    }

    /// Parse a TOML document on top of the defaults.
    #[cfg(test)]
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fetch_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.fetch.timeout_secs, 30);
        assert_eq!(cfg.fetch.max_attempts, 3);
        assert_eq!(cfg.fetch.retry_backoff_ms, 5000);
        assert_eq!(cfg.crawl.max_pages, 50);
        assert_eq!(cfg.crawl.dedup_policy, DedupPolicy::FirstWins);
        assert!(!cfg.fetch.use_proxy);
    }

    #[test]
    fn test_default_regions_cover_all_krp_codes() {
        let regions = default_regions();
        assert_eq!(regions.len(), 16);
        assert_eq!(regions[0].key, "pavlodar");
        assert_eq!(regions[15].key, "turkestan");
        for region in &regions {
            assert!(region.urls.len() >= 3, "{}", region.key);
            assert!(!region.paginate);
            assert!(region.urls[0].ends_with("-311.html"));
            assert!(region.urls[1].ends_with("-310.html"));
            assert!(region.urls[2].ends_with("-305.html"));
            assert!(region.urls.iter().all(|u| u.starts_with("https://kazdata.kz/04/")));
        }
    }

    #[test]
    fn test_default_regions_keep_extra_almaty_oblast_pages() {
        let regions = default_regions();
        let almaty = regions.iter().find(|r| r.key == "almaty_oblast").unwrap();
        assert_eq!(
            almaty.urls[3..],
            [
                "https://kazdata.kz/04/2015-kazakhstan-almaty-i-oblast-311.html".to_string(),
                "https://kazdata.kz/04/2015-kazakhstan-taldykorgan-i-oblast-311.html".to_string(),
            ]
        );

        let mangistau = regions.iter().find(|r| r.key == "mangistau").unwrap();
        assert_eq!(
            mangistau.urls[0],
            "https://kazdata.kz/04/2015-kazakhstan-aktau-311.html"
        );
    }

    #[test]
    fn test_region_order_follows_file() {
        let cfg = AppConfig::from_toml(
            r#"
            [crawl]
            max_pages = 5

            [[crawl.regions]]
            key = "zhambyl"
            urls = ["https://statsnet.co/states/kz/zhambyl"]

            [[crawl.regions]]
            key = "abay"
            urls = ["https://statsnet.co/states/kz/abay"]
            paginate = false
            shape = "card"
            "#,
        )
        .unwrap();

        let keys: Vec<&str> = cfg.crawl.regions.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["zhambyl", "abay"]);
        assert!(cfg.crawl.regions[0].paginate);
        assert_eq!(cfg.crawl.regions[1].shape, Some(ShapeSelection::Card));
        assert_eq!(cfg.crawl.max_pages, 5);
        assert_eq!(cfg.fetch.timeout_secs, 30);
    }

    #[test]
    fn test_proxy_list_parses() {
        let cfg = AppConfig::from_toml(
            r#"
            [fetch]
            use_proxy = true
            session_scope = "page"

            [[fetch.proxies]]
            server = "http://10.0.0.1:3128"
            username = "u"
            password = "p"
            "#,
        )
        .unwrap();
        assert!(cfg.fetch.use_proxy);
        assert_eq!(cfg.fetch.session_scope, SessionScope::Page);
        assert_eq!(cfg.fetch.proxies[0].username.as_deref(), Some("u"));
    }
}
