//! Headless Chrome fetcher (feature `browser`).
//!
//! Same contract as the HTTP fetcher, but pages are rendered by a real browser
//! so client-side lists are present in the returned markup.

use crate::config::{FetchConfig, ProxyConfig, SessionScope};
use crate::error::FetchError;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::proxy::ProxyPool;
use super::retry::RetryPolicy;
use super::{Page, PageFetcher};

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    proxy: Option<ProxyConfig>,
}

impl BrowserSession {
    /// Close the browser process. Runs on every release path.
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait failed: {}", e);
        }
        self.handler.abort();
    }
}

pub struct BrowserPageFetcher {
    config: FetchConfig,
    pool: ProxyPool,
    retry: RetryPolicy,
    session: Mutex<Option<BrowserSession>>,
    direct_fallback: AtomicBool,
}

impl BrowserPageFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            config: config.clone(),
            pool: ProxyPool::from_config(config),
            retry: RetryPolicy::from_config(config),
            session: Mutex::new(None),
            direct_fallback: AtomicBool::new(false),
        }
    }

    async fn launch(&self, proxy: Option<&ProxyConfig>) -> Result<BrowserSession, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", self.config.user_agent))
            .no_sandbox();

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(p) = proxy {
            if p.has_credentials() {
                warn!(
                    "Proxy credentials for {} are not supported by the browser engine; using server only",
                    p.server
                );
            }
            builder = builder.arg(format!("--proxy-server={}", p.server));
        }

        let browser_config = builder.build().map_err(FetchError::Session)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::Session(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(
            "Launched browser (headless={}, proxy={})",
            self.config.headless,
            proxy.map(|p| p.server.as_str()).unwrap_or("none")
        );
        Ok(BrowserSession {
            browser,
            handler,
            proxy: proxy.cloned(),
        })
    }

    async fn open_session(&self) -> Result<BrowserSession, FetchError> {
        let proxy = if self.direct_fallback.load(Ordering::Relaxed) {
            None
        } else {
            self.pool.pick().cloned()
        };

        match self.launch(proxy.as_ref()).await {
            Ok(session) => Ok(session),
            Err(e) if proxy.is_some() && self.config.retry_without_proxy => {
                warn!("{}; continuing without proxy", e);
                self.direct_fallback.store(true, Ordering::Relaxed);
                self.launch(None).await
            }
            Err(e) => Err(e),
        }
    }

    async fn navigate(&self, session: &BrowserSession, url: &str) -> Result<Page, FetchError> {
        let page = match timeout(self.config.timeout(), session.browser.new_page(url)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                let reason = e.to_string();
                return Err(match &session.proxy {
                    Some(p) if reason.contains("PROXY") => FetchError::Proxy {
                        proxy: p.server.clone(),
                        reason,
                    },
                    _ => FetchError::Connection {
                        url: url.to_string(),
                        reason,
                    },
                });
            }
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    secs: self.config.timeout_secs,
                });
            }
        };

        sleep(self.config.settle_delay()).await;

        let html = page.content().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        });
        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }

        Ok(Page {
            url: url.to_string(),
            html: html?,
        })
    }

    async fn attempt(&self, url: &str) -> Result<Page, FetchError> {
        let mut slot = self.session.lock().await;
        let session = match slot.take() {
            Some(s) => s,
            None => self.open_session().await?,
        };

        let result = self.navigate(&session, url).await;
        match &result {
            Ok(_) if self.config.session_scope == SessionScope::Region => *slot = Some(session),
            Ok(_) => session.close().await,
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                if e.is_proxy_failure() && session.proxy.is_some() && self.config.retry_without_proxy {
                    warn!("Proxy failure; continuing without proxy");
                    self.direct_fallback.store(true, Ordering::Relaxed);
                }
                session.close().await;
            }
        }
        result
    }
}

#[async_trait]
impl PageFetcher for BrowserPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        self.retry.run(url, || self.attempt(url)).await
    }

    async fn release(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
            debug!("Released browser session");
        }
        self.direct_fallback.store(false, Ordering::Relaxed);
    }
}
