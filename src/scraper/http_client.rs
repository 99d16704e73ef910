use crate::config::{FetchConfig, ProxyConfig, SessionScope};
use crate::error::FetchError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::proxy::ProxyPool;
use super::retry::RetryPolicy;
use super::{Page, PageFetcher};

/// One checked-out client plus the proxy it routes through.
struct HttpSession {
    client: reqwest::Client,
    proxy: Option<ProxyConfig>,
}

impl HttpSession {
    fn proxy_label(&self) -> String {
        self.proxy
            .as_ref()
            .map(|p| p.server.clone())
            .unwrap_or_else(|| "direct".to_string())
    }
}

/// Plain HTTP fetcher. Pages are fetched with a per-session reqwest client so
/// a proxy checkout lasts exactly as long as the configured session scope.
pub struct HttpPageFetcher {
    config: FetchConfig,
    pool: ProxyPool,
    retry: RetryPolicy,
    session: Mutex<Option<HttpSession>>,
    direct_fallback: AtomicBool,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            config: config.clone(),
            pool: ProxyPool::from_config(config),
            retry: RetryPolicy::from_config(config),
            session: Mutex::new(None),
            direct_fallback: AtomicBool::new(false),
        }
    }

    fn build_client(&self, proxy: Option<&ProxyConfig>) -> Result<reqwest::Client, FetchError> {
        let builder = reqwest::Client::builder()
            .user_agent(&self.config.user_agent)
            .timeout(self.config.timeout())
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true);

        let builder = match proxy {
            Some(p) => {
                let proxy = p.to_reqwest().map_err(|e| FetchError::Proxy {
                    proxy: p.server.clone(),
                    reason: e.to_string(),
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))
    }

    fn open_session(&self) -> Result<HttpSession, FetchError> {
        let proxy = if self.direct_fallback.load(Ordering::Relaxed) {
            None
        } else {
            self.pool.pick().cloned()
        };

        match self.build_client(proxy.as_ref()) {
            Ok(client) => {
                debug!(
                    "Opened session via {}",
                    proxy.as_ref().map(|p| p.server.as_str()).unwrap_or("direct")
                );
                Ok(HttpSession { client, proxy })
            }
            Err(e) if proxy.is_some() && self.config.retry_without_proxy => {
                warn!("{}; continuing without proxy", e);
                self.direct_fallback.store(true, Ordering::Relaxed);
                Ok(HttpSession {
                    client: self.build_client(None)?,
                    proxy: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn classify(&self, err: reqwest::Error, url: &str, session: &HttpSession) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout {
                url: url.to_string(),
                secs: self.config.timeout_secs,
            };
        }
        match (&session.proxy, err.is_connect()) {
            (Some(p), true) => FetchError::Proxy {
                proxy: p.server.clone(),
                reason: err.to_string(),
            },
            _ => FetchError::Connection {
                url: url.to_string(),
                reason: err.to_string(),
            },
        }
    }

    async fn navigate(&self, session: &HttpSession, url: &str) -> Result<Page, FetchError> {
        let resp = session
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e, url, session))?;

        let status = resp.status();
        if status.as_u16() == 407 {
            return Err(FetchError::ProxyAuth {
                proxy: session.proxy_label(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = resp.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        // List markup is rendered client-side after load
        sleep(self.config.settle_delay()).await;

        Ok(Page {
            url: url.to_string(),
            html,
        })
    }

    fn on_proxy_failure(&self, session: &HttpSession, err: &FetchError) {
        if session.proxy.is_none() {
            return;
        }
        if self.config.retry_without_proxy {
            warn!("{}; continuing without proxy", err);
            self.direct_fallback.store(true, Ordering::Relaxed);
        } else {
            warn!("{}; rotating proxy", err);
        }
    }

    /// One navigation attempt. Any failure discards the session so the next
    /// attempt starts clean (and may draw another proxy).
    async fn attempt(&self, url: &str) -> Result<Page, FetchError> {
        let mut slot = self.session.lock().await;
        let session = match slot.take() {
            Some(s) => s,
            None => self.open_session()?,
        };

        debug!("GET {} via {}", url, session.proxy_label());
        let result = self.navigate(&session, url).await;

        match &result {
            Ok(_) if self.config.session_scope == SessionScope::Region => *slot = Some(session),
            Ok(_) => debug!("Released page-scoped session"),
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                if e.is_proxy_failure() {
                    self.on_proxy_failure(&session, e);
                }
            }
        }
        result
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        self.retry.run(url, || self.attempt(url)).await
    }

    async fn release(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("Released region session");
        }
        self.direct_fallback.store(false, Ordering::Relaxed);
    }
}
