use crate::config::{FetchConfig, ProxyConfig};
use rand::seq::IndexedRandom;
use tracing::{debug, warn};

/// Upstream proxies a session may route through.
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<ProxyConfig>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<ProxyConfig>) -> Self {
        Self { proxies }
    }

    /// Empty unless proxies are switched on.
    pub fn from_config(config: &FetchConfig) -> Self {
        if !config.use_proxy {
            return Self::default();
        }
        let pool = Self::new(config.proxies.clone());
        if pool.is_empty() {
            warn!("fetch.use_proxy is set but no proxies are configured; fetching directly");
        } else {
            debug!("Proxy pool with {} entries", pool.len());
        }
        pool
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Uniform-random pick. Consecutive picks may repeat.
    pub fn pick(&self) -> Option<&ProxyConfig> {
        self.proxies.choose(&mut rand::rng())
    }
}

impl ProxyConfig {
    /// Build the reqwest proxy, attaching basic auth when configured.
    pub fn to_reqwest(&self) -> reqwest::Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(&self.server)?;
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(pass)) => proxy.basic_auth(user, pass),
            _ => proxy,
        })
    }

    #[cfg(feature = "browser")]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}
