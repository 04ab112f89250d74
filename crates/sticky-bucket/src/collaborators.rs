//! Storage primitives the backends are built on.
//!
//! Each trait mirrors the narrow surface a host environment exposes: a
//! key/value local store, request cookies plus a response cookie sink, a
//! client cookie jar, and a remote cache with multi-get.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes attached to every cookie a cookie backend writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age_secs: Option<u64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieAttributes {
    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// Response side of a server request: receives cookies to set.
pub trait CookieSink: Send + Sync {
    fn set_cookie(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()>;
}

/// Client-side cookie access.
#[async_trait]
pub trait CookieJar: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn set(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()>;
}

#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetch several keys in one round trip. The result is positional.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}
