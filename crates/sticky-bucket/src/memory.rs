//! In-memory collaborators.
//!
//! Each one can be switched into a failing mode to exercise the backends'
//! "absent on read, best effort on write" behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::{CookieAttributes, CookieJar, CookieSink, LocalStorage, RemoteCache};
use crate::error::{Result, StickyBucketError};

#[derive(Debug, Default)]
struct Switch(AtomicBool);

impl Switch {
    fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            Err(StickyBucketError::Unavailable(what.to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLocalStorage {
    items: Mutex<HashMap<String, String>>,
    failing: Switch,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// Write a raw value, bypassing any validation.
    pub fn insert_raw(&self, key: &str, raw: &str) {
        self.items
            .lock()
            .unwrap()
            .insert(key.to_string(), raw.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalStorage for MemoryLocalStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.failing.check("local storage")?;
        Ok(self.raw(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.failing.check("local storage")?;
        self.insert_raw(key, value);
        Ok(())
    }
}

/// A cookie as it was written, with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub attributes: CookieAttributes,
}

/// Response sink that records every cookie set on it.
#[derive(Debug, Default)]
pub struct RecordingCookieSink {
    written: Mutex<Vec<SetCookie>>,
    failing: Switch,
}

impl RecordingCookieSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn written(&self) -> Vec<SetCookie> {
        self.written.lock().unwrap().clone()
    }
}

impl CookieSink for RecordingCookieSink {
    fn set_cookie(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()> {
        self.failing.check("response cookies")?;
        self.written.lock().unwrap().push(SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, SetCookie>>,
    failing: Switch,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn insert_raw(&self, name: &str, raw: &str) {
        self.cookies.lock().unwrap().insert(
            name.to_string(),
            SetCookie {
                name: name.to_string(),
                value: raw.to_string(),
                attributes: CookieAttributes::default(),
            },
        );
    }

    pub fn cookie(&self, name: &str) -> Option<SetCookie> {
        self.cookies.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl CookieJar for MemoryCookieJar {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        self.failing.check("cookie jar")?;
        Ok(self.cookie(name).map(|c| c.value))
    }

    async fn set(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()> {
        self.failing.check("cookie jar")?;
        self.cookies.lock().unwrap().insert(
            name.to_string(),
            SetCookie {
                name: name.to_string(),
                value: value.to_string(),
                attributes: attributes.clone(),
            },
        );
        Ok(())
    }
}

/// Remote cache stand-in that counts round trips.
#[derive(Debug, Default)]
pub struct MemoryRemoteCache {
    entries: Mutex<HashMap<String, String>>,
    mget_calls: AtomicUsize,
    failing: Switch,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn insert_raw(&self, key: &str, raw: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), raw.to_string());
    }

    pub fn mget_calls(&self) -> usize {
        self.mget_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCache for MemoryRemoteCache {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.mget_calls.fetch_add(1, Ordering::SeqCst);
        self.failing.check("remote cache")?;
        let entries = self.entries.lock().unwrap();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.failing.check("remote cache")?;
        self.insert_raw(key, value);
        Ok(())
    }
}
