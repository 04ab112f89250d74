use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::collaborators::{CookieAttributes, CookieJar, CookieSink};
use crate::document::{attribute_key, parse_document, StickyAssignmentsDocument, DEFAULT_PREFIX};
use crate::store::{SaveAck, StickyBucketStore};

/// Server-side store scoped to a single request.
///
/// Reads come from the request's cookies. Saves go to the response sink and
/// also shadow the request cookie, so later reads in the same request see the
/// document that will be sent back.
pub struct ServerCookieStore {
    prefix: String,
    request_cookies: Mutex<HashMap<String, String>>,
    response: Arc<dyn CookieSink>,
    attributes: CookieAttributes,
}

impl ServerCookieStore {
    pub fn new(request_cookies: HashMap<String, String>, response: Arc<dyn CookieSink>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            request_cookies: Mutex::new(request_cookies),
            response,
            attributes: CookieAttributes::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_attributes(mut self, attributes: CookieAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn cookie_name(&self, attribute_name: &str, attribute_value: &str) -> String {
        format!("{}{}", self.prefix, attribute_key(attribute_name, attribute_value))
    }
}

#[async_trait]
impl StickyBucketStore for ServerCookieStore {
    async fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<StickyAssignmentsDocument> {
        let name = self.cookie_name(attribute_name, attribute_value);
        let cookies = self.request_cookies.lock().ok()?;
        cookies.get(&name).and_then(|raw| parse_document(raw))
    }

    async fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> SaveAck {
        let name = self.cookie_name(&doc.attribute_name, &doc.attribute_value);
        let json = match doc.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(cookie = %name, error = %err, "failed to encode sticky document");
                return SaveAck::Unavailable;
            }
        };
        if let Err(err) = self.response.set_cookie(&name, &json, &self.attributes) {
            warn!(cookie = %name, error = %err, "response cookie write failed");
            return SaveAck::Unavailable;
        }
        if let Ok(mut cookies) = self.request_cookies.lock() {
            cookies.insert(name, json);
        }
        SaveAck::Stored
    }
}

/// Client-side store over a cookie jar.
pub struct ClientCookieStore {
    prefix: String,
    jar: Arc<dyn CookieJar>,
    attributes: CookieAttributes,
}

impl ClientCookieStore {
    pub fn new(jar: Arc<dyn CookieJar>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            jar,
            attributes: CookieAttributes::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_attributes(mut self, attributes: CookieAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn cookie_name(&self, attribute_name: &str, attribute_value: &str) -> String {
        format!("{}{}", self.prefix, attribute_key(attribute_name, attribute_value))
    }
}

#[async_trait]
impl StickyBucketStore for ClientCookieStore {
    async fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<StickyAssignmentsDocument> {
        let name = self.cookie_name(attribute_name, attribute_value);
        match self.jar.get(&name).await {
            Ok(raw) => raw.as_deref().and_then(parse_document),
            Err(err) => {
                debug!(cookie = %name, error = %err, "cookie read failed");
                None
            }
        }
    }

    async fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> SaveAck {
        let name = self.cookie_name(&doc.attribute_name, &doc.attribute_value);
        let result = match doc.to_json() {
            Ok(json) => self.jar.set(&name, &json, &self.attributes).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => SaveAck::Stored,
            Err(err) => {
                warn!(cookie = %name, error = %err, "cookie write failed");
                SaveAck::Unavailable
            }
        }
    }
}
