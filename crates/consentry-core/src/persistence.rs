//! Persistence layer - consent record and identifiers across two backends.
//!
//! The durable backend is a cookie store, the fallback is a same-origin
//! key/value store. Nothing here propagates a failure: reads degrade to
//! "absent", writes are best effort.

use crate::{
    generate_id, is_valid_id, ConsentRecord, CookieConfig, Result, CONSENT_KEY, SESSION_ID_KEY,
    VISITOR_ID_KEY,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Same-origin key/value storage (local or session area)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    /// All keys currently present
    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }
}

/// Durable cookie storage
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, cookie: Cookie) -> Result<()>;
    fn remove(&self, name: &str, domain: Option<&str>) -> Result<()>;
}

/// SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// A cookie with its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    /// Raw (unencoded) value
    pub value: String,
    pub path: String,
    /// Seconds; zero or negative expires the cookie
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub same_site: SameSite,
    pub secure: bool,
}

impl Cookie {
    /// A first-party cookie with the attributes Consentry always uses
    pub fn first_party(name: impl Into<String>, value: impl Into<String>, config: &CookieConfig) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: Some(i64::from(config.max_age_days) * 86_400),
            domain: config.domain.clone(),
            same_site: SameSite::Lax,
            secure: true,
        }
    }

    /// Value form-url-encoded for a `Set-Cookie` line
    pub fn encoded_value(&self) -> String {
        url::form_urlencoded::byte_serialize(self.value.as_bytes()).collect()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.encoded_value(), self.path)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        write!(f, "; SameSite={}", self.same_site)?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}

/// Reads and writes consent state across the cookie and local backends
#[derive(Clone)]
pub struct ConsentStore {
    cookies: Arc<dyn CookieStore>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    cookie_config: CookieConfig,
}

impl ConsentStore {
    pub fn new(
        cookies: Arc<dyn CookieStore>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        cookie_config: CookieConfig,
    ) -> Self {
        Self {
            cookies,
            local,
            session,
            cookie_config,
        }
    }

    /// Load the persisted record: cookie first, local store second.
    ///
    /// A record that fails validation in a backend counts as absent there.
    pub fn load(&self) -> Option<ConsentRecord> {
        let from_cookie = match self.cookies.get(CONSENT_KEY) {
            Ok(raw) => raw.and_then(|r| Self::parse_record(&r, "cookie")),
            Err(e) => {
                warn!("Failed to read consent cookie: {}", e);
                None
            }
        };
        if from_cookie.is_some() {
            return from_cookie;
        }

        match self.local.get(CONSENT_KEY) {
            Ok(raw) => raw.and_then(|r| Self::parse_record(&r, "local store")),
            Err(e) => {
                warn!("Failed to read consent from local store: {}", e);
                None
            }
        }
    }

    fn parse_record(raw: &str, source: &str) -> Option<ConsentRecord> {
        match ConsentRecord::from_json(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Discarding invalid consent record from {}: {}", source, e);
                None
            }
        }
    }

    /// Write the record to both backends (best effort)
    pub fn save(&self, record: &ConsentRecord) {
        let json = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize consent record: {}", e);
                return;
            }
        };

        let cookie = Cookie::first_party(CONSENT_KEY, json.clone(), &self.cookie_config);
        if let Err(e) = self.cookies.set(cookie) {
            warn!("Failed to write consent cookie: {}", e);
        }
        if let Err(e) = self.local.set(CONSENT_KEY, &json) {
            warn!("Failed to write consent to local store: {}", e);
        }
        debug!("Persisted consent record for visitor {}", record.visitor_id);
    }

    /// Remove the record from both backends (best effort)
    pub fn clear(&self) {
        if let Err(e) = self
            .cookies
            .remove(CONSENT_KEY, self.cookie_config.domain.as_deref())
        {
            warn!("Failed to remove consent cookie: {}", e);
        }
        if let Err(e) = self.local.remove(CONSENT_KEY) {
            warn!("Failed to remove consent from local store: {}", e);
        }
    }

    /// Resolve the long-lived visitor id.
    ///
    /// The first backend holding a valid id (cookie, then local store) wins
    /// and is copied into the other one. Invalid values are discarded. With
    /// no valid id anywhere a new one is generated and written to both.
    pub fn resolve_visitor_id(&self) -> String {
        let from_cookie = self.read_cookie_id(VISITOR_ID_KEY);
        let from_local = self.read_store_id(self.local.as_ref(), VISITOR_ID_KEY, "local store");

        match (from_cookie, from_local) {
            (Some(id), local) => {
                if local.as_deref() != Some(id.as_str()) {
                    self.write_local(VISITOR_ID_KEY, &id);
                }
                id
            }
            (None, Some(id)) => {
                self.write_cookie(VISITOR_ID_KEY, &id);
                id
            }
            (None, None) => {
                let id = generate_id();
                debug!("Generated new visitor id");
                self.write_cookie(VISITOR_ID_KEY, &id);
                self.write_local(VISITOR_ID_KEY, &id);
                id
            }
        }
    }

    /// Resolve the session id from the session store, generating one if needed
    pub fn resolve_session_id(&self) -> String {
        if let Some(id) = self.read_store_id(self.session.as_ref(), SESSION_ID_KEY, "session store") {
            return id;
        }
        let id = generate_id();
        if let Err(e) = self.session.set(SESSION_ID_KEY, &id) {
            warn!("Failed to write session id: {}", e);
        }
        id
    }

    fn read_cookie_id(&self, key: &str) -> Option<String> {
        match self.cookies.get(key) {
            Ok(Some(value)) if is_valid_id(&value) => Some(value),
            Ok(Some(value)) => {
                warn!("Discarding malformed identifier in cookie {}: {:?}", key, value);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read cookie {}: {}", key, e);
                None
            }
        }
    }

    fn read_store_id(&self, store: &dyn KeyValueStore, key: &str, source: &str) -> Option<String> {
        match store.get(key) {
            Ok(Some(value)) if is_valid_id(&value) => Some(value),
            Ok(Some(value)) => {
                warn!("Discarding malformed identifier {} in {}: {:?}", key, source, value);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read {} from {}: {}", key, source, e);
                None
            }
        }
    }

    fn write_cookie(&self, key: &str, value: &str) {
        let cookie = Cookie::first_party(key, value, &self.cookie_config);
        if let Err(e) = self.cookies.set(cookie) {
            warn!("Failed to write cookie {}: {}", key, e);
        }
    }

    fn write_local(&self, key: &str, value: &str) {
        if let Err(e) = self.local.set(key, value) {
            warn!("Failed to write {} to local store: {}", key, e);
        }
    }
}
