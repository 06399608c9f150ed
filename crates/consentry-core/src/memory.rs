//! In-memory backends for headless use and tests

use crate::{ConsentError, Cookie, CookieStore, KeyValueStore, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory key/value store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as a disabled or full browser store would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConsentError::Storage("storage unavailable".to_string()));
        }
        Ok(())
    }

    /// Direct snapshot, bypassing availability checks
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.items.read().clone()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.items.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.items.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        self.items.write().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.items.read().keys().cloned().collect())
    }
}

/// In-memory cookie jar
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    cookies: RwLock<HashMap<String, Cookie>>,
    unavailable: AtomicBool,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConsentError::Cookie("cookies disabled".to_string()));
        }
        Ok(())
    }

    /// The stored cookie with its attributes
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.read().get(name).cloned()
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.cookies.read().get(name).map(|c| c.value.clone()))
    }

    fn set(&self, cookie: Cookie) -> Result<()> {
        self.check()?;
        let mut cookies = self.cookies.write();
        if cookie.max_age.is_some_and(|age| age <= 0) {
            cookies.remove(&cookie.name);
        } else {
            cookies.insert(cookie.name.clone(), cookie);
        }
        Ok(())
    }

    fn remove(&self, name: &str, _domain: Option<&str>) -> Result<()> {
        self.check()?;
        self.cookies.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CookieConfig;

    #[test]
    fn test_storage_basic_ops() {
        let s = MemoryStorage::new();
        s.set("a", "1").unwrap();
        s.set("b", "2").unwrap();
        assert_eq!(s.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(s.len().unwrap(), 2);
        s.remove("a").unwrap();
        assert_eq!(s.keys().unwrap(), vec!["b".to_string()]);
        s.clear().unwrap();
        assert_eq!(s.len().unwrap(), 0);
    }

    #[test]
    fn test_unavailable_storage_errors() {
        let s = MemoryStorage::new();
        s.set_unavailable(true);
        assert!(s.set("a", "1").is_err());
        assert!(s.get("a").is_err());
    }

    #[test]
    fn test_expired_cookie_is_removed() {
        let jar = MemoryCookieStore::new();
        let mut cookie = Cookie::first_party("x", "1", &CookieConfig::default());
        jar.set(cookie.clone()).unwrap();
        assert!(jar.get("x").unwrap().is_some());
        cookie.max_age = Some(0);
        jar.set(cookie).unwrap();
        assert!(jar.get("x").unwrap().is_none());
    }
}
