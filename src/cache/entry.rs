//! URL Cache Entry Types
//!
//! In-memory keys and answers, plus the flat record format used by both the
//! configuration files and the per-shard cache files.

use serde::{Deserialize, Serialize};

/// Cache key - composite of host-and-port and original path-and-query
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlKey {
    /// Host and port, e.g. `www.example.com:80`
    host: String,
    /// Original path and query string
    path: String,
}

impl UrlKey {
    /// Create a new URL key
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Get host and port
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get original path and query
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for UrlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

/// Answer for a URL lookup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlInfo {
    pub category: String,
    pub safe: bool,
}

impl UrlInfo {
    pub fn new(category: impl Into<String>, safe: bool) -> Self {
        Self {
            category: category.into(),
            safe,
        }
    }

    /// The answer for any URL with no cached or persisted entry.
    /// Unknown URLs are treated as unsafe.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CATEGORY, false)
    }

    /// Check if this is the unknown sentinel
    pub fn is_unknown(&self) -> bool {
        self.category == UNKNOWN_CATEGORY && !self.safe
    }
}

/// Category reported for URLs the cache knows nothing about
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Flat persisted record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub host: String,
    pub path: String,
    pub category: String,
    pub safe: bool,
}

impl UrlRecord {
    pub fn new(key: &UrlKey, info: &UrlInfo) -> Self {
        Self {
            host: key.host.clone(),
            path: key.path.clone(),
            category: info.category.clone(),
            safe: info.safe,
        }
    }

    /// Split into the in-memory key/answer pair
    pub fn into_parts(self) -> (UrlKey, UrlInfo) {
        (
            UrlKey {
                host: self.host,
                path: self.path,
            },
            UrlInfo {
                category: self.category,
                safe: self.safe,
            },
        )
    }
}

impl From<(UrlKey, UrlInfo)> for UrlRecord {
    fn from((key, info): (UrlKey, UrlInfo)) -> Self {
        Self {
            host: key.host,
            path: key.path,
            category: info.category,
            safe: info.safe,
        }
    }
}

/// Document holding a list of records: `{"urls": [...]}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecords {
    pub urls: Vec<UrlRecord>,
}

impl UrlRecords {
    pub fn new(urls: Vec<UrlRecord>) -> Self {
        Self { urls }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality_is_exact() {
        let a = UrlKey::new("www.cnn.com:80", "news");
        assert_eq!(a, UrlKey::new("www.cnn.com:80", "news"));
        assert_ne!(a, UrlKey::new("www.cnn.com:80", "News"));
        assert_ne!(a, UrlKey::new("www.cnn.com:443", "news"));
    }

    #[test]
    fn test_unknown_sentinel() {
        let info = UrlInfo::unknown();
        assert_eq!(info.category, "Unknown");
        assert!(!info.safe);
        assert!(info.is_unknown());
        assert!(!UrlInfo::new("news", true).is_unknown());
    }

    #[test]
    fn test_record_document_format() {
        let json = r#"{"urls":[{"host":"www.food.com:80","path":"recipes","category":"food","safe":true}]}"#;
        let records: UrlRecords = serde_json::from_str(json).unwrap();
        assert_eq!(records.len(), 1);

        let (key, info) = records.urls[0].clone().into_parts();
        assert_eq!(key.host(), "www.food.com:80");
        assert_eq!(key.path(), "recipes");
        assert_eq!(info, UrlInfo::new("food", true));

        assert_eq!(serde_json::to_string(&records).unwrap(), json);
    }

    #[test]
    fn test_info_serializes_as_lookup_body() {
        let body = serde_json::to_string(&UrlInfo::unknown()).unwrap();
        assert_eq!(body, r#"{"category":"Unknown","safe":false}"#);
    }
}
