//! Flat URL list conversion
//!
//! Turns a list of `host/path` lines into the record document the engine
//! loads at startup.

use crate::cache::{UrlRecord, UrlRecords};

/// Options applied to every converted line
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Port appended to each host as `host:<port>`
    pub port: u16,
    pub category: String,
    pub safe: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            port: 80,
            category: "bad-site".to_string(),
            safe: false,
        }
    }
}

/// Convert one `host/path` line. Blank lines yield `None`.
pub fn convert_line(line: &str, options: &ConvertOptions) -> Option<UrlRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (host, path) = line.split_once('/').unwrap_or((line, ""));
    Some(UrlRecord {
        host: format!("{}:{}", host, options.port),
        path: path.to_string(),
        category: options.category.clone(),
        safe: options.safe,
    })
}

/// Convert a whole list, one URL per line
pub fn convert_list(input: &str, options: &ConvertOptions) -> UrlRecords {
    UrlRecords::new(
        input
            .lines()
            .filter_map(|line| convert_line(line, options))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_line() {
        let record = convert_line("evil.example.com/a/b?c=1", &ConvertOptions::default()).unwrap();
        assert_eq!(record.host, "evil.example.com:80");
        assert_eq!(record.path, "a/b?c=1");
        assert_eq!(record.category, "bad-site");
        assert!(!record.safe);

        let bare = convert_line("example.org", &ConvertOptions::default()).unwrap();
        assert_eq!(bare.host, "example.org:80");
        assert_eq!(bare.path, "");

        assert!(convert_line("   ", &ConvertOptions::default()).is_none());
    }

    #[test]
    fn test_convert_list_with_options() {
        let options = ConvertOptions {
            port: 8080,
            category: "news".into(),
            safe: true,
        };
        let records = convert_list("a.com/x\n\nb.com/y\r\n", &options);

        assert_eq!(records.len(), 2);
        assert_eq!(records.urls[1].host, "b.com:8080");
        assert_eq!(records.urls[1].path, "y");

        let json = serde_json::to_string(&records).unwrap();
        assert_eq!(
            json,
            r#"{"urls":[{"host":"a.com:8080","path":"x","category":"news","safe":true},{"host":"b.com:8080","path":"y","category":"news","safe":true}]}"#
        );
    }
}
