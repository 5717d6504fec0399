//! Configuration
//!
//! [`BackendConfig`] is the user-supplied part, stored in the durable
//! key-value store under [`KEY_URL`], [`KEY_ANON_KEY`] and [`KEY_PRIVACY`].
//! [`ClientSettings`] holds the fixed tuning of the client itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Store key for the backend base URL
pub const KEY_URL: &str = "backend_url";
/// Store key for the backend anonymous (public) API key
pub const KEY_ANON_KEY: &str = "backend_anon_key";
/// Store key for the privacy-mode flag
pub const KEY_PRIVACY: &str = "privacy_mode";

/// All configuration keys, in read order
pub const CONFIG_KEYS: [&str; 3] = [KEY_URL, KEY_ANON_KEY, KEY_PRIVACY];

/// Backend connection configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend base URL (e.g., "https://abc.supabase.co")
    pub url: Option<String>,
    /// Backend anonymous key
    pub anon_key: Option<String>,
    /// Privacy mode: page titles are not sent to the backend
    #[serde(default)]
    pub privacy: bool,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            anon_key: Some(anon_key.into()),
            privacy: false,
        }
    }

    pub fn with_privacy(mut self, privacy: bool) -> Self {
        self.privacy = privacy;
        self
    }

    /// URL and key, when both are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.anon_key.as_deref()) {
            (Some(url), Some(key)) => Some((url, key)),
            _ => None,
        }
    }

    /// Build from raw store values; blank strings count as missing
    pub(crate) fn from_items(items: &HashMap<String, Value>) -> Self {
        let text = |key: &str| {
            items
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let privacy = match items.get(KEY_PRIVACY) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "on"),
            _ => false,
        };

        Self {
            url: text(KEY_URL),
            anon_key: text(KEY_ANON_KEY),
            privacy,
        }
    }
}

/// Client tuning
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Read record table name
    pub table: String,
    /// Upsert-or-flip procedure name
    pub toggle_rpc: String,
    /// Server-side listing procedure name
    pub list_rpc: String,
    /// Upper bound for a requested page size
    pub max_page_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            table: "read_records".to_string(),
            toggle_rpc: "toggle_read".to_string(),
            list_rpc: "list_recent_reads".to_string(),
            max_page_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_items_treats_blank_as_missing() {
        let items = HashMap::from([
            (KEY_URL.to_string(), json!("  https://db.example.com ")),
            (KEY_ANON_KEY.to_string(), json!("   ")),
            (KEY_PRIVACY.to_string(), json!("true")),
        ]);
        let config = BackendConfig::from_items(&items);

        assert_eq!(config.url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.anon_key, None);
        assert!(config.privacy);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_credentials_present() {
        let config = BackendConfig::new("https://db.example.com", "anon");
        assert_eq!(config.credentials(), Some(("https://db.example.com", "anon")));
        assert!(!config.privacy);
    }
}
