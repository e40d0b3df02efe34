//! Authentication artifact: an exported cookie file.
//!
//! Accepts either a bare list of cookies or an object of the form
//! `{"url": "...", "cookies": [...]}` as written by common browser
//! cookie-export extensions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScreenerError};

/// One browser cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    /// Unix seconds; absent for session cookies
    #[serde(default, alias = "expirationDate", alias = "expires")]
    pub expiration_date: Option<f64>,
}

fn default_domain() -> String {
    ".tradingview.com".into()
}

fn default_path() -> String {
    "/".into()
}

impl BrowserCookie {
    /// Whether the cookie expired before `now` (unix seconds).
    pub fn is_expired_at(&self, now: f64) -> bool {
        matches!(self.expiration_date, Some(exp) if exp > 0.0 && exp <= now)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CookieFile {
    List(Vec<BrowserCookie>),
    Wrapped {
        #[serde(default)]
        #[allow(dead_code)]
        url: Option<String>,
        cookies: Vec<BrowserCookie>,
    },
}

/// Validated set of cookies to inject into the session.
#[derive(Debug, Clone)]
pub struct CookieJar {
    cookies: Vec<BrowserCookie>,
    source: PathBuf,
}

impl CookieJar {
    /// Load and validate the cookie file at `path`.
    pub fn load(path: &Path, required: &[String]) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScreenerError::Authentication(format!(
                "cannot read cookie file {}: {e}",
                path.display()
            ))
        })?;

        let mut jar = Self::from_json(&content, required)?;
        jar.source = path.to_path_buf();
        Ok(jar)
    }

    /// Parse and validate cookie JSON.
    pub fn from_json(content: &str, required: &[String]) -> Result<Self> {
        let parsed: CookieFile = serde_json::from_str(content).map_err(|e| {
            ScreenerError::Authentication(format!("cookie file is not valid JSON: {e}"))
        })?;

        let cookies = match parsed {
            CookieFile::List(cookies) => cookies,
            CookieFile::Wrapped { cookies, .. } => cookies,
        };

        let jar = Self {
            cookies,
            source: PathBuf::new(),
        };
        jar.validate(required, chrono::Utc::now().timestamp() as f64)?;
        Ok(jar)
    }

    fn validate(&self, required: &[String], now: f64) -> Result<()> {
        if self.cookies.is_empty() {
            return Err(ScreenerError::Authentication("cookie file is empty".into()));
        }

        for name in required {
            let cookie = self
                .cookies
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| {
                    ScreenerError::Authentication(format!("required cookie '{name}' is missing"))
                })?;

            if cookie.value.is_empty() {
                return Err(ScreenerError::Authentication(format!(
                    "required cookie '{name}' is empty"
                )));
            }
            if cookie.is_expired_at(now) {
                return Err(ScreenerError::Authentication(format!(
                    "required cookie '{name}' has expired"
                )));
            }
        }

        Ok(())
    }

    /// All cookies, in file order.
    pub fn cookies(&self) -> &[BrowserCookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// File the jar was loaded from (empty for in-memory jars).
    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<String> {
        vec!["sessionid".to_string()]
    }

    #[test]
    fn test_parse_list_format() {
        let json = r#"[
            {"name": "sessionid", "value": "abc", "httpOnly": true, "expirationDate": 4102444800},
            {"name": "device_t", "value": "xyz", "domain": "in.tradingview.com"}
        ]"#;
        let jar = CookieJar::from_json(json, &required()).unwrap();
        assert_eq!(jar.len(), 2);
        assert!(jar.cookies()[0].http_only);
        assert_eq!(jar.cookies()[0].domain, ".tradingview.com");
        assert_eq!(jar.cookies()[0].path, "/");
        assert_eq!(jar.cookies()[1].domain, "in.tradingview.com");
    }

    #[test]
    fn test_parse_wrapped_format() {
        let json = r#"{"url": "https://in.tradingview.com", "cookies": [{"name": "sessionid", "value": "abc"}]}"#;
        let jar = CookieJar::from_json(json, &required()).unwrap();
        assert_eq!(jar.len(), 1);
        assert!(jar.cookies()[0].expiration_date.is_none());
    }

    #[test]
    fn test_empty_file_rejected() {
        let err = CookieJar::from_json("[]", &required()).unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
    }

    #[test]
    fn test_missing_required_cookie() {
        let json = r#"[{"name": "other", "value": "1"}]"#;
        let err = CookieJar::from_json(json, &required()).unwrap_err();
        assert!(err.to_string().contains("sessionid"));
    }

    #[test]
    fn test_expired_required_cookie() {
        let json = r#"[{"name": "sessionid", "value": "abc", "expirationDate": 1000}]"#;
        let err = CookieJar::from_json(json, &required()).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_malformed_json() {
        let err = CookieJar::from_json("{", &required()).unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
    }

    #[test]
    fn test_load_missing_file() {
        let err = CookieJar::load(Path::new("/nonexistent/cookies.json"), &required()).unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, r#"[{"name": "sessionid", "value": "abc"}]"#).unwrap();

        let jar = CookieJar::load(&path, &required()).unwrap();
        assert_eq!(jar.source(), path.as_path());
    }
}
