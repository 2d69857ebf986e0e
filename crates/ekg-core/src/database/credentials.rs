//! Database credentials

use std::fmt;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Protocol family of a database URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriScheme {
    /// `bolt://`, `neo4j://` and their `+s`/`+ssc` variants
    Bolt,
    /// `http://` or `https://`, the transactional HTTP API
    Http,
}

impl UriScheme {
    const BOLT: [&'static str; 6] = ["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];

    /// Scheme of `uri`, `None` when it is not a supported database URI
    pub fn of(uri: &str) -> Option<Self> {
        let (scheme, rest) = uri.split_once("://")?;
        if rest.is_empty() {
            return None;
        }
        let scheme = scheme.to_ascii_lowercase();
        if Self::BOLT.contains(&scheme.as_str()) {
            Some(Self::Bolt)
        } else if scheme == "http" || scheme == "https" {
            Some(Self::Http)
        } else {
            None
        }
    }
}

/// Where and as whom to connect
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn scheme(&self) -> Result<UriScheme> {
        UriScheme::of(&self.uri).ok_or_else(|| {
            Error::ConfigError(format!(
                "database uri must use bolt://, neo4j:// or http(s)://, got '{}'",
                self.uri
            ))
        })
    }

    /// Resolve the password from the environment
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let password = config
            .resolved_password()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        Ok(Self::new(&config.uri, &config.user, password))
    }
}
