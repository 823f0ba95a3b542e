use crate::error::{EtudeError, EtudeResult};
use crate::resource::DocumentRoot;
use std::path::PathBuf;

pub const DEFAULT_DOC_ROOT: &str = "root";
pub const DEFAULT_DOCUMENT: &str = "index.html";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_BACKLOG: i32 = 8;

/// Server configuration. Everything except the listen port lives here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory that request URLs are appended to (default: `root`).
    pub doc_root: PathBuf,

    /// File served for the URL `/` (default: `index.html`).
    pub default_document: String,

    /// Number of worker threads parsing requests and building responses (default: 8).
    pub workers: usize,

    /// Maximum number of connections waiting in the ready queue (default: 100000).
    pub queue_capacity: usize,

    /// Size of the fd-indexed connection table (default: 1024).
    ///
    /// Descriptors at or above this bound are refused at accept time.
    pub max_connections: usize,

    /// Listen backlog (default: 8).
    pub backlog: i32,

    /// Register connections with `EPOLLET` in addition to `EPOLLONESHOT` (default: true).
    pub edge_triggered: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from(DEFAULT_DOC_ROOT),
            default_document: DEFAULT_DOCUMENT.to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            backlog: DEFAULT_BACKLOG,
            edge_triggered: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> Self {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse().ok());

        Config {
            doc_root: lookup("ETUDE_DOC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.doc_root),
            default_document: lookup("ETUDE_DEFAULT_DOCUMENT")
                .unwrap_or(defaults.default_document),
            workers: parsed("ETUDE_WORKERS").unwrap_or(defaults.workers),
            queue_capacity: parsed("ETUDE_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            max_connections: parsed("ETUDE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            backlog: lookup("ETUDE_BACKLOG")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.backlog),
            edge_triggered: lookup("ETUDE_EDGE_TRIGGERED")
                .map(|v| {
                    matches!(
                        v.trim().to_ascii_lowercase().as_str(),
                        "true" | "1" | "yes"
                    )
                })
                .unwrap_or(defaults.edge_triggered),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> EtudeResult<()> {
        if self.workers == 0 {
            return Err(EtudeError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EtudeError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(EtudeError::InvalidConfig(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.backlog <= 0 {
            return Err(EtudeError::InvalidConfig("backlog must be positive".into()));
        }
        Ok(())
    }

    pub fn document_root(&self) -> DocumentRoot {
        DocumentRoot::new(self.doc_root.clone(), self.default_document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.doc_root, PathBuf::from("root"));
        assert_eq!(config.default_document, "index.html");
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 100_000);
        assert_eq!(config.backlog, 8);
        assert!(config.edge_triggered);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("ETUDE_DOC_ROOT", "/srv/www"),
            ("ETUDE_DEFAULT_DOCUMENT", "home.html"),
            ("ETUDE_WORKERS", "2"),
            ("ETUDE_QUEUE_CAPACITY", "16"),
            ("ETUDE_MAX_CONNECTIONS", "64"),
            ("ETUDE_BACKLOG", "128"),
            ("ETUDE_EDGE_TRIGGERED", "no"),
        ]));

        assert_eq!(config.doc_root, PathBuf::from("/srv/www"));
        assert_eq!(config.default_document, "home.html");
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.backlog, 128);
        assert!(!config.edge_triggered);
    }

    #[test]
    fn test_config_invalid_numbers_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("ETUDE_WORKERS", "many"),
            ("ETUDE_QUEUE_CAPACITY", "-3"),
        ]));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_config_validate_rejects_zero_workers() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(EtudeError::InvalidConfig(_))));
    }
}
