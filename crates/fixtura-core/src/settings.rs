//! Fixture settings shared by every container harness.
//!
//! Resolution chain: env var > config file > default. The config file is a
//! TOML document whose path is read from `FIXTURA_CONFIG`:
//!
//! ```toml
//! ready_timeout_secs = 180
//! stop_timeout_secs = 30
//!
//! [images]
//! postgres = "16-alpine"
//! kafka = "7.6.1"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "FIXTURA_CONFIG";
/// Environment variable overriding [`Settings::ready_timeout_secs`].
pub const READY_TIMEOUT_ENV: &str = "FIXTURA_READY_TIMEOUT_SECS";
/// Environment variable overriding [`Settings::stop_timeout_secs`].
pub const STOP_TIMEOUT_ENV: &str = "FIXTURA_STOP_TIMEOUT_SECS";

/// Timeouts and image overrides applied to external processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Budget for an external process to reach its ready state.
    pub ready_timeout_secs: u64,
    /// Budget for terminating an external process.
    pub stop_timeout_secs: u64,
    /// Image tag overrides keyed by container kind (e.g. `postgres`).
    pub images: BTreeMap<String, String>,
}

impl Settings {
    pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 120;
    pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

    /// Resolve settings from the process environment.
    ///
    /// A malformed config file is logged and ignored; use
    /// [`Settings::try_from_env`] to surface the error instead.
    pub fn from_env() -> Self {
        match Self::try_from_env() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "ignoring invalid fixture settings");
                Self::default()
            }
        }
    }

    /// Resolve settings from the process environment, failing on a bad file.
    pub fn try_from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings using an explicit variable lookup (testable without env vars).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = match lookup(CONFIG_ENV) {
            Some(path) => Self::load_file(Path::new(&path))?,
            None => Self::default(),
        };
        base.with_overrides(lookup)
    }

    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse settings file at {}", path.display()))
    }

    /// Apply env-var overrides on top of `self`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(READY_TIMEOUT_ENV) {
            self.ready_timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{READY_TIMEOUT_ENV} must be a number of seconds, got {raw:?}"))?;
        }
        if let Some(raw) = lookup(STOP_TIMEOUT_ENV) {
            self.stop_timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{STOP_TIMEOUT_ENV} must be a number of seconds, got {raw:?}"))?;
        }
        // Kinds named in the file can be overridden, and so can the built-in ones.
        let mut kinds: Vec<String> = self.images.keys().cloned().collect();
        for kind in ["postgres", "redis", "redis-stack", "kafka"] {
            if !kinds.iter().any(|k| k == kind) {
                kinds.push(kind.to_string());
            }
        }
        for kind in kinds {
            if let Some(tag) = lookup(&image_tag_env(&kind)) {
                self.images.insert(kind, tag);
            }
        }
        Ok(self)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Image tag override for the given container kind, if any.
    pub fn image_tag(&self, kind: &str) -> Option<&str> {
        self.images.get(kind).map(String::as_str)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ready_timeout_secs: Self::DEFAULT_READY_TIMEOUT_SECS,
            stop_timeout_secs: Self::DEFAULT_STOP_TIMEOUT_SECS,
            images: BTreeMap::new(),
        }
    }
}

/// Env var name carrying the image tag override for `kind`
/// (`redis-stack` becomes `FIXTURA_REDIS_STACK_TAG`).
pub fn image_tag_env(kind: &str) -> String {
    let kind: String = kind
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("FIXTURA_{kind}_TAG")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ready_timeout(), Duration::from_secs(120));
        assert_eq!(settings.stop_timeout(), Duration::from_secs(30));
        assert_eq!(settings.image_tag("postgres"), None);
    }

    #[test]
    fn env_overrides_timeouts_and_tags() {
        let settings = Settings::from_lookup(lookup_from(&[
            (READY_TIMEOUT_ENV, "45"),
            ("FIXTURA_POSTGRES_TAG", "16-alpine"),
            ("FIXTURA_REDIS_STACK_TAG", "7.2.0-v10"),
        ]))
        .unwrap();
        assert_eq!(settings.ready_timeout_secs, 45);
        assert_eq!(settings.image_tag("postgres"), Some("16-alpine"));
        assert_eq!(settings.image_tag("redis-stack"), Some("7.2.0-v10"));
    }

    #[test]
    fn bad_timeout_is_an_error() {
        let err = Settings::from_lookup(lookup_from(&[(STOP_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(format!("{err:#}").contains("FIXTURA_STOP_TIMEOUT_SECS"));
    }

    #[test]
    fn file_then_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fixtura.toml");
        std::fs::write(
            &path,
            "ready_timeout_secs = 300\n\n[images]\npostgres = \"15\"\nkafka = \"7.5.0\"\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().to_string();

        let settings = Settings::from_lookup(lookup_from(&[
            (CONFIG_ENV, &path_str),
            ("FIXTURA_KAFKA_TAG", "7.6.1"),
        ]))
        .unwrap();
        assert_eq!(settings.ready_timeout_secs, 300);
        assert_eq!(settings.stop_timeout_secs, Settings::DEFAULT_STOP_TIMEOUT_SECS);
        assert_eq!(settings.image_tag("postgres"), Some("15"));
        assert_eq!(settings.image_tag("kafka"), Some("7.6.1"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let settings = Settings::load_file(Path::new("/nonexistent/fixtura.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fixtura.toml");
        std::fs::write(&path, "ready_timeout_secs = \"never\"").unwrap();
        assert!(Settings::load_file(&path).is_err());
    }

    #[test]
    fn image_tag_env_names() {
        assert_eq!(image_tag_env("postgres"), "FIXTURA_POSTGRES_TAG");
        assert_eq!(image_tag_env("redis-stack"), "FIXTURA_REDIS_STACK_TAG");
    }
}
