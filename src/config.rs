//! Runtime configuration.
//!
//! The engine receives one read-only [`Config`] built from CLI flags, with
//! defaults optionally supplied by a TOML file at:
//! 1. `$MAILDEDUP_CONFIG` (environment variable)
//! 2. `~/.config/maildedup/config.toml` (Linux/macOS)
//!    `%APPDATA%\maildedup\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Every field is validated at construction time; unknown fields in the TOML
//! file are rejected.

use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;

use crate::action::Action;
use crate::dedupe::strategy::Strategy;
use crate::error::{DedupError, Result};
use crate::mailbox::BoxFormat;

/// Headers used to compute the hash of a mail when none are configured.
///
/// `Cc`, `Bcc` and `Reply-To` are deliberately absent: mailing-list servers
/// rewrite them between the copy saved at send-time and the copy reflected
/// back by the list, which would defeat duplicate detection.
pub const DEFAULT_HASH_HEADERS: [&str; 10] = [
    "date",
    "from",
    "to",
    "subject",
    "mime-version",
    "content-type",
    "content-disposition",
    "user-agent",
    "x-priority",
    "message-id",
];

/// Maximum allowed difference in bytes between the payload sizes of two mails
/// of the same duplicate set. Headers are not counted: transport hops and
/// list servers add headers freely, but a large payload divergence points to
/// corruption or a false positive. The default leaves room for list footers.
pub const DEFAULT_SIZE_THRESHOLD: i64 = 512;

/// Maximum allowed unified-diff size in bytes between the normalized bodies
/// of two mails of the same duplicate set.
pub const DEFAULT_CONTENT_THRESHOLD: i64 = 768;

/// How the body of a mail participates in its identity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BodyHash {
    /// Headers only; the body is ignored.
    #[default]
    Skip,
    /// Hash the decoded body lines as-is.
    Raw,
    /// Strip all whitespace from every line before hashing. Robust against
    /// reflow and footer differences, at the cost of false negatives.
    Normalized,
}

/// Source of a mail's reference time, for time-based strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TimeSource {
    /// RFC 5322 `Date` header, parsed to UTC.
    DateHeader,
    /// Filesystem change time of the mail's file.
    Ctime,
}

/// Read-only configuration shared by every engine component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered, lowercased, deduplicated list of headers to hash.
    pub hash_headers: Vec<String>,
    /// Body participation in the identity hash.
    pub hash_body: BodyHash,
    /// Size safety threshold in bytes; -1 disables the check.
    pub size_threshold: i64,
    /// Content safety threshold in bytes; -1 disables the check.
    pub content_threshold: i64,
    /// Reference-time source. Required by time-based strategies.
    pub time_source: Option<TimeSource>,
    /// Selection strategy. Without one, sets are grouped and reported only.
    pub strategy: Option<Strategy>,
    /// Compiled path pattern. Required by path-based strategies.
    pub regexp: Option<Regex>,
    /// Action to perform on the final selection.
    pub action: Option<Action>,
    /// Destination container for copy/move actions.
    pub export: Option<PathBuf>,
    /// Format of the destination container.
    pub export_format: BoxFormat,
    /// Append to an existing destination instead of refusing to overwrite.
    pub export_append: bool,
    /// Force the format of input sources instead of autodetecting.
    pub input_format: Option<BoxFormat>,
    /// Account for everything but mutate nothing.
    pub dry_run: bool,
    /// Log the unified diff of mails exceeding the content threshold.
    pub show_diff: bool,
    /// Seed for the quantity-based strategies.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_headers: DEFAULT_HASH_HEADERS.iter().map(|h| h.to_string()).collect(),
            hash_body: BodyHash::Skip,
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            content_threshold: DEFAULT_CONTENT_THRESHOLD,
            time_source: None,
            strategy: None,
            regexp: None,
            action: None,
            export: None,
            export_format: BoxFormat::Mbox,
            export_append: false,
            input_format: None,
            dry_run: false,
            show_diff: false,
            seed: 0,
        }
    }
}

impl Config {
    /// Validate field values and inter-option coupling.
    ///
    /// Called once after construction; the engine assumes a validated config.
    pub fn validate(&self) -> Result<()> {
        if self.hash_headers.is_empty() {
            return Err(DedupError::Config("empty hash-header list".into()));
        }
        for header in &self.hash_headers {
            validate_header_name(header)?;
        }

        if self.size_threshold < -1 {
            return Err(DedupError::Config(format!(
                "size threshold must be -1 or above, got {}",
                self.size_threshold
            )));
        }
        if self.content_threshold < -1 {
            return Err(DedupError::Config(format!(
                "content threshold must be -1 or above, got {}",
                self.content_threshold
            )));
        }

        // Strategies requiring a parameter must have it, and a parameter
        // without a strategy requiring it is a likely user error.
        if let Some(strategy) = self.strategy {
            if strategy.is_time_based() && self.time_source.is_none() {
                return Err(DedupError::Config(format!(
                    "{strategy} strategy requires a time source"
                )));
            }
            if strategy.is_path_based() && self.regexp.is_none() {
                return Err(DedupError::Config(format!(
                    "{strategy} strategy requires a path regexp"
                )));
            }
            if !strategy.is_path_based() && self.regexp.is_some() {
                return Err(DedupError::Config(format!(
                    "path regexp not allowed with the {strategy} strategy"
                )));
            }
        } else if self.regexp.is_some() {
            return Err(DedupError::Config(
                "path regexp provided without a path-based strategy".into(),
            ));
        }

        if let Some(action) = self.action {
            if action.needs_export() && self.export.is_none() {
                return Err(DedupError::Config(format!(
                    "{action} action requires an export destination"
                )));
            }
        }

        Ok(())
    }
}

/// Lowercase, trim and deduplicate a user-supplied header list, preserving
/// first-occurrence order.
pub fn normalize_hash_headers(names: &[String]) -> Result<Vec<String>> {
    let mut seen = Vec::new();
    for name in names {
        let name = name.trim().to_lowercase();
        validate_header_name(&name)?;
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    Ok(seen)
}

/// Header names must stay within the printable-ASCII range RFC 5322 allows.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DedupError::Config("empty header name".into()));
    }
    for byte in name.bytes() {
        if !(33..=126).contains(&byte) {
            return Err(DedupError::Config(format!(
                "invalid character {byte:#04x} in header name {name:?}"
            )));
        }
    }
    Ok(())
}

// ── Optional TOML defaults ──────────────────────────────────────

/// Defaults loadable from a TOML file, overridden by CLI flags.
///
/// Unknown fields are a hard error: a typo in the config file must not
/// silently fall back to defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Default hash-header list.
    pub hash_headers: Option<Vec<String>>,
    /// Default body-hash mode.
    pub hash_body: Option<BodyHash>,
    /// Default size threshold.
    pub size_threshold: Option<i64>,
    /// Default content threshold.
    pub content_threshold: Option<i64>,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: Option<String>,
}

/// Load file defaults, searching standard locations.
///
/// A missing file yields built-in defaults; a malformed file is an error so
/// that misconfiguration never goes unnoticed.
pub fn load_file_config() -> Result<FileConfig> {
    let Some(path) = config_file_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| DedupError::io(&path, e))?;
    let cfg: FileConfig = toml::from_str(&contents)
        .map_err(|e| DedupError::Config(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "Loaded config defaults");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILDEDUP_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("maildedup").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(file_config: &FileConfig) -> PathBuf {
    if let Some(ref dir) = file_config.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maildedup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let conf = Config::default();
        assert!(conf.validate().is_ok());
        assert_eq!(conf.hash_headers.len(), 10);
        assert_eq!(conf.size_threshold, DEFAULT_SIZE_THRESHOLD);
        assert_eq!(conf.content_threshold, DEFAULT_CONTENT_THRESHOLD);
        assert_eq!(conf.hash_body, BodyHash::Skip);
    }

    #[test]
    fn test_normalize_hash_headers() {
        let names = vec![
            "Message-ID".to_string(),
            "Date".to_string(),
            "message-id".to_string(),
            " From ".to_string(),
        ];
        let normalized = normalize_hash_headers(&names).unwrap();
        assert_eq!(normalized, vec!["message-id", "date", "from"]);
    }

    #[test]
    fn test_header_name_out_of_range() {
        let names = vec!["x priority".to_string()];
        assert!(normalize_hash_headers(&names).is_err());
        let names = vec!["café".to_string()];
        assert!(normalize_hash_headers(&names).is_err());
    }

    #[test]
    fn test_threshold_below_sentinel_rejected() {
        let conf = Config {
            size_threshold: -2,
            ..Config::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_time_strategy_requires_time_source() {
        let conf = Config {
            strategy: Some(Strategy::SelectNewest),
            ..Config::default()
        };
        assert!(conf.validate().is_err());

        let conf = Config {
            strategy: Some(Strategy::SelectNewest),
            time_source: Some(TimeSource::DateHeader),
            ..Config::default()
        };
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_path_strategy_requires_regexp() {
        let conf = Config {
            strategy: Some(Strategy::SelectMatchingPath),
            ..Config::default()
        };
        assert!(conf.validate().is_err());

        let conf = Config {
            strategy: Some(Strategy::SelectMatchingPath),
            regexp: Some(Regex::new(r"cur/").unwrap()),
            ..Config::default()
        };
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_regexp_without_path_strategy_rejected() {
        let conf = Config {
            strategy: Some(Strategy::SelectSmaller),
            regexp: Some(Regex::new(r".*").unwrap()),
            ..Config::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_file_config_rejects_unknown_fields() {
        let parsed: std::result::Result<FileConfig, _> = toml::from_str("strateggy = \"x\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_file_config_partial() {
        let cfg: FileConfig = toml::from_str("size_threshold = 1024\n").unwrap();
        assert_eq!(cfg.size_threshold, Some(1024));
        assert!(cfg.hash_headers.is_none());
    }
}
