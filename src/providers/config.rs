//! Provider configuration strings.
//!
//! Two syntaxes are accepted for backward compatibility: a legacy
//! comma-delimited positional string (`127.0.0.1:6379,100,secret,0`) and a
//! JSON object with named fields. A string whose first non-whitespace
//! character is `{` is parsed as JSON exclusively; anything else goes through
//! the positional parser, where missing or malformed fields take defaults.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::session::error::{Result, SessionError};

/// Pool size used when the positional field is missing, negative or zero.
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Which of the two syntaxes a configuration string uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSyntax<'a> {
    Structured(&'a str),
    Positional(Vec<&'a str>),
}

impl<'a> ConfigSyntax<'a> {
    pub fn detect(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            Self::Structured(trimmed)
        } else if trimmed.is_empty() {
            Self::Positional(Vec::new())
        } else {
            Self::Positional(trimmed.split(',').map(str::trim).collect())
        }
    }
}

/// Deserialize the structured form, mapping failures to `Config` errors.
pub fn parse_structured<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| SessionError::config(format!("invalid provider config JSON: {e}")))
}

/// Positional field `idx`, treating empty fields as absent.
pub fn field<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields.get(idx).copied().filter(|f| !f.is_empty())
}

/// Parse a duration written like `300ms`, `1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted. Negative durations are rejected.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    let invalid = || SessionError::config(format!("invalid duration {raw:?}"));

    if s.is_empty() {
        return Err(invalid());
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(SessionError::config(format!(
            "negative duration {raw:?} is not allowed"
        )));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_end].parse().map_err(|_| invalid())?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(invalid()),
        };
        total_nanos += value * nanos_per_unit;
        rest = &rest[unit_end..];
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Optional duration field from the structured form; empty means unset.
fn optional_duration(raw: Option<&str>) -> Result<Option<Duration>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_duration(s).map(Some),
    }
}

/// Positional whole-second field; ignored unless a positive integer.
fn positional_secs(fields: &[&str], idx: usize) -> Option<Duration> {
    field(fields, idx)
        .and_then(|f| f.parse::<i64>().ok())
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs.unsigned_abs()))
}

// ── Remote cache (redis-style) ───────────────────────────────────

/// Connection settings for remote key/value cache backends.
///
/// Positional form: `addr[;addr...],poolsize,password,db_num,idle_timeout_secs,idle_check_frequency_secs,max_retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCacheConfig {
    /// One or more `host:port` addresses separated by `;`.
    pub save_path: String,
    pub pool_size: usize,
    pub password: String,
    pub db_num: u32,
    pub idle_timeout: Option<Duration>,
    pub idle_check_frequency: Option<Duration>,
    pub max_retries: u32,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            save_path: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
            password: String::new(),
            db_num: 0,
            idle_timeout: None,
            idle_check_frequency: None,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteCacheJson {
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    poolsize: Option<usize>,
    #[serde(default)]
    password: String,
    #[serde(default)]
    db_num: u32,
    #[serde(default)]
    idle_timeout: Option<String>,
    #[serde(default)]
    idle_check_frequency: Option<String>,
    #[serde(default)]
    max_retries: u32,
}

impl RemoteCacheConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        match ConfigSyntax::detect(raw) {
            ConfigSyntax::Structured(json) => {
                let parsed: RemoteCacheJson = parse_structured(json)?;
                Ok(Self {
                    save_path: parsed.save_path,
                    pool_size: parsed.poolsize.unwrap_or(DEFAULT_POOL_SIZE),
                    password: parsed.password,
                    db_num: parsed.db_num,
                    idle_timeout: optional_duration(parsed.idle_timeout.as_deref())?,
                    idle_check_frequency: optional_duration(
                        parsed.idle_check_frequency.as_deref(),
                    )?,
                    max_retries: parsed.max_retries,
                })
            }
            ConfigSyntax::Positional(fields) => Ok(Self::from_positional(&fields)),
        }
    }

    fn from_positional(fields: &[&str]) -> Self {
        let defaults = Self::default();
        Self {
            save_path: field(fields, 0).unwrap_or_default().to_string(),
            pool_size: field(fields, 1)
                .and_then(|f| f.parse::<usize>().ok())
                .unwrap_or(defaults.pool_size),
            password: field(fields, 2).unwrap_or_default().to_string(),
            db_num: field(fields, 3)
                .and_then(|f| f.parse::<u32>().ok())
                .unwrap_or(defaults.db_num),
            idle_timeout: positional_secs(fields, 4),
            idle_check_frequency: positional_secs(fields, 5),
            max_retries: field(fields, 6)
                .and_then(|f| f.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    /// Individual node addresses.
    pub fn addresses(&self) -> Vec<&str> {
        self.save_path
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// `redis://` connection URL for one node, carrying the password and
    /// database number.
    fn node_url(&self, addr: &str) -> String {
        format!("{}/{}", self.node_base_url(addr), self.db_num)
    }

    fn node_base_url(&self, addr: &str) -> String {
        let (scheme, addr) = if let Some(rest) = addr.strip_prefix("rediss://") {
            ("rediss", rest)
        } else {
            ("redis", addr.strip_prefix("redis://").unwrap_or(addr))
        };
        if self.password.is_empty() {
            format!("{scheme}://{addr}")
        } else {
            format!("{scheme}://:{}@{addr}", self.password)
        }
    }

    /// One connection URL per configured address.
    pub fn urls(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = self
            .addresses()
            .into_iter()
            .map(|addr| self.node_url(addr))
            .collect();
        if urls.is_empty() {
            return Err(SessionError::config("remote cache requires an address"));
        }
        Ok(urls)
    }

    /// Node URLs for cluster mode, which has no database selection.
    pub fn cluster_urls(&self) -> Vec<String> {
        self.addresses()
            .into_iter()
            .map(|addr| self.node_base_url(addr))
            .collect()
    }

    /// Connection URL for the first address.
    pub fn url(&self) -> Result<String> {
        self.urls()?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::config("remote cache requires an address"))
    }
}

// ── Filesystem ───────────────────────────────────────────────────

/// Settings for the file backend: just the directory holding session files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfig {
    pub save_path: String,
}

#[derive(Debug, Deserialize)]
struct FileJson {
    save_path: String,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let save_path = match ConfigSyntax::detect(raw) {
            ConfigSyntax::Structured(json) => parse_structured::<FileJson>(json)?.save_path,
            // Paths may legitimately contain commas, so take the whole string.
            ConfigSyntax::Positional(_) => raw.trim().to_string(),
        };
        if save_path.trim().is_empty() {
            return Err(SessionError::config("file provider requires a save path"));
        }
        Ok(Self { save_path })
    }
}

// ── SQL ──────────────────────────────────────────────────────────

pub const DEFAULT_TABLE_NAME: &str = "session";

/// Settings for the SQL backend.
///
/// Positional form: `path[,table[,busy_timeout_secs]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    pub table: String,
    pub busy_timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct SqlJson {
    path: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    busy_timeout: Option<String>,
}

impl SqlConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let config = match ConfigSyntax::detect(raw) {
            ConfigSyntax::Structured(json) => {
                let parsed: SqlJson = parse_structured(json)?;
                Self {
                    path: parsed.path,
                    table: parsed
                        .table
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
                    busy_timeout: optional_duration(parsed.busy_timeout.as_deref())?,
                }
            }
            ConfigSyntax::Positional(fields) => Self {
                path: field(&fields, 0).unwrap_or_default().to_string(),
                table: field(&fields, 1)
                    .unwrap_or(DEFAULT_TABLE_NAME)
                    .to_string(),
                busy_timeout: positional_secs(&fields, 2),
            },
        };

        if config.path.trim().is_empty() {
            return Err(SessionError::config("sqlite provider requires a database path"));
        }
        if !config
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SessionError::config(format!(
                "invalid table name {:?}",
                config.table
            )));
        }
        Ok(config)
    }
}
