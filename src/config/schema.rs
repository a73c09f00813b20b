use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::session::ManagerConfig;

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "SESSIONKIT_CONFIG";

// ── Top-level config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    /// Path the config was loaded from / will be saved to. Computed, never
    /// serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub session: SessionConfig,
}

/// `[session]` section: backend name plus every manager setting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Registered backend name (`file`, `memory`, `sqlite`, `redis`).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(flatten)]
    pub manager: ManagerConfig,
}

fn default_provider() -> String {
    "file".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            manager: ManagerConfig {
                provider_config: "~/.sessionkit/sessions".into(),
                ..ManagerConfig::default()
            },
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".sessionkit"))
}

/// Config file location: explicit path, then `SESSIONKIT_CONFIG`, then
/// `~/.sessionkit/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand_path(path));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(expand_path(Path::new(&path)));
        }
    }
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load the config file, writing defaults first if it does not exist,
    /// then apply environment overrides and validate.
    pub async fn load_or_init(explicit: Option<&Path>) -> Result<Self> {
        let config_path = resolve_config_path(explicit)?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;

            config.apply_env_overrides();
            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                provider = %config.session.provider,
                initialized = false,
                "Config loaded"
            );
            Ok(config)
        } else {
            let mut config = Config {
                config_path,
                ..Config::default()
            };
            config.save().await?;

            config.apply_env_overrides();
            config.validate()?;
            tracing::info!(
                path = %config.config_path.display(),
                provider = %config.session.provider,
                initialized = true,
                "Config loaded"
            );
            Ok(config)
        }
    }

    /// Validate configuration values that would fail manager construction.
    pub fn validate(&self) -> Result<()> {
        if self.session.provider.trim().is_empty() {
            anyhow::bail!("session.provider must not be empty");
        }
        let registry = crate::providers::registry::global();
        if !registry.contains(&self.session.provider) {
            anyhow::bail!(
                "session.provider {:?} is not registered (available: {})",
                self.session.provider,
                registry.names().join(", ")
            );
        }
        self.session
            .manager
            .clone()
            .normalized()
            .context("Invalid [session] configuration")?;
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let session = &mut self.session;

        if let Some(provider) = non_empty("SESSIONKIT_PROVIDER") {
            session.provider = provider;
        }
        if let Some(provider_config) = non_empty("SESSIONKIT_PROVIDER_CONFIG") {
            session.manager.provider_config = provider_config;
        }
        if let Some(name) = non_empty("SESSIONKIT_COOKIE_NAME") {
            session.manager.cookie_name = name;
        }

        for (key, target) in [
            ("SESSIONKIT_MAX_LIFETIME", &mut session.manager.max_lifetime),
            ("SESSIONKIT_GC_LIFETIME", &mut session.manager.gc_lifetime),
        ] {
            if let Some(raw) = non_empty(key) {
                match raw.trim().parse::<u64>() {
                    Ok(secs) => *target = secs,
                    Err(_) => tracing::warn!(key, value = %raw, "Ignoring non-numeric override"),
                }
            }
        }

        if let Some(raw) = non_empty("SESSIONKIT_SECURE") {
            match parse_flag(&raw) {
                Some(secure) => session.manager.secure = secure,
                None => tracing::warn!(value = %raw, "Ignoring invalid SESSIONKIT_SECURE"),
            }
        }
    }

    /// Write the config through a temp file in the same directory, so a
    /// failed save leaves the previous file untouched.
    pub async fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let temp_path = dir.join(format!(".{CONFIG_FILE_NAME}.tmp-{}", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(contents.as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &self.config_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e).with_context(|| {
                format!("Failed to write config file {}", self.config_path.display())
            });
        }

        // Persist the rename itself.
        #[cfg(unix)]
        fs::File::open(dir).await?.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SameSite;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.session.provider, "file");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn session_section_parses_flat_manager_fields() {
        let config: Config = toml::from_str(
            r#"
            [session]
            provider = "sqlite"
            provider_config = "/tmp/s.db,web_sessions"
            cookie_name = "sid"
            max_lifetime = 600
            cookie_same_site = "lax"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.provider, "sqlite");
        assert_eq!(config.session.manager.provider_config, "/tmp/s.db,web_sessions");
        assert_eq!(config.session.manager.cookie_name, "sid");
        assert_eq!(config.session.manager.max_lifetime, 600);
        assert_eq!(config.session.manager.gc_lifetime, 3600);
        assert_eq!(config.session.manager.cookie_same_site, SameSite::Lax);
    }

    #[test]
    fn validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.session.provider = "carrier_pigeon".into();
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("not registered"));
    }

    #[test]
    fn validate_rejects_bad_manager_settings() {
        let mut config = Config::default();
        config.session.manager.cookie_name = String::new();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn zero_max_lifetime_falls_back_to_gc_lifetime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nprovider = \"memory\"\nmax_lifetime = 0\ngc_lifetime = 120\n",
        )
        .unwrap();

        let config = Config::load_or_init(Some(&path)).await.unwrap();
        assert_eq!(config.session.manager.max_lifetime, 0);
        let effective = config.session.manager.clone().normalized().unwrap();
        assert_eq!(effective.max_lifetime, 120);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides_from(overrides(&[
            ("SESSIONKIT_PROVIDER", "memory"),
            ("SESSIONKIT_PROVIDER_CONFIG", "/var/sessions"),
            ("SESSIONKIT_MAX_LIFETIME", "90"),
            ("SESSIONKIT_GC_LIFETIME", "30"),
            ("SESSIONKIT_COOKIE_NAME", "my_sid"),
            ("SESSIONKIT_SECURE", "yes"),
        ]));
        let s = &config.session;
        assert_eq!(s.provider, "memory");
        assert_eq!(s.manager.provider_config, "/var/sessions");
        assert_eq!(s.manager.max_lifetime, 90);
        assert_eq!(s.manager.gc_lifetime, 30);
        assert_eq!(s.manager.cookie_name, "my_sid");
        assert!(s.manager.secure);
    }

    #[test]
    fn invalid_env_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(overrides(&[
            ("SESSIONKIT_PROVIDER", "  "),
            ("SESSIONKIT_MAX_LIFETIME", "forever"),
            ("SESSIONKIT_SECURE", "maybe"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn load_or_init_writes_defaults_then_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let created = Config::load_or_init(Some(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(created.config_path, path);

        let reloaded = Config::load_or_init(Some(&path)).await.unwrap();
        assert_eq!(reloaded.session.provider, created.session.provider);
        assert_eq!(reloaded.session.manager, created.session.manager);
    }

    #[tokio::test]
    async fn save_replaces_existing_file_atomically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = Config {
            config_path: path.clone(),
            ..Config::default()
        };
        config.save().await.unwrap();

        config.session.manager.cookie_name = "rotated".into();
        config.save().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("rotated"));
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
