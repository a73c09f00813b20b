//! Session storage backends.
//!
//! Each backend implements [`SessionProvider`] (defined in [`traits`]) and is
//! registered by its canonical name in [`register_builtin_providers`]. The
//! [`registry`] hands out fresh provider instances by name.
//!
//! # Extension
//!
//! To add a backend, implement [`SessionProvider`] and [`SessionStore`] in a
//! new submodule, then either add it to [`register_builtin_providers`] or call
//! [`register_provider`] at startup.

pub mod config;
pub mod file;
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod registry;
pub mod sqlite;
pub mod traits;

pub use file::FileProvider;
pub use memory::MemoryProvider;
#[cfg(feature = "redis-backend")]
pub use redis::RedisProvider;
pub use registry::{global, register_provider, ProviderFactory, ProviderRegistry};
pub use sqlite::SqliteProvider;
pub use traits::{GcPolicy, SessionProvider, SessionStore};

/// Add every backend compiled into this build to `registry`.
pub fn register_builtin_providers(registry: &ProviderRegistry) {
    registry.register("file", || Box::new(FileProvider::new()));
    registry.register("memory", || Box::new(MemoryProvider::new()));
    registry.register("sqlite", || Box::new(SqliteProvider::new()));
    #[cfg(feature = "redis-backend")]
    registry.register("redis", || Box::new(RedisProvider::new()));
}

/// Static description of a built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"file"`)
    pub name: &'static str,
    pub description: &'static str,
    /// Example `provider_config` value
    pub config_example: &'static str,
    pub gc_policy: GcPolicy,
    /// Whether this build includes the backend
    pub available: bool,
}

/// Every built-in backend, for display in `sessionkit providers`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "file",
            description: "One file per session under a directory",
            config_example: "~/.sessionkit/sessions",
            gc_policy: GcPolicy::Sweep,
            available: true,
        },
        ProviderInfo {
            name: "memory",
            description: "Process memory; lost on restart",
            config_example: "",
            gc_policy: GcPolicy::Sweep,
            available: true,
        },
        ProviderInfo {
            name: "sqlite",
            description: "SQLite table (session_key, session_data, session_expiry)",
            config_example: "~/.sessionkit/sessions.db,session,5",
            gc_policy: GcPolicy::Sweep,
            available: true,
        },
        ProviderInfo {
            name: "redis",
            description: "Redis keys with server-side TTL",
            config_example: "127.0.0.1:6379,100,,0",
            gc_policy: GcPolicy::ServerTtl,
            available: cfg!(feature = "redis-backend"),
        },
    ]
}
