//! Name-keyed provider registry.
//!
//! Stores provider factories and creates fresh, uninitialized providers on
//! demand. Each manager gets its own provider instance so `init` can run
//! before the provider is shared.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::traits::SessionProvider;
use crate::session::error::{Result, SessionError};

/// Builds an uninitialized provider.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn SessionProvider> + Send + Sync>;

/// Registry of session backends by name.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl ProviderRegistry {
    /// Empty registry with no backends.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with every built-in backend.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        super::register_builtin_providers(&registry);
        registry
    }

    /// Add a backend under `name`.
    ///
    /// # Panics
    ///
    /// Registering the same name twice is a programming error and panics.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SessionProvider> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        assert!(
            !factories.contains_key(name),
            "session provider {name:?} registered twice"
        );
        factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Fresh provider for `name`, or `UnknownProvider`.
    pub fn lookup(&self, name: &str) -> Result<Box<dyn SessionProvider>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownProvider(name.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry, populated with the built-in backends on first use.
pub fn global() -> &'static ProviderRegistry {
    static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
    GLOBAL.get_or_init(ProviderRegistry::with_builtins)
}

/// Register an additional backend in the process-wide registry.
///
/// # Panics
///
/// Panics when `name` is already registered.
pub fn register_provider<F>(name: &str, factory: F)
where
    F: Fn() -> Box<dyn SessionProvider> + Send + Sync + 'static,
{
    global().register(name, factory);
}
