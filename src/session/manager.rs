//! Session manager: resolves or mints identifiers and drives the provider.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::error::{Result, SessionError};
use super::id::{generate_session_id, redact, validate_session_id, DEFAULT_SESSION_ID_LENGTH};
use super::transport::{SameSite, SessionCookie, Transport};
use crate::providers::registry::{self, ProviderRegistry};
use crate::providers::traits::{GcPolicy, SessionProvider, SessionStore};

/// Manager settings: cookie attributes, lifetimes and id transport options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Cookie (and query parameter) name carrying the session id.
    pub cookie_name: String,
    pub enable_set_cookie: bool,
    /// Seconds between GC sweeps.
    pub gc_lifetime: u64,
    /// Seconds of inactivity after which a session expires. `0` falls back
    /// to `gc_lifetime`.
    pub max_lifetime: u64,
    pub disable_http_only: bool,
    /// Mark the cookie `Secure` when the request arrived over TLS.
    pub secure: bool,
    /// Cookie `Max-Age` in seconds; `0` makes a browser-session cookie.
    pub cookie_lifetime: u64,
    /// Backend-specific connection string, see [`crate::providers::config`].
    pub provider_config: String,
    pub domain: String,
    /// Random bytes per minted id.
    pub session_id_length: usize,
    pub session_id_prefix: String,
    pub enable_sid_in_http_header: bool,
    pub session_name_in_http_header: String,
    pub enable_sid_in_url_query: bool,
    pub cookie_same_site: SameSite,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionkit_sid".into(),
            enable_set_cookie: true,
            gc_lifetime: 3600,
            max_lifetime: 3600,
            disable_http_only: false,
            secure: false,
            cookie_lifetime: 0,
            provider_config: String::new(),
            domain: String::new(),
            session_id_length: DEFAULT_SESSION_ID_LENGTH,
            session_id_prefix: String::new(),
            enable_sid_in_http_header: false,
            session_name_in_http_header: String::new(),
            enable_sid_in_url_query: false,
            cookie_same_site: SameSite::Default,
        }
    }
}

fn is_header_token(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`'
                        | '|' | '~'
                )
        })
}

impl ManagerConfig {
    /// Apply the `max_lifetime == 0` fallback, then check invariants.
    pub fn normalized(mut self) -> Result<Self> {
        if self.max_lifetime == 0 {
            self.max_lifetime = self.gc_lifetime;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cookie_name.trim().is_empty() {
            return Err(SessionError::config("cookie_name must not be empty"));
        }
        if self.gc_lifetime == 0 {
            return Err(SessionError::config("gc_lifetime must be greater than 0"));
        }
        if self.max_lifetime == 0 {
            return Err(SessionError::config("max_lifetime must be greater than 0"));
        }
        if self.session_id_length == 0 {
            return Err(SessionError::config(
                "session_id_length must be at least 1",
            ));
        }
        if self.enable_sid_in_http_header && !is_header_token(&self.session_name_in_http_header)
        {
            return Err(SessionError::config(format!(
                "session_name_in_http_header {:?} is not a valid header name",
                self.session_name_in_http_header
            )));
        }
        Ok(())
    }
}

/// Orchestrates one initialized provider.
pub struct Manager {
    provider: Arc<dyn SessionProvider>,
    config: ManagerConfig,
}

impl Manager {
    /// Build a manager over the named backend from the process-wide registry.
    pub async fn new(provider_name: &str, config: ManagerConfig) -> Result<Self> {
        Self::with_registry(registry::global(), provider_name, config).await
    }

    pub async fn with_registry(
        registry: &ProviderRegistry,
        provider_name: &str,
        config: ManagerConfig,
    ) -> Result<Self> {
        let config = config.normalized()?;
        let mut provider = registry.lookup(provider_name)?;
        provider
            .init(config.max_lifetime, &config.provider_config)
            .await?;
        tracing::info!(
            provider = provider_name,
            max_lifetime = config.max_lifetime,
            gc_lifetime = config.gc_lifetime,
            "Session manager created"
        );
        Ok(Self {
            provider: Arc::from(provider),
            config,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    pub fn gc_policy(&self) -> GcPolicy {
        self.provider.gc_policy()
    }

    /// Session id carried by the request: cookie, then query, then header.
    fn inbound_session_id(&self, transport: &dyn Transport) -> Option<String> {
        let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());

        non_empty(transport.cookie(&self.config.cookie_name))
            .or_else(|| {
                self.config
                    .enable_sid_in_url_query
                    .then(|| non_empty(transport.query(&self.config.cookie_name)))
                    .flatten()
            })
            .or_else(|| {
                self.config
                    .enable_sid_in_http_header
                    .then(|| non_empty(transport.header(&self.config.session_name_in_http_header)))
                    .flatten()
            })
    }

    fn mint_session_id(&self) -> Result<String> {
        generate_session_id(
            &self.config.session_id_prefix,
            self.config.session_id_length,
        )
    }

    fn session_cookie(&self, transport: &dyn Transport, value: &str, max_age: Option<u64>) -> SessionCookie {
        SessionCookie {
            name: self.config.cookie_name.clone(),
            value: value.to_string(),
            path: "/".into(),
            domain: (!self.config.domain.is_empty()).then(|| self.config.domain.clone()),
            http_only: !self.config.disable_http_only,
            secure: self.is_secure(transport),
            max_age,
            same_site: self.config.cookie_same_site,
        }
    }

    /// Write `sid` to the outbound response per the cookie/header settings.
    fn emit_session_id(&self, transport: &mut dyn Transport, sid: &str) {
        let max_age = (self.config.cookie_lifetime > 0).then_some(self.config.cookie_lifetime);
        let cookie = self.session_cookie(transport, sid, max_age);
        if self.config.enable_set_cookie {
            transport.set_cookie(cookie);
        }
        if self.config.enable_sid_in_http_header {
            transport.set_header(&self.config.session_name_in_http_header, sid);
        }
    }

    /// Resume the request's session if it is still alive, otherwise start a
    /// new one and hand its id back to the client.
    pub async fn start(&self, transport: &mut dyn Transport) -> Result<Arc<dyn SessionStore>> {
        if let Some(sid) = self.inbound_session_id(transport) {
            if validate_session_id(&sid).is_ok() && self.provider.exists(&sid).await? {
                tracing::debug!(sid = %redact(&sid), "Session resumed");
                return self.provider.read(&sid).await;
            }
        }

        let sid = self.mint_session_id()?;
        let store = self.provider.read(&sid).await?;
        self.emit_session_id(transport, &sid);
        tracing::debug!(sid = %redact(&sid), "Session started");
        Ok(store)
    }

    /// Destroy the request's session and expire its cookie.
    pub async fn destroy(&self, transport: &mut dyn Transport) -> Result<()> {
        let Some(sid) = self.inbound_session_id(transport) else {
            return Ok(());
        };
        if validate_session_id(&sid).is_ok() {
            self.provider.destroy(&sid).await?;
            tracing::debug!(sid = %redact(&sid), "Session destroyed");
        }
        if self.config.enable_set_cookie {
            let cookie = self.session_cookie(transport, "", Some(0));
            transport.set_cookie(cookie);
        }
        Ok(())
    }

    /// Move the request's session to a freshly minted id.
    pub async fn regenerate_id(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<Arc<dyn SessionStore>> {
        let sid = self.mint_session_id()?;
        let store = match self
            .inbound_session_id(transport)
            .filter(|old| validate_session_id(old).is_ok())
        {
            Some(old) => {
                let store = self.provider.regenerate(&old, &sid).await?;
                tracing::debug!(old = %redact(&old), sid = %redact(&sid), "Session id regenerated");
                store
            }
            None => self.provider.read(&sid).await?,
        };
        self.emit_session_id(transport, &sid);
        Ok(store)
    }

    /// Direct access to a session by id.
    pub async fn get_session_store(&self, sid: &str) -> Result<Arc<dyn SessionStore>> {
        self.provider.read(sid).await
    }

    /// Backend's session count; always `0` for server-TTL backends.
    pub async fn active_session_count(&self) -> Result<usize> {
        self.provider.count().await
    }

    /// One GC sweep. Failures are logged, never returned.
    pub async fn gc(&self) {
        if let Err(e) = self.provider.gc().await {
            tracing::warn!(provider = self.provider.name(), error = %e, "Session GC failed");
        }
    }

    /// Sweep immediately, then every `gc_lifetime` seconds until `shutdown`
    /// becomes `true` or its sender is dropped.
    pub async fn gc_loop(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.gc_lifetime));
        tracing::info!(
            provider = self.provider.name(),
            every_secs = self.config.gc_lifetime,
            "Session GC loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.gc().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(provider = self.provider.name(), "Session GC loop stopped");
    }

    /// Whether the session cookie should carry `Secure`.
    pub fn is_secure(&self, transport: &dyn Transport) -> bool {
        self.config.secure && transport.is_tls()
    }
}
