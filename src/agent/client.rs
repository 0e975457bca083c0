//! Provider factory, ordered provider pool, and the preferred-provider cache.
//!
//! Selection reads the process-wide preference first. On a miss, candidates
//! are health-checked in configured order and the first healthy one is
//! recorded. A timeout anywhere in a turn invalidates the preference so the
//! next turn selects again.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::config::AgentConfig;
use crate::agent::provider::LlmProvider;
use crate::error::AgentError;

/// Lifetime of the shared preference entry.
pub const PREFERENCE_TTL: Duration = Duration::from_secs(30 * 60);

/// Process-wide "which provider worked last" entry.
#[async_trait]
pub trait ProviderPreference: Send + Sync {
    /// Preferred provider name, if set and not expired.
    async fn get(&self) -> Option<String>;

    /// Records `provider` as preferred.
    async fn set(&self, provider: &str);

    /// Clears the entry.
    async fn invalidate(&self);
}

/// In-process [`ProviderPreference`] with a TTL.
#[derive(Debug)]
pub struct InMemoryPreference {
    entry: RwLock<Option<(String, Instant)>>,
    ttl: Duration,
}

impl InMemoryPreference {
    /// Creates an empty preference whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// The process-wide instance.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<InMemoryPreference>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new(PREFERENCE_TTL))))
    }
}

#[async_trait]
impl ProviderPreference for InMemoryPreference {
    async fn get(&self) -> Option<String> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(name, _)| name.clone())
    }

    async fn set(&self, provider: &str) {
        *self.entry.write().await = Some((provider.to_string(), Instant::now()));
    }

    async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

/// Creates the provider called `name`.
///
/// # Supported Providers
///
/// - `"openai"`: hosted `OpenAI` or `base_url`
/// - `"ollama"`: the `OpenAI`-compatible endpoint at `ollama_url`
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for unknown names, or when the
/// crate was built without the `openai` feature.
pub fn create_provider(
    name: &str,
    config: &AgentConfig,
) -> Result<Arc<dyn LlmProvider>, AgentError> {
    #[cfg(feature = "openai")]
    {
        use crate::agent::providers::OpenAiProvider;
        match name {
            "openai" => {
                return Ok(Arc::new(OpenAiProvider::new(
                    "openai",
                    config.api_key.as_deref(),
                    config.base_url.as_deref(),
                    config.timeout,
                )));
            }
            "ollama" => {
                return Ok(Arc::new(OpenAiProvider::new(
                    "ollama",
                    None,
                    Some(&config.ollama_url),
                    config.timeout,
                )));
            }
            _ => {}
        }
    }
    #[cfg(not(feature = "openai"))]
    let _ = config;

    Err(AgentError::UnsupportedProvider {
        name: name.to_string(),
    })
}

/// Ordered providers sharing one preference entry.
#[derive(Clone)]
pub struct ProviderPool {
    providers: Vec<Arc<dyn LlmProvider>>,
    preference: Arc<dyn ProviderPreference>,
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderPool")
            .field("providers", &names)
            .finish_non_exhaustive()
    }
}

impl ProviderPool {
    /// Creates a pool over `providers`, tried in order.
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        preference: Arc<dyn ProviderPreference>,
    ) -> Self {
        Self {
            providers,
            preference,
        }
    }

    /// Builds the configured providers around the shared preference.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] for an unknown name.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let providers = config
            .provider_order()
            .into_iter()
            .map(|name| create_provider(name, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers, InMemoryPreference::shared()))
    }

    /// Providers in selection order.
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    /// Picks the provider for a turn.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoProvider`] when every candidate fails its
    /// health check.
    pub async fn select(&self) -> Result<Arc<dyn LlmProvider>, AgentError> {
        if let Some(preferred) = self.preference.get().await
            && let Some(provider) = self.providers.iter().find(|p| p.name() == preferred)
        {
            debug!(provider = %preferred, "using preferred provider");
            return Ok(Arc::clone(provider));
        }

        for provider in &self.providers {
            match provider.health_check().await {
                Ok(()) => {
                    info!(provider = provider.name(), "selected provider");
                    self.preference.set(provider.name()).await;
                    return Ok(Arc::clone(provider));
                }
                Err(e) => warn!(provider = provider.name(), error = %e, "provider unhealthy"),
            }
        }

        Err(AgentError::NoProvider {
            tried: self
                .providers
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Drops the preferred-provider entry.
    pub async fn invalidate_preference(&self) {
        debug!("invalidating preferred provider");
        self.preference.invalidate().await;
    }
}
