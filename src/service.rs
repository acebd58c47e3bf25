//! Proxy in front of the credentialed completion service used for
//! transcription.
//!
//! A [`ServiceProxy`] is constructed explicitly and handed to the converters
//! that need it; nothing here is process-global. It owns two pieces of
//! state:
//!
//! - a response cache keyed by `sha256(endpoint ‖ payload)`, entries expire
//!   after [`ServiceConfig::cache_ttl_secs`];
//! - a fixed one-minute window per credential fingerprint, allowing
//!   [`ServiceConfig::requests_per_minute`] calls. A caller over budget waits
//!   for the next window, unless its cancellation token fires first.
//!
//! Failed calls are retried with exponential back-off
//! (`retry_backoff_ms * 2^attempt`, capped at one minute); every attempt
//! spends budget.
//!
//! Two edgequake-llm backends are provided. [`KeyedProviderBackend`]
//! authenticates each call with the item's own credential. A bare
//! `Arc<dyn LLMProvider>` uses whatever key the provider was built with.

use crate::config::ServiceConfig;
use crate::error::ConverterError;
use crate::request::Credential;
use async_trait::async_trait;
use dashmap::DashMap;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, GeminiProvider, ImageData, LLMProvider,
    OpenAIProvider, OpenRouterProvider, ProviderType,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WINDOW: Duration = Duration::from_secs(60);
const MAX_BACKOFF_MS: u64 = 60_000;

/// Inline media attached to a request.
#[derive(Debug, Clone, Serialize)]
pub struct MediaPart {
    /// Base64 payload.
    pub data: String,
    pub mime_type: String,
}

/// One completion call.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRequest {
    pub system: String,
    pub prompt: String,
    pub media: Option<MediaPart>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The service behind the proxy.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Label mixed into cache keys.
    fn endpoint(&self) -> String {
        "chat".to_string()
    }

    async fn complete(
        &self,
        request: &ServiceRequest,
        credential: &Credential,
    ) -> Result<String, ConverterError>;
}

/// An edgequake-llm provider. It authenticates with its own configured key;
/// the item credential gates access and partitions the rate budget.
#[async_trait]
impl CompletionBackend for Arc<dyn LLMProvider> {
    fn endpoint(&self) -> String {
        "edgequake-llm/chat".to_string()
    }

    async fn complete(
        &self,
        request: &ServiceRequest,
        _credential: &Credential,
    ) -> Result<String, ConverterError> {
        chat(&**self, request).await
    }
}

/// Hosted providers that accept a caller-supplied API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyedProvider {
    OpenAI,
    Anthropic,
    Gemini,
    OpenRouter,
}

impl KeyedProvider {
    fn parse(name: &str) -> Option<Self> {
        match ProviderType::from_str(name.trim())? {
            ProviderType::OpenAI => Some(Self::OpenAI),
            ProviderType::Anthropic => Some(Self::Anthropic),
            ProviderType::Gemini => Some(Self::Gemini),
            ProviderType::OpenRouter => Some(Self::OpenRouter),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
        }
    }
}

/// An edgequake-llm backend that authenticates every call with the caller's
/// credential.
///
/// One provider client is built per distinct credential and reused for
/// later calls with the same key.
pub struct KeyedProviderBackend {
    provider: KeyedProvider,
    /// `None` keeps the provider's default model.
    model: Option<String>,
    clients: DashMap<String, Arc<dyn LLMProvider>>,
}

impl std::fmt::Debug for KeyedProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedProviderBackend")
            .field("provider", &self.provider.label())
            .field("model", &self.model)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl KeyedProviderBackend {
    /// # Errors
    /// When `provider` is unknown or does not authenticate with an API key
    /// (local servers such as Ollama).
    pub fn new(provider: &str, model: Option<String>) -> Result<Self, ConverterError> {
        let keyed = KeyedProvider::parse(provider).ok_or_else(|| {
            ConverterError::new(format!(
                "Provider '{provider}' does not take an API key \
                 (expected openai, anthropic, gemini or openrouter)"
            ))
        })?;
        Ok(Self {
            provider: keyed,
            model,
            clients: DashMap::new(),
        })
    }

    /// True when `provider` can be driven by a caller-supplied key.
    pub fn supports(provider: &str) -> bool {
        KeyedProvider::parse(provider).is_some()
    }

    /// Number of distinct credentials seen so far.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client(&self, credential: &Credential) -> Arc<dyn LLMProvider> {
        let key = hex::encode(Sha256::digest(credential.expose().as_bytes()));
        self.clients
            .entry(key)
            .or_insert_with(|| {
                debug!(
                    "Building {} client for credential {}",
                    self.provider.label(),
                    fingerprint(credential)
                );
                self.build(credential.expose())
            })
            .clone()
    }

    fn build(&self, api_key: &str) -> Arc<dyn LLMProvider> {
        let model = self.model.as_deref();
        match self.provider {
            KeyedProvider::OpenAI => {
                let p = OpenAIProvider::new(api_key);
                Arc::new(match model {
                    Some(m) => p.with_model(m),
                    None => p,
                })
            }
            KeyedProvider::Anthropic => {
                let p = AnthropicProvider::new(api_key);
                Arc::new(match model {
                    Some(m) => p.with_model(m),
                    None => p,
                })
            }
            KeyedProvider::Gemini => {
                let p = GeminiProvider::new(api_key);
                Arc::new(match model {
                    Some(m) => p.with_model(m),
                    None => p,
                })
            }
            KeyedProvider::OpenRouter => {
                let p = OpenRouterProvider::new(api_key);
                Arc::new(match model {
                    Some(m) => p.with_model(m),
                    None => p,
                })
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for KeyedProviderBackend {
    fn endpoint(&self) -> String {
        format!("edgequake-llm/{}/chat", self.provider.label())
    }

    async fn complete(
        &self,
        request: &ServiceRequest,
        credential: &Credential,
    ) -> Result<String, ConverterError> {
        let client = self.client(credential);
        chat(&*client, request).await
    }
}

async fn chat(provider: &dyn LLMProvider, request: &ServiceRequest) -> Result<String, ConverterError> {
    let images = request
        .media
        .iter()
        .map(|m| ImageData::new(m.data.clone(), m.mime_type.as_str()))
        .collect::<Vec<_>>();
    let messages = vec![
        ChatMessage::system(request.system.as_str()),
        ChatMessage::user_with_images(request.prompt.as_str(), images),
    ];
    let options = CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    };

    let response = provider
        .chat(&messages, Some(&options))
        .await
        .map_err(|e| ConverterError::new(format!("Transcription service error: {e}")))?;
    debug!(
        "Service call: {} input tokens, {} output tokens",
        response.prompt_tokens, response.completion_tokens
    );
    Ok(response.content)
}

#[derive(Debug, Clone)]
struct CachedResponse {
    body: String,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    used: u32,
}

/// Cache + rate limiter + retry around a [`CompletionBackend`].
pub struct ServiceProxy {
    backend: Arc<dyn CompletionBackend>,
    config: ServiceConfig,
    cache: DashMap<String, CachedResponse>,
    windows: DashMap<String, Window>,
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ServiceProxy {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: ServiceConfig) -> Self {
        Self {
            backend,
            config,
            cache: DashMap::new(),
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Number of live cache entries.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Run `request` for `credential`, from cache when possible.
    ///
    /// # Errors
    /// The backend's last error once retries are exhausted, or a
    /// cancellation error when `cancel` fires while waiting.
    pub async fn complete(
        &self,
        credential: &Credential,
        request: &ServiceRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ConverterError> {
        let key = self.cache_key(request)?;
        if let Some(hit) = self.cached(&key) {
            debug!("Service cache hit ({})", &key[..12]);
            return Ok(hit);
        }

        let fingerprint = fingerprint(credential);
        let mut last_err: Option<ConverterError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.config.retry_backoff_ms, attempt);
                warn!(
                    "Service call: retry {}/{} after {}ms",
                    attempt, self.config.max_retries, backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    _ = sleep(Duration::from_millis(backoff)) => {}
                }
            }

            self.acquire(&fingerprint, cancel).await?;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                r = self.backend.complete(request, credential) => r,
            };
            match result {
                Ok(body) => {
                    self.store(key, body.clone());
                    return Ok(body);
                }
                Err(e) => {
                    warn!("Service call: attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ConverterError::new("Service call failed")))
    }

    fn cache_key(&self, request: &ServiceRequest) -> Result<String, ConverterError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ConverterError::new(format!("Could not encode service request: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(self.backend.endpoint().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.config.model.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(&payload);
        Ok(hex::encode(hasher.finalize()))
    }

    fn cached(&self, key: &str) -> Option<String> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let entry = self.cache.get(key)?;
        if entry.stored_at.elapsed() < ttl {
            return Some(entry.body.clone());
        }
        drop(entry);
        self.cache.remove(key);
        None
    }

    fn store(&self, key: String, body: String) {
        if self.config.max_cache_entries == 0 {
            return;
        }
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        self.cache.retain(|_, v| v.stored_at.elapsed() < ttl);

        while self.cache.len() >= self.config.max_cache_entries {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|e| e.value().stored_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(k) => {
                    self.cache.remove(&k);
                }
                None => break,
            }
        }
        self.cache.insert(
            key,
            CachedResponse {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    /// Spend one request of `fingerprint`'s budget, waiting for the next
    /// window when the current one is used up.
    async fn acquire(&self, fingerprint: &str, cancel: &CancellationToken) -> Result<(), ConverterError> {
        let limit = self.config.requests_per_minute.max(1);
        loop {
            let wait = {
                let now = Instant::now();
                let mut window = self.windows.entry(fingerprint.to_string()).or_insert(Window {
                    started: now,
                    used: 0,
                });
                if now.duration_since(window.started) >= WINDOW {
                    *window = Window {
                        started: now,
                        used: 0,
                    };
                }
                if window.used < limit {
                    window.used += 1;
                    return Ok(());
                }
                WINDOW.saturating_sub(now.duration_since(window.started))
            };

            debug!(
                "Rate budget for {} spent, waiting {}ms",
                fingerprint,
                wait.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep(wait) => {}
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based), doubling each time and
/// capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Short, non-reversible identifier for a credential.
fn fingerprint(credential: &Credential) -> String {
    let digest = Sha256::digest(credential.expose().as_bytes());
    hex::encode(&digest[..8])
}

fn cancelled() -> ConverterError {
    ConverterError::new("Cancelled while waiting for the transcription service")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Echo {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Echo {
        async fn complete(
            &self,
            request: &ServiceRequest,
            _credential: &Credential,
        ) -> Result<String, ConverterError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ConverterError::new("503 unavailable"));
            }
            Ok(format!("echo: {}", request.prompt))
        }
    }

    fn request(prompt: &str) -> ServiceRequest {
        ServiceRequest {
            system: "sys".into(),
            prompt: prompt.into(),
            media: None,
            temperature: 0.1,
            max_tokens: 16,
        }
    }

    fn proxy(backend: Arc<Echo>, config: ServiceConfig) -> ServiceProxy {
        ServiceProxy::new(backend, config)
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let backend = Echo::new(0);
        let proxy = proxy(Arc::clone(&backend), ServiceConfig::default());
        let key = Credential::new("k");
        let cancel = CancellationToken::new();

        let a = proxy.complete(&key, &request("hi"), &cancel).await.unwrap();
        let b = proxy.complete(&key, &request("hi"), &cancel).await.unwrap();
        assert_eq!(a, "echo: hi");
        assert_eq!(a, b);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        proxy.complete(&key, &request("other"), &cancel).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(proxy.cached_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let backend = Echo::new(0);
        let config = ServiceConfig {
            cache_ttl_secs: 10,
            ..Default::default()
        };
        let proxy = proxy(Arc::clone(&backend), config);
        let key = Credential::new("k");
        let cancel = CancellationToken::new();

        proxy.complete(&key, &request("hi"), &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        proxy.complete(&key, &request("hi"), &cancel).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let backend = Echo::new(0);
        let config = ServiceConfig {
            max_cache_entries: 2,
            ..Default::default()
        };
        let proxy = proxy(backend, config);
        let key = Credential::new("k");
        let cancel = CancellationToken::new();
        for p in ["a", "b", "c"] {
            proxy.complete(&key, &request(p), &cancel).await.unwrap();
        }
        assert_eq!(proxy.cached_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let backend = Echo::new(2);
        let proxy = proxy(Arc::clone(&backend), ServiceConfig::default());
        let out = proxy
            .complete(&Credential::new("k"), &request("x"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "echo: x");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let backend = Echo::new(usize::MAX);
        let config = ServiceConfig {
            max_retries: 1,
            ..Default::default()
        };
        let proxy = proxy(Arc::clone(&backend), config);
        let err = proxy
            .complete(&Credential::new("k"), &request("x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("503"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn over_budget_waits_for_next_window() {
        let backend = Echo::new(0);
        let config = ServiceConfig {
            requests_per_minute: 1,
            ..Default::default()
        };
        let proxy = proxy(Arc::clone(&backend), config);
        let key = Credential::new("k");
        let cancel = CancellationToken::new();

        let start = Instant::now();
        proxy.complete(&key, &request("a"), &cancel).await.unwrap();
        proxy.complete(&key, &request("b"), &cancel).await.unwrap();
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn budgets_are_per_credential() {
        let backend = Echo::new(0);
        let config = ServiceConfig {
            requests_per_minute: 1,
            ..Default::default()
        };
        let proxy = proxy(Arc::clone(&backend), config);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        proxy.complete(&Credential::new("alice"), &request("a"), &cancel).await.unwrap();
        proxy.complete(&Credential::new("bob"), &request("b"), &cancel).await.unwrap();
        assert!(start.elapsed() < WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_honours_cancellation() {
        let backend = Echo::new(0);
        let config = ServiceConfig {
            requests_per_minute: 1,
            ..Default::default()
        };
        let proxy = proxy(backend, config);
        let key = Credential::new("k");
        let cancel = CancellationToken::new();
        proxy.complete(&key, &request("a"), &cancel).await.unwrap();

        cancel.cancel();
        let err = proxy.complete(&key, &request("b"), &cancel).await.unwrap_err();
        assert!(err.message.contains("Cancelled"));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1_000);
        assert_eq!(backoff_ms(500, 4), 4_000);
        assert_eq!(backoff_ms(500, 200), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u64::MAX, 3), MAX_BACKOFF_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn many_retries_do_not_overflow() {
        let backend = Echo::new(usize::MAX);
        let config = ServiceConfig {
            max_retries: 80,
            retry_backoff_ms: 1_000,
            requests_per_minute: 1_000,
            ..Default::default()
        };
        let proxy = proxy(Arc::clone(&backend), config);
        let err = proxy
            .complete(&Credential::new("k"), &request("x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("503"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 81);
    }

    #[test]
    fn keyed_backend_builds_one_client_per_credential() {
        let backend = KeyedProviderBackend::new("openai", Some("gpt-4.1-nano".into())).unwrap();
        backend.client(&Credential::new("sk-alice"));
        backend.client(&Credential::new("sk-alice"));
        assert_eq!(backend.client_count(), 1);
        backend.client(&Credential::new("sk-bob"));
        assert_eq!(backend.client_count(), 2);
        assert_eq!(backend.endpoint(), "edgequake-llm/openai/chat");
        assert!(!format!("{backend:?}").contains("sk-"));
    }

    #[test]
    fn keyed_backend_needs_a_hosted_provider() {
        assert!(KeyedProviderBackend::supports("Claude"));
        assert!(KeyedProviderBackend::supports("gemini"));
        assert!(!KeyedProviderBackend::supports("ollama"));
        let err = KeyedProviderBackend::new("ollama", None).unwrap_err();
        assert!(err.message.contains("ollama"));
    }

    #[test]
    fn fingerprint_hides_the_secret() {
        let fp = fingerprint(&Credential::new("sk-very-secret"));
        assert_eq!(fp.len(), 16);
        assert!(!fp.contains("secret"));
    }
}
