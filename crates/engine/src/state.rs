//! The composition root.
//!
//! Every process-wide registry (pending confirmations, short-term context,
//! dedupe cache, integrations-snapshot cache, dev log, alert window) hangs
//! off [`EngineState`], which the host constructs once and tests construct
//! fresh per case. No singletons.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nova_devlog::DevLog;
use nova_domain::config::Config;
use nova_domain::error::Result;
use nova_memory::{MemoryFileStore, MemoryRecall};
use nova_providers::{ChatRuntime, IntegrationsSnapshot, ProviderClient};
use nova_sessions::SessionStore;

use crate::collab::{
    Broadcaster, CryptoService, IntegrationsProvider, MusicHandler, ToolRuntime, Voice,
    WeatherService, WorkflowBuilder,
};
use crate::dedupe::DedupeFilter;
use crate::pending::PendingStore;
use crate::shortterm::ShortTermStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Indirection over [`nova_providers::registry::build_client`] so tests can
/// substitute scripted providers.
pub trait ClientFactory: Send + Sync {
    fn client_for(
        &self,
        runtime: &ChatRuntime,
        request_timeout_ms: u64,
    ) -> Result<Arc<dyn ProviderClient>>;
}

/// The production factory: real HTTP adapters per provider tag.
pub struct RegistryClientFactory;

impl ClientFactory for RegistryClientFactory {
    fn client_for(
        &self,
        runtime: &ChatRuntime,
        request_timeout_ms: u64,
    ) -> Result<Arc<dyn ProviderClient>> {
        nova_providers::registry::build_client(runtime, request_timeout_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Integrations snapshot cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CachedSnapshot {
    snapshot: IntegrationsSnapshot,
    fetched_at: Instant,
}

/// TTL cache over the integrations registry with a single-flight guard per
/// user id: concurrent misses for the same user share one refresh.
pub struct SnapshotCache {
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedSnapshot>>,
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, user: &str) -> Option<IntegrationsSnapshot> {
        let cache = self.cache.lock();
        cache.get(user).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.snapshot.clone())
        })
    }

    pub async fn get(
        &self,
        provider: &dyn IntegrationsProvider,
        user: &str,
    ) -> Result<IntegrationsSnapshot> {
        if let Some(snapshot) = self.cached(user) {
            return Ok(snapshot);
        }

        let flight = {
            let mut flights = self.flights.lock();
            Arc::clone(flights.entry(user.to_string()).or_default())
        };
        let _guard = flight.lock().await;

        // Another flight may have refreshed while we waited.
        if let Some(snapshot) = self.cached(user) {
            return Ok(snapshot);
        }

        let snapshot = provider.snapshot(user).await?;
        self.cache.lock().insert(
            user.to_string(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(snapshot)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared state passed to the dispatcher and engine.
#[derive(Clone)]
pub struct EngineState {
    // ── Config & persona ──────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Base system prompt (agent persona + workspace overlay), assembled by
    /// the host.
    pub base_persona: Arc<String>,

    // ── Stores ────────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryFileStore>,
    pub recall: Arc<dyn MemoryRecall>,
    pub devlog: Arc<DevLog>,
    pub pending: Arc<PendingStore>,
    pub shortterm: Arc<ShortTermStore>,
    pub dedupe: Arc<DedupeFilter>,
    pub snapshots: Arc<SnapshotCache>,

    // ── Collaborators ─────────────────────────────────────────────────
    pub broadcaster: Arc<dyn Broadcaster>,
    pub tool_runtime: Arc<dyn ToolRuntime>,
    pub integrations: Arc<dyn IntegrationsProvider>,
    pub client_factory: Arc<dyn ClientFactory>,
    pub weather: Arc<dyn WeatherService>,
    pub crypto: Arc<dyn CryptoService>,
    pub workflow: Arc<dyn WorkflowBuilder>,
    pub music: Arc<dyn MusicHandler>,
    pub voice: Arc<dyn Voice>,

    // ── Process flags & small caches ──────────────────────────────────
    shutdown_requested: Arc<AtomicBool>,
    /// user_context_id → last rendered crypto report, for duplicate replays.
    last_crypto_report: Arc<Mutex<HashMap<String, String>>>,
}

/// The collaborator bundle handed to [`EngineState::new`]; keeps the
/// constructor signature readable at the composition site.
pub struct EngineDeps {
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryFileStore>,
    pub recall: Arc<dyn MemoryRecall>,
    pub devlog: Arc<DevLog>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub tool_runtime: Arc<dyn ToolRuntime>,
    pub integrations: Arc<dyn IntegrationsProvider>,
    pub client_factory: Arc<dyn ClientFactory>,
    pub weather: Arc<dyn WeatherService>,
    pub crypto: Arc<dyn CryptoService>,
    pub workflow: Arc<dyn WorkflowBuilder>,
    pub music: Arc<dyn MusicHandler>,
    pub voice: Arc<dyn Voice>,
}

impl EngineState {
    pub fn new(config: Config, base_persona: String, deps: EngineDeps) -> Self {
        Self {
            config: Arc::new(config),
            base_persona: Arc::new(base_persona),
            sessions: deps.sessions,
            memory: deps.memory,
            recall: deps.recall,
            devlog: deps.devlog,
            pending: Arc::new(PendingStore::with_default_ttl()),
            shortterm: Arc::new(ShortTermStore::with_default_ttl()),
            dedupe: Arc::new(DedupeFilter::with_default_ttl()),
            snapshots: Arc::new(SnapshotCache::new(Duration::from_secs(60))),
            broadcaster: deps.broadcaster,
            tool_runtime: deps.tool_runtime,
            integrations: deps.integrations,
            client_factory: deps.client_factory,
            weather: deps.weather,
            crypto: deps.crypto,
            workflow: deps.workflow,
            music: deps.music,
            voice: deps.voice,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            last_crypto_report: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Signal the host process to terminate after this turn.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn remember_crypto_report(&self, user_context_id: &str, report: &str) {
        self.last_crypto_report
            .lock()
            .insert(user_context_id.to_string(), report.to_string());
    }

    pub fn last_crypto_report(&self, user_context_id: &str) -> Option<String> {
        self.last_crypto_report.lock().get(user_context_id).cloned()
    }
}
