//! Agent access facade: per-user executor lookup, construction and caching.
//!
//! `AgentManager` is the only way the rest of the system obtains an
//! executor. A hit promotes the user's entry to most recently used; a miss
//! provisions tools, builds an executor and inserts it, evicting the least
//! recently used entry when the cache is full.
//!
//! Concurrency:
//! - The LRU map sits behind a `std::sync::Mutex` that is never held across
//!   an `.await`, so promote, insert and evict are each one critical section.
//! - Misses for the same user are serialized by a per-user async guard;
//!   the second caller re-checks the cache and reuses the first build.
//! - Builds in flight are tracked under the same lock. `invalidate` marks a
//!   user's in-flight build, which is then handed to its caller but never
//!   cached. Users with no build in flight leave no trace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use parlor_core::event::{DomainEvent, EventBus};
use parlor_core::provider::ModelHandle;
use parlor_core::user::{ToolConfiguration, UserId, UserRecord};
use parlor_tools::ToolProvisioner;
use tracing::{debug, error, info, warn};

use crate::cache::LruCache;
use crate::executor::AgentExecutor;
use crate::factory::AgentFactory;

#[derive(Clone)]
struct CachedAgent {
    executor: Arc<AgentExecutor>,
    config_version: u64,
}

struct CacheState {
    agents: LruCache<UserId, CachedAgent>,
    /// Users with a build in flight; `true` once invalidated mid-build.
    in_flight: HashMap<UserId, bool>,
}

/// Registers a build for one user and unregisters it when dropped, so a
/// cancelled build leaves nothing behind.
struct InFlightBuild<'a> {
    manager: &'a AgentManager,
    user_id: UserId,
}

impl<'a> InFlightBuild<'a> {
    fn start(manager: &'a AgentManager, user_id: UserId) -> Self {
        manager.lock_state().in_flight.insert(user_id, false);
        Self { manager, user_id }
    }
}

impl Drop for InFlightBuild<'_> {
    fn drop(&mut self) {
        self.manager.lock_state().in_flight.remove(&self.user_id);
    }
}

/// A snapshot of the cache for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub model_configured: bool,
}

pub struct AgentManager {
    state: Mutex<CacheState>,
    model: OnceLock<ModelHandle>,
    default_config: ToolConfiguration,
    provisioner: Arc<ToolProvisioner>,
    factory: Arc<dyn AgentFactory>,
    build_guards: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentManager {
    pub fn new(
        capacity: usize,
        default_config: ToolConfiguration,
        provisioner: Arc<ToolProvisioner>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        let agents = LruCache::new(capacity);
        info!(capacity = agents.capacity(), "Agent cache initialized");
        Self {
            state: Mutex::new(CacheState {
                agents,
                in_flight: HashMap::new(),
            }),
            model: OnceLock::new(),
            default_config,
            provisioner,
            factory,
            build_guards: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Install the shared model handle. Only the first call takes effect.
    pub fn set_model(&self, model: ModelHandle) -> bool {
        let name = model.model.clone();
        match self.model.set(model) {
            Ok(()) => {
                info!(model = %name, "Agent manager model set");
                true
            }
            Err(_) => {
                warn!(model = %name, "Model handle already set, ignoring");
                false
            }
        }
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.get()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Cached executor for `user` if it reflects the user's configuration.
    ///
    /// An entry built from a configuration older than the record is a miss.
    fn lookup(&self, user: &UserRecord) -> Option<Arc<AgentExecutor>> {
        let mut state = self.lock_state();
        let cached = state.agents.get(&user.id)?;
        if cached.config_version < user.config_version {
            debug!(
                user_id = %user.id,
                cached = cached.config_version,
                current = user.config_version,
                "Cached agent is stale"
            );
            return None;
        }
        Some(Arc::clone(&cached.executor))
    }

    fn build_guard(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self
            .build_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(guards.entry(user_id).or_default())
    }

    fn release_build_guard(&self, user_id: UserId, guard: Arc<tokio::sync::Mutex<()>>) {
        let mut guards = self
            .build_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map's handle plus ours: nobody else is waiting.
        if Arc::strong_count(&guard) <= 2 {
            guards.remove(&user_id);
        }
    }

    /// The executor for `user`, building and caching one on a miss.
    ///
    /// `None` means the service is unavailable: no model has been set or
    /// the factory declined to build.
    pub async fn get(&self, user: &UserRecord) -> Option<Arc<AgentExecutor>> {
        let Some(model) = self.model.get() else {
            error!(user_id = %user.id, "No language model configured, cannot build agent");
            return None;
        };

        if let Some(executor) = self.lookup(user) {
            debug!(user_id = %user.id, "Agent cache hit");
            return Some(executor);
        }

        let guard = self.build_guard(user.id);
        let result = {
            let _building = guard.lock().await;
            match self.lookup(user) {
                Some(executor) => {
                    debug!(user_id = %user.id, "Agent built by a concurrent request");
                    Some(executor)
                }
                None => self.build_and_insert(model, user).await,
            }
        };
        self.release_build_guard(user.id, guard);
        result
    }

    async fn build_and_insert(
        &self,
        model: &ModelHandle,
        user: &UserRecord,
    ) -> Option<Arc<AgentExecutor>> {
        let _in_flight = InFlightBuild::start(self, user.id);

        let config = match &user.tool_config {
            Some(config) => config,
            None => {
                debug!(user_id = %user.id, "Using default tool configuration");
                &self.default_config
            }
        };

        info!(user_id = %user.id, providers = config.len(), "Building agent");
        let tools = self.provisioner.resolve(model, config).await;
        let tool_count = tools.len();

        let Some(executor) = self.factory.build(Some(model), tools, user.config_version) else {
            error!(user_id = %user.id, "Agent factory returned no executor");
            return None;
        };
        let executor = Arc::new(executor);

        let evicted = {
            let mut state = self.lock_state();
            if state.in_flight.remove(&user.id).unwrap_or(false) {
                info!(user_id = %user.id, "Agent invalidated during build, not caching");
                return Some(executor);
            }
            state.agents.insert(
                user.id,
                CachedAgent {
                    executor: Arc::clone(&executor),
                    config_version: user.config_version,
                },
            )
        };

        info!(
            user_id = %user.id,
            tools = tool_count,
            config_version = user.config_version,
            "Agent built and cached"
        );
        self.publish(DomainEvent::AgentBuilt {
            user_id: user.id,
            tool_count,
            config_version: user.config_version,
            timestamp: Utc::now(),
        });

        if let Some((evicted_user, _)) = evicted {
            info!(user_id = %evicted_user, "Evicted least recently used agent");
            self.publish(DomainEvent::AgentEvicted {
                user_id: evicted_user,
                timestamp: Utc::now(),
            });
        }

        Some(executor)
    }

    /// Drop the cached executor for `user_id`, if any.
    ///
    /// Also prevents any build already in flight for this user from being
    /// cached.
    pub fn invalidate(&self, user_id: UserId) {
        let removed = {
            let mut state = self.lock_state();
            if let Some(invalidated) = state.in_flight.get_mut(&user_id) {
                *invalidated = true;
            }
            state.agents.remove(&user_id).is_some()
        };

        if removed {
            info!(user_id = %user_id, "Invalidated cached agent");
            self.publish(DomainEvent::AgentInvalidated {
                user_id,
                timestamp: Utc::now(),
            });
        } else {
            debug!(user_id = %user_id, "No cached agent to invalidate");
        }
    }

    pub async fn get_agent_for_user(&self, user: &UserRecord) -> Option<Arc<AgentExecutor>> {
        self.get(user).await
    }

    pub fn invalidate_user_agent(&self, user_id: UserId) {
        self.invalidate(user_id)
    }

    pub fn len(&self) -> usize {
        self.lock_state().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock_state().agents.capacity()
    }

    /// Cached users, most recently used first.
    pub fn cached_users(&self) -> Vec<UserId> {
        self.lock_state().agents.keys_mru()
    }

    pub fn is_cached(&self, user_id: UserId) -> bool {
        self.lock_state().agents.contains(&user_id)
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        let count = state.agents.len();
        for invalidated in state.in_flight.values_mut() {
            *invalidated = true;
        }
        state.agents.clear();
        info!(count, "Agent cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            len: state.agents.len(),
            capacity: state.agents.capacity(),
            model_configured: self.model.get().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        CountingFactory, StubRemote, StubSources, mock_model, provisioner,
    };
    use parlor_core::retrieval::KnownSource;
    use parlor_core::user::McpServerConfig;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Harness {
        manager: Arc<AgentManager>,
        remote: Arc<StubRemote>,
        sources: Arc<StubSources>,
        factory: Arc<CountingFactory>,
    }

    fn harness_with(capacity: usize, remote: StubRemote, sources: Vec<KnownSource>) -> Harness {
        let remote = Arc::new(remote);
        let sources = Arc::new(StubSources::new(sources));
        let factory = Arc::new(CountingFactory::new());
        let manager = AgentManager::new(
            capacity,
            ToolConfiguration::new(),
            provisioner(Arc::clone(&remote), Arc::clone(&sources)),
            factory.clone(),
        );
        manager.set_model(mock_model());
        Harness {
            manager: Arc::new(manager),
            remote,
            sources,
            factory,
        }
    }

    fn harness(capacity: usize) -> Harness {
        harness_with(capacity, StubRemote::default(), vec![])
    }

    fn user(id: u64) -> UserRecord {
        UserRecord::new(UserId(id), format!("user{id}"))
    }

    fn github(token: &str) -> ToolConfiguration {
        ToolConfiguration::new().with_server(
            "github",
            McpServerConfig::new("https://api.githubcopilot.com/mcp/").with_authorization(token),
        )
    }

    #[tokio::test]
    async fn second_get_is_a_hit() {
        let h = harness(2);
        let first = h.manager.get(&user(1)).await.unwrap();
        let second = h.manager.get(&user(1)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.factory.build_count(), 1);
        assert_eq!(h.sources.load_count(), 1);
    }

    #[tokio::test]
    async fn capacity_two_keeps_the_two_most_recent() {
        let h = harness(2);
        for id in 1..=3 {
            h.manager.get(&user(id)).await.unwrap();
        }
        assert_eq!(h.manager.cached_users(), vec![UserId(3), UserId(2)]);
        assert_eq!(h.manager.len(), 2);
    }

    #[tokio::test]
    async fn touching_a_user_protects_it_from_eviction() {
        let h = harness(2);
        h.manager.get(&user(1)).await.unwrap();
        h.manager.get(&user(2)).await.unwrap();
        h.manager.get(&user(1)).await.unwrap();
        h.manager.get(&user(3)).await.unwrap();

        let mut cached = h.manager.cached_users();
        cached.sort();
        assert_eq!(cached, vec![UserId(1), UserId(3)]);
        assert_eq!(h.factory.build_count(), 3);
    }

    #[tokio::test]
    async fn size_never_exceeds_capacity() {
        let h = harness(3);
        for round in 0..4u64 {
            for id in 1..=6u64 {
                h.manager.get(&user((id * (round + 1)) % 7 + 1)).await.unwrap();
                assert!(h.manager.len() <= 3);
            }
        }
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let h = harness(2);
        let before = h.manager.get(&user(1)).await.unwrap();
        h.manager.invalidate(UserId(1));
        assert!(!h.manager.is_cached(UserId(1)));

        let after = h.manager.get(&user(1)).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(h.factory.build_count(), 2);
    }

    #[tokio::test]
    async fn invalidating_unknown_user_is_a_noop() {
        let h = harness(2);
        h.manager.get(&user(1)).await.unwrap();
        h.manager.invalidate(UserId(99));
        assert_eq!(h.manager.cached_users(), vec![UserId(1)]);
    }

    #[tokio::test]
    async fn newer_config_version_forces_rebuild() {
        let h = harness(2);
        let mut record = user(1);
        h.manager.get(&record).await.unwrap();

        record.config_version = 1;
        let rebuilt = h.manager.get(&record).await.unwrap();
        assert_eq!(rebuilt.config_version(), 1);
        assert_eq!(h.factory.build_count(), 2);
        assert_eq!(h.manager.len(), 1);

        // A caller holding an older record still gets the newer agent.
        let older = h.manager.get(&user(1)).await.unwrap();
        assert!(Arc::ptr_eq(&older, &rebuilt));
    }

    #[tokio::test]
    async fn placeholder_credential_yields_only_retrieval_tools() {
        let h = harness_with(
            2,
            StubRemote::default(),
            vec![KnownSource::new("handbook", "HR policies")],
        );
        let record = user(4).with_tool_config(github("Bearer <YOUR_GITHUB_TOKEN_HERE>"));

        let agent = h.manager.get(&record).await.unwrap();
        assert_eq!(agent.tool_names(), vec!["RAG_handbook"]);
        assert_eq!(h.remote.batch_count(), 0);
    }

    #[tokio::test]
    async fn provider_without_credentials_is_isolated() {
        let h = harness_with(2, StubRemote::default(), vec![KnownSource::new("handbook", "")]);
        let config = github("Bearer <YOUR_GITHUB_TOKEN_HERE>")
            .with_server("jira", McpServerConfig::new("https://mcp.example.com/jira"))
            .with_server(
                "linear",
                McpServerConfig::new("https://mcp.linear.app/mcp").with_authorization("Bearer lin_ok"),
            );

        let agent = h.manager.get(&user(6).with_tool_config(config)).await.unwrap();
        assert_eq!(agent.tool_names(), vec!["linear_search", "RAG_handbook"]);
        assert_eq!(h.remote.batches.lock().unwrap()[0], vec!["linear"]);
    }

    #[tokio::test]
    async fn user_config_overrides_default() {
        let h = harness(2);
        let record = user(5).with_tool_config(github("Bearer ghp_real"));
        let agent = h.manager.get(&record).await.unwrap();
        assert_eq!(agent.tool_names(), vec!["github_search"]);
        assert_eq!(h.remote.batches.lock().unwrap()[0], vec!["github"]);
    }

    #[tokio::test]
    async fn missing_model_returns_none_without_provisioning() {
        let remote = Arc::new(StubRemote::default());
        let sources = Arc::new(StubSources::new(vec![KnownSource::new("wiki", "")]));
        let factory = Arc::new(CountingFactory::new());
        let manager = AgentManager::new(
            2,
            github("Bearer ghp_real"),
            provisioner(Arc::clone(&remote), Arc::clone(&sources)),
            factory.clone(),
        );

        assert!(manager.get(&user(1)).await.is_none());
        assert_eq!(remote.batch_count(), 0);
        assert_eq!(sources.load_count(), 0);
        assert_eq!(factory.build_count(), 0);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn model_can_only_be_set_once() {
        let h = harness(1);
        assert!(!h.manager.set_model(mock_model()));
        assert!(h.manager.stats().model_configured);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_for_one_user_build_once() {
        let h = harness_with(
            4,
            StubRemote {
                delay: Some(Duration::from_millis(50)),
                ..Default::default()
            },
            vec![],
        );
        let record = user(7).with_tool_config(github("Bearer ghp_real"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&h.manager);
            let record = record.clone();
            handles.push(tokio::spawn(async move { manager.get(&record).await }));
        }
        let mut agents = Vec::new();
        for handle in handles {
            agents.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(h.factory.build_count(), 1);
        assert_eq!(h.remote.batch_count(), 1);
        assert!(agents.iter().all(|a| Arc::ptr_eq(a, &agents[0])));
        assert!(h.manager.build_guards.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalidation_during_build_is_not_cached() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness_with(
            2,
            StubRemote {
                gate: Some((Arc::clone(&entered), Arc::clone(&release))),
                ..Default::default()
            },
            vec![],
        );
        let record = user(8).with_tool_config(github("Bearer ghp_real"));

        let manager = Arc::clone(&h.manager);
        let pending = {
            let record = record.clone();
            tokio::spawn(async move { manager.get(&record).await })
        };

        entered.notified().await;
        h.manager.invalidate(UserId(8));
        release.notify_one();

        let agent = pending.await.unwrap();
        assert!(agent.is_some());
        assert!(!h.manager.is_cached(UserId(8)));
    }

    #[tokio::test]
    async fn dropped_build_caches_nothing() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness_with(
            2,
            StubRemote {
                gate: Some((Arc::clone(&entered), release)),
                ..Default::default()
            },
            vec![],
        );
        let record = user(9).with_tool_config(github("Bearer ghp_real"));

        let result = tokio::time::timeout(Duration::from_millis(50), h.manager.get(&record)).await;
        assert!(result.is_err());
        assert!(!h.manager.is_cached(UserId(9)));
        assert_eq!(h.factory.build_count(), 0);
        assert!(h.manager.lock_state().in_flight.is_empty());
    }

    #[tokio::test]
    async fn invalidating_uncached_users_keeps_no_bookkeeping() {
        let h = harness(2);
        for id in 0..10_000 {
            h.manager.invalidate(UserId(id));
        }
        h.manager.clear();
        assert!(h.manager.is_empty());
        assert!(h.manager.lock_state().in_flight.is_empty());

        h.manager.get(&user(1)).await.unwrap();
        assert!(h.manager.is_cached(UserId(1)));
        assert!(h.manager.lock_state().in_flight.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let h = harness(3);
        h.manager.get(&user(1)).await.unwrap();
        h.manager.get(&user(2)).await.unwrap();
        h.manager.clear();
        assert!(h.manager.is_empty());
        assert_eq!(h.manager.capacity(), 3);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let remote = Arc::new(StubRemote::default());
        let sources = Arc::new(StubSources::new(vec![]));
        let manager = AgentManager::new(
            1,
            ToolConfiguration::new(),
            provisioner(remote, sources),
            Arc::new(CountingFactory::new()),
        )
        .with_event_bus(Arc::clone(&bus));
        manager.set_model(mock_model());

        manager.get(&user(1)).await.unwrap();
        manager.get(&user(2)).await.unwrap();
        manager.invalidate(UserId(2));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::AgentBuilt { user_id, .. } => format!("built:{user_id}"),
                DomainEvent::AgentEvicted { user_id, .. } => format!("evicted:{user_id}"),
                DomainEvent::AgentInvalidated { user_id, .. } => format!("invalidated:{user_id}"),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(
            kinds,
            vec!["built:1", "built:2", "evicted:1", "invalidated:2"]
        );
    }
}
