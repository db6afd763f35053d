use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    AgentCard, AgentTransport, SettingsProvider, SwitchyardError, SwitchyardResult,
};
use tokio::time::Instant;
use tracing::{debug, info};

/// Default bound on a single discovery request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Entry {
    pub(crate) card: AgentCard,
    pub(crate) expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Known agents keyed by id, each valid until its TTL elapses.
///
/// An entry present and unexpired means its card was seen within the TTL.
/// Expired entries are purged (lazily on read, or by [`sweep`](Self::sweep)),
/// never kept around in a stale state. Ids purged on read are reported by
/// the next sweep.
pub struct AgentRegistry {
    pub(crate) entries: RwLock<HashMap<String, Entry>>,
    evicted_on_read: Mutex<BTreeSet<String>>,
    /// Endpoints probed on every refresh regardless of registry contents.
    pub(crate) seeds: RwLock<BTreeSet<String>>,
    pub(crate) settings: Arc<dyn SettingsProvider>,
    pub(crate) transport: Arc<dyn AgentTransport>,
    pub(crate) discovery_timeout: Duration,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new(transport: Arc<dyn AgentTransport>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            evicted_on_read: Mutex::new(BTreeSet::new()),
            seeds: RwLock::new(BTreeSet::new()),
            settings,
            transport,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Bound each discovery request by `timeout`.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Add endpoints that are probed on every refresh.
    pub fn with_seeds<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut seeds = self.seeds.write();
            seeds.extend(endpoints.into_iter().map(Into::into));
        }
        self
    }

    /// Add a single seed endpoint.
    pub fn add_seed(&self, endpoint: impl Into<String>) {
        self.seeds.write().insert(endpoint.into());
    }

    /// Insert or replace the card for `card.id` with a fresh expiry.
    pub fn register(&self, card: AgentCard) {
        let ttl = self.settings.settings_for(&card.id).registry_ttl();
        let card = card.seen_at(Utc::now());
        let id = card.id.clone();
        let replaced = self
            .entries
            .write()
            .insert(
                id.clone(),
                Entry {
                    card,
                    expires_at: Instant::now() + ttl,
                },
            )
            .is_some();

        if replaced {
            debug!(agent_id = %id, ttl_secs = ttl.as_secs(), "Agent card refreshed");
        } else {
            info!(agent_id = %id, ttl_secs = ttl.as_secs(), "Agent registered");
        }
    }

    /// Look up a live card. Expired entries are purged and reported as missing.
    pub fn resolve(&self, id: &str) -> SwitchyardResult<AgentCard> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(id) {
                Some(entry) if entry.is_live(now) => return Ok(entry.card.clone()),
                Some(_) => {}
                None => return Err(SwitchyardError::NotFound(id.to_string())),
            }
        }

        // Expired: purge unless a concurrent refresh re-registered it meanwhile.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(id) {
            if entry.is_live(Instant::now()) {
                return Ok(entry.card.clone());
            }
            entries.remove(id);
            self.evicted_on_read.lock().insert(id.to_string());
            debug!(agent_id = %id, "Evicted expired agent on read");
        }
        Err(SwitchyardError::NotFound(id.to_string()))
    }

    /// Resolve the first live agent (by id order) advertising `skill`.
    pub fn resolve_skill(&self, skill: &str) -> SwitchyardResult<AgentCard> {
        let mut candidates: Vec<AgentCard> = self
            .list()
            .into_iter()
            .filter(|card| card.has_skill(skill))
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| SwitchyardError::NotFound(format!("skill:{skill}")))
    }

    /// All live cards, in no particular order.
    pub fn list(&self) -> Vec<AgentCard> {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.card.clone())
            .collect()
    }

    /// Whether `id` currently resolves.
    pub fn contains(&self, id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(id)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether no live entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge every expired entry and return the evicted ids, including those
    /// already purged on read since the previous sweep.
    pub fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut evicted = std::mem::take(&mut *self.evicted_on_read.lock());
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            entries.remove(&id);
            info!(agent_id = %id, "Evicted expired agent");
            evicted.insert(id);
        }
        evicted.into_iter().collect()
    }

    /// Endpoints to probe on refresh: seeds plus those of live entries.
    pub fn known_endpoints(&self) -> BTreeSet<String> {
        let mut endpoints = self.seeds.read().clone();
        endpoints.extend(self.list().into_iter().map(|card| card.endpoint));
        endpoints
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use switchyard_core::{AgentSettings, TaskRequest, TransportError};

    struct NoTransport;

    #[async_trait]
    impl AgentTransport for NoTransport {
        async fn discover(&self, endpoint: &str) -> Result<AgentCard, TransportError> {
            Err(TransportError::refused(endpoint))
        }

        async fn send_task(
            &self,
            endpoint: &str,
            _request: &TaskRequest,
        ) -> Result<serde_json::Value, TransportError> {
            Err(TransportError::refused(endpoint))
        }
    }

    fn registry(ttl_secs: u64) -> AgentRegistry {
        let settings = AgentSettings {
            registry_ttl_secs: ttl_secs,
            ..AgentSettings::default()
        };
        AgentRegistry::new(Arc::new(NoTransport), Arc::new(settings))
    }

    fn card(id: &str) -> AgentCard {
        AgentCard::new(id, id.to_uppercase(), format!("http://{id}:9000"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_resolve() {
        let reg = registry(60);
        reg.register(card("thinking"));
        let resolved = reg.resolve("thinking").unwrap();
        assert_eq!(resolved.name, "THINKING");
        assert!(reg.contains("thinking"));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_unknown_is_not_found() {
        let reg = registry(60);
        let err = reg.resolve("ghost").unwrap_err();
        assert!(matches!(err, SwitchyardError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_checked_on_read_without_sweep() {
        let reg = registry(30);
        reg.register(card("a"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(reg.resolve("a").is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(reg.resolve("a"), Err(SwitchyardError::NotFound(_))));
        assert!(reg.list().is_empty());
        assert!(!reg.contains("a"));
        // Purged on read, but still reported once by the next sweep.
        assert_eq!(reg.sweep(), vec!["a".to_string()]);
        assert!(reg.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_extends_expiry() {
        let reg = registry(30);
        reg.register(card("a"));
        tokio::time::advance(Duration::from_secs(20)).await;
        reg.register(card("a"));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(reg.resolve("a").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_replaces_card_wholesale() {
        let reg = registry(30);
        reg.register(card("a").with_skill("old"));
        reg.register(card("a").with_skill("new"));
        let resolved = reg.resolve("a").unwrap();
        assert!(resolved.has_skill("new"));
        assert!(!resolved.has_skill("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_returns_evicted_ids() {
        let reg = registry(10);
        reg.register(card("a"));
        tokio::time::advance(Duration::from_secs(5)).await;
        reg.register(card("b"));
        tokio::time::advance(Duration::from_secs(6)).await;

        let evicted = reg.sweep();
        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(reg.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_skill_picks_lowest_id() {
        let reg = registry(60);
        reg.register(card("zeta").with_skill("answer"));
        reg.register(card("alpha").with_skill("answer"));
        reg.register(card("beta").with_skill("guess"));

        assert_eq!(reg.resolve_skill("answer").unwrap().id, "alpha");
        assert!(reg.resolve_skill("render").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_endpoints_drop_evicted_non_seeds() {
        let reg = registry(10).with_seeds(["http://seed:1"]);
        reg.register(card("a"));
        assert_eq!(reg.known_endpoints().len(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        let endpoints = reg.known_endpoints();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints.contains("http://seed:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_seen_is_stamped() {
        let reg = registry(60);
        let mut stale = card("a");
        stale.last_seen = Utc::now() - chrono::Duration::hours(1);
        reg.register(stale.clone());
        assert!(reg.resolve("a").unwrap().last_seen > stale.last_seen);
    }
}
