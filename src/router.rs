//! Connection state machine and request dispatch (spec.md §4.4).
//!
//! Grounded on RustyDB's `src/networking/routing/router.rs`: a coarse
//! `parking_lot::Mutex`-guarded state enum plus a dispatch loop that
//! retries across sessions on connection loss, generalized here to the
//! affinity-aware routing spec.md §4.3/§4.4 describe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::affinity::{resolve_affinity_key, DistributionMap, KeyInput};
use crate::codec::{BasicTypeCodec, ObjectCodec};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pool::ConnectionPool;
use crate::protocol::{
    decode_cache_partitions_response, encode_cache_partitions_request, CACHE_PARTITIONS_OP_CODE,
};
use crate::session::{NodeSession, SessionEvent};
use crate::types::NodeId;

/// Connection lifecycle state (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a cache operation supplies to [`Router::send`] (spec.md §3, `AffinityHint`).
pub struct AffinityHint {
    pub cache_id: i32,
    pub key: KeyInput,
}

type StateChangedCallback = Box<dyn Fn(RouterState, Option<String>) + Send + Sync>;

/// Result of resolving an [`AffinityHint`] (spec.md §4.4 dispatch steps 1-2).
#[derive(Debug, Clone, Copy)]
enum SessionSelection {
    /// No hint, or partition-awareness inactive: use the single active session.
    Deterministic,
    /// Affinity-routed: `Some(node)` is the computed target (may not be in
    /// the pool), `None` means the cache forces random routing.
    Affinity(Option<NodeId>),
}

/// Router: owns the [`ConnectionPool`] and [`DistributionMap`], drives the
/// connect/reconnect/failover state machine, and dispatches requests with
/// affinity-aware session selection (spec.md §4.3, §4.4).
pub struct Router {
    config: Arc<ClientConfig>,
    pool: Arc<ConnectionPool>,
    distribution: DistributionMap,
    codec: Arc<dyn ObjectCodec>,
    state: RwLock<RouterState>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    on_state_changed: RwLock<Option<StateChangedCallback>>,
}

impl Router {
    pub fn new(config: ClientConfig) -> Result<Arc<Router>> {
        Self::with_codec(config, Arc::new(BasicTypeCodec))
    }

    pub fn with_codec(config: ClientConfig, codec: Arc<dyn ObjectCodec>) -> Result<Arc<Router>> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(ConnectionPool::new(config.partition_awareness, &config.endpoints));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let router = Arc::new(Router {
            config,
            pool,
            distribution: DistributionMap::new(),
            codec,
            state: RwLock::new(RouterState::Disconnected),
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            on_state_changed: RwLock::new(None),
        });

        spawn_event_listener(Arc::clone(&router), events_rx);
        Ok(router)
    }

    /// `onStateChanged(newState, reasonOrNull)` (spec.md §6). Replaces any
    /// previously registered callback.
    pub fn set_on_state_changed(&self, callback: impl Fn(RouterState, Option<String>) + Send + Sync + 'static) {
        *self.on_state_changed.write() = Some(Box::new(callback));
    }

    fn transition(&self, new_state: RouterState, reason: Option<String>) {
        *self.state.write() = new_state;
        if let Some(callback) = self.on_state_changed.read().as_ref() {
            callback(new_state, reason);
        }
    }

    pub fn state(&self) -> RouterState {
        *self.state.read()
    }

    pub fn distribution(&self) -> &DistributionMap {
        &self.distribution
    }

    /// `connect()` (spec.md §4.4): try each endpoint once, in random
    /// order, until one succeeds; then kick off the background connector
    /// for the rest.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state();
            if state == RouterState::Connected {
                return Ok(());
            }
        }
        self.transition(RouterState::Connecting, None);

        let mut endpoints = self.config.endpoints.clone();
        endpoints.shuffle(&mut rand::rng());

        let mut last_err = None;
        let mut connected_any = false;
        for endpoint in endpoints {
            match NodeSession::connect(endpoint.clone(), &self.config, self.events_tx.clone()).await {
                Ok(session) => {
                    self.pool.add_session(session).await;
                    connected_any = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "initial connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        if !connected_any {
            let err = last_err.unwrap_or_else(|| ClientError::ConnectionFailed("no endpoints configured".to_string()));
            self.transition(RouterState::Disconnected, Some(err.to_string()));
            return Err(err);
        }

        self.transition(RouterState::Connected, None);
        self.connected.store(true, Ordering::SeqCst);
        self.kick_background_connect();
        Ok(())
    }

    fn kick_background_connect(self: &Arc<Self>) {
        let connected = Arc::clone(&self.connected);
        let still_connected: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(move || connected.load(Ordering::SeqCst));
        self.pool
            .run_background_connect(Arc::clone(&self.config), self.events_tx.clone(), still_connected);
    }

    /// `disconnect()` (spec.md §4.4): close all sessions, clear state.
    pub async fn disconnect(self: &Arc<Self>) {
        self.connected.store(false, Ordering::SeqCst);
        for session in self.pool.all_sessions() {
            session.disconnect().await;
        }
        self.transition(RouterState::Disconnected, None);
    }

    /// `reconnect()` (spec.md §4.4): await any in-flight background-connect
    /// sweep so it quiesces, then run a fresh endpoint sweep of its own.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.pool.quiesce_background_connect().await;
        self.connect().await
    }

    /// `send(opCode, writer, reader, affinityHint?) -> Result<T>` (spec.md
    /// §4.4). Resolves the affinity hint into a target session when
    /// partition-awareness is active, refreshing the distribution map for
    /// an unseen cache id first; retries across remaining sessions on
    /// `LostConnection` until exhausted.
    pub async fn send<W, R, T>(self: &Arc<Self>, op_code: i16, affinity_hint: Option<AffinityHint>, mut writer: W, mut reader: R) -> Result<T>
    where
        W: FnMut(&mut Vec<u8>),
        R: FnMut(&[u8]) -> Result<T>,
    {
        if self.state() != RouterState::Connected {
            return Err(ClientError::IllegalState(self.state()));
        }

        let selection = self.resolve_affinity_hint(affinity_hint).await?;

        let mut tried: Vec<Option<NodeId>> = Vec::new();
        let mut first_attempt = true;
        loop {
            let session = self.pick_session(selection, first_attempt, &tried)?;
            first_attempt = false;
            let node_id = session.node_id();
            let timeout = self.config.request_timeout;

            match session.send_request(op_code, |buf| writer(buf), |body| reader(body), timeout).await {
                Ok(value) => return Ok(value),
                Err(ClientError::LostConnection(reason)) => {
                    tracing::warn!(endpoint = %session.endpoint(), reason, "request failed, retrying on another session");
                    self.pool.remove_session(node_id, session.endpoint());
                    tried.push(node_id);
                    if self.pool.all_sessions().is_empty() {
                        self.transition(RouterState::Disconnected, Some("Cluster is unavailable".to_string()));
                        self.connected.store(false, Ordering::SeqCst);
                        return Err(ClientError::LostConnection("Cluster is unavailable".to_string()));
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Resolve an [`AffinityHint`] into a session-selection strategy,
    /// refreshing the distribution map for an unseen cache first (spec.md
    /// §4.3, §4.4 dispatch step 1-2).
    async fn resolve_affinity_hint(self: &Arc<Self>, hint: Option<AffinityHint>) -> Result<SessionSelection> {
        if !self.pool.partition_awareness_active() {
            return Ok(SessionSelection::Deterministic);
        }
        let Some(hint) = hint else {
            return Ok(SessionSelection::Deterministic);
        };

        if self.distribution.get(hint.cache_id).is_none() {
            // Refresh failures are logged and dropped, never surfaced to the
            // caller's own operation (spec.md §7); the next request for this
            // cache id tries again.
            if let Err(e) = self.refresh_cache_partitions(hint.cache_id).await {
                tracing::debug!(cache_id = hint.cache_id, error = %e, "CACHE_PARTITIONS refresh failed, falling back to random routing");
                return Ok(SessionSelection::Affinity(None));
            }
        }

        let Some(affinity_map) = self.distribution.get(hint.cache_id) else {
            // Refresh didn't populate it (e.g. unknown cache); fall back
            // to random routing rather than blocking dispatch.
            return Ok(SessionSelection::Affinity(None));
        };
        if affinity_map.partition_count() == 0 {
            // Non-applicable group: forces random routing forever for
            // this cache (spec.md §4.3).
            return Ok(SessionSelection::Affinity(None));
        }

        let (_, _, key_hash) = resolve_affinity_key(&hint.key, Some(&affinity_map.key_config), self.codec.as_ref());
        Ok(SessionSelection::Affinity(affinity_map.target_node_for_hash(key_hash)))
    }

    /// `getCachePartitions(cacheId)` (spec.md §4.3 "Refresh protocol"):
    /// issued as a `send` recursively, without an affinity hint.
    async fn refresh_cache_partitions(self: &Arc<Self>, cache_id: i32) -> Result<()> {
        let response = Box::pin(self.send(
            CACHE_PARTITIONS_OP_CODE,
            None,
            move |buf| encode_cache_partitions_request(buf, cache_id),
            |body| decode_cache_partitions_response(body),
        ))
        .await?;
        self.distribution.apply_refresh(response.version, &response.groups);
        Ok(())
    }

    fn pick_session(&self, selection: SessionSelection, first_attempt: bool, excluding: &[Option<NodeId>]) -> Result<Arc<NodeSession>> {
        if first_attempt {
            match selection {
                // affinityHint == null (or partition-awareness inactive):
                // the single active session (spec.md §4.4 step 2).
                SessionSelection::Deterministic => {
                    return self
                        .pool
                        .all_sessions()
                        .first()
                        .cloned()
                        .ok_or_else(|| ClientError::LostConnection("Cluster is unavailable".to_string()));
                }
                // Target node present in the pool: use it (spec.md §4.3
                // "Selecting a node"). Otherwise fall through to random.
                SessionSelection::Affinity(Some(node_id)) => {
                    if let Some(session) = self.pool.session_by_node(node_id) {
                        return Ok(session);
                    }
                }
                SessionSelection::Affinity(None) => {}
            }
        }

        let candidates: Vec<_> = self.pool.all_sessions().into_iter().filter(|s| !excluding.contains(&s.node_id())).collect();
        candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| ClientError::LostConnection("Cluster is unavailable".to_string()))
    }
}

fn spawn_event_listener(router: Arc<Router>, mut events_rx: mpsc::UnboundedReceiver<SessionEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Disconnected { endpoint, node_id } => {
                    router.pool.remove_session(node_id, &endpoint);
                    if router.pool.all_sessions().is_empty() && router.state() == RouterState::Connected {
                        tracing::warn!("all sessions lost, attempting reconnect");
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            if router.reconnect().await.is_err() {
                                tracing::warn!("reconnect sweep failed, router disconnected");
                            }
                        });
                    }
                }
                SessionEvent::TopologyChanged(version) => {
                    if router.distribution.observe_topology_version(version) {
                        router.kick_background_connect();
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_router_starts_disconnected() {
        let config = ClientConfig::new(vec!["127.0.0.1:10800".to_string()]);
        let router = Router::new(config).unwrap();
        assert_eq!(router.state(), RouterState::Disconnected);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ClientConfig::default();
        assert!(Router::new(config).is_err());
    }

    #[tokio::test]
    async fn send_before_connect_is_illegal_state() {
        let config = ClientConfig::new(vec!["127.0.0.1:10800".to_string()]);
        let router = Router::new(config).unwrap();
        let result = router
            .send(1, None, |_: &mut Vec<u8>| {}, |_: &[u8]| Ok::<(), ClientError>(()))
            .await;
        assert!(matches!(result, Err(ClientError::IllegalState(RouterState::Disconnected))));
    }

    #[tokio::test]
    async fn on_state_changed_fires_on_failed_connect() {
        let config = ClientConfig::new(vec!["127.0.0.1:1".to_string()]).with_connect_timeout(std::time::Duration::from_millis(50));
        let router = Router::new(config).unwrap();
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen_clone = Arc::clone(&seen);
        router.set_on_state_changed(move |state, _| {
            if state == RouterState::Connecting {
                seen_clone.store(true, Ordering::SeqCst);
            }
        });
        let _ = router.connect().await;
        assert!(seen.load(Ordering::SeqCst));
    }
}
