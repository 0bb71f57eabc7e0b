//! Connection pool: live sessions keyed by node, inactive endpoints, and
//! the background connector (spec.md §4.2).
//!
//! Grounded in shape on RustyDB's `src/networking/transport/pool.rs`
//! (`HashMap<NodeId, ...>` of peer connections plus idle/health-check
//! background task) and `src/networking/pool/node_pool.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::{NodeSession, SessionEvent};
use crate::types::{Endpoint, NodeId};

const BACKOFF_FLOOR: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// One endpoint known to be currently unreachable or not yet tried,
/// carrying the exponential-backoff state the background connector
/// consults before retrying it (spec.md §9 Open Questions — backoff is
/// not optional here, it resolves that question).
struct InactiveEndpoint {
    endpoint: Endpoint,
    backoff: Duration,
    next_attempt_at: Instant,
}

impl InactiveEndpoint {
    fn fresh(endpoint: Endpoint) -> Self {
        InactiveEndpoint {
            endpoint,
            backoff: BACKOFF_FLOOR,
            next_attempt_at: Instant::now(),
        }
    }

    fn due(&self) -> bool {
        Instant::now() >= self.next_attempt_at
    }

    fn bump(&mut self) {
        self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
        self.next_attempt_at = Instant::now() + self.backoff;
    }
}

/// Connection pool (spec.md §4.2). Tracks sessions by [`NodeId`], at most
/// one legacy (no-NodeId) session, and the set of currently-inactive
/// endpoints.
pub struct ConnectionPool {
    sessions: RwLock<HashMap<NodeId, Arc<NodeSession>>>,
    legacy: RwLock<Option<Arc<NodeSession>>>,
    inactive: RwLock<Vec<InactiveEndpoint>>,
    partition_awareness_allowed: bool,
    connector_running: AtomicBool,
    connector_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(partition_awareness_allowed: bool, all_endpoints: &[Endpoint]) -> Self {
        ConnectionPool {
            sessions: RwLock::new(HashMap::new()),
            legacy: RwLock::new(None),
            inactive: RwLock::new(all_endpoints.iter().cloned().map(InactiveEndpoint::fresh).collect()),
            partition_awareness_allowed,
            connector_running: AtomicBool::new(false),
            connector_handle: RwLock::new(None),
        }
    }

    /// `addSession(session)` (spec.md §4.2). If the session has a NodeId
    /// and partition-awareness is permitted, store it under that NodeId,
    /// closing any prior session with the same id (invariant I1); else
    /// store it as the legacy session, closing any prior legacy session.
    /// Removes the endpoint from `inactive` (invariant I2).
    pub async fn add_session(&self, session: Arc<NodeSession>) {
        let endpoint = session.endpoint().clone();

        let replaced = if self.partition_awareness_allowed {
            if let Some(node_id) = session.node_id() {
                let mut sessions = self.sessions.write();
                sessions.insert(node_id, Arc::clone(&session))
            } else {
                let mut legacy = self.legacy.write();
                legacy.replace(Arc::clone(&session))
            }
        } else {
            let mut legacy = self.legacy.write();
            legacy.replace(Arc::clone(&session))
        };

        if let Some(old) = replaced {
            tracing::debug!(endpoint = %old.endpoint(), "closing superseded session (duplicate NodeId)");
            old.disconnect().await;
        }

        self.inactive.write().retain(|e| e.endpoint != endpoint);
        tracing::info!(endpoint = %endpoint, node_id = ?session.node_id(), "session added to pool");
    }

    /// `removeSession(session)` (spec.md §4.2): inverse of `addSession`.
    pub fn remove_session(&self, node_id: Option<NodeId>, endpoint: &Endpoint) {
        let removed = match node_id {
            Some(id) => self.sessions.write().remove(&id).is_some(),
            None => {
                let mut legacy = self.legacy.write();
                if legacy.as_ref().map(|s| s.endpoint() == endpoint).unwrap_or(false) {
                    *legacy = None;
                    true
                } else {
                    false
                }
            }
        };
        if removed {
            self.inactive.write().push(InactiveEndpoint::fresh(endpoint.clone()));
            tracing::info!(endpoint = %endpoint, "session removed from pool");
        }
    }

    /// `allSessions() -> list` (spec.md §4.2): a stable snapshot.
    pub fn all_sessions(&self) -> Vec<Arc<NodeSession>> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        if let Some(legacy) = self.legacy.read().clone() {
            sessions.push(legacy);
        }
        sessions
    }

    /// `randomSession() -> session` (spec.md §4.2): uniform selection over
    /// live sessions.
    pub fn random_session(&self) -> Result<Arc<NodeSession>> {
        let sessions = self.all_sessions();
        sessions
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| ClientError::LostConnection("Cluster is unavailable".to_string()))
    }

    pub fn session_by_node(&self, node_id: NodeId) -> Option<Arc<NodeSession>> {
        self.sessions.read().get(&node_id).cloned()
    }

    /// Invariant I3: `partitionAwarenessActive == (partitionAwarenessAllowed
    /// && liveSessions >= 2)` (spec.md §3, P5).
    pub fn partition_awareness_active(&self) -> bool {
        self.partition_awareness_allowed && self.all_sessions().len() >= 2
    }

    pub fn live_session_count(&self) -> usize {
        self.all_sessions().len()
    }

    /// `runBackgroundConnect()` (spec.md §4.2). At most one task runs at a
    /// time; snapshots `inactive`, attempts each endpoint whose backoff has
    /// elapsed, `add_session`s on success, drops failures silently. Checks
    /// `still_connected` between attempts and bails if the router has
    /// moved on.
    pub fn run_background_connect(
        self: &Arc<Self>,
        config: Arc<ClientConfig>,
        events: mpsc::UnboundedSender<SessionEvent>,
        still_connected: Arc<dyn Fn() -> bool + Send + Sync>,
    ) {
        if self
            .connector_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let snapshot: Vec<Endpoint> = {
                let inactive = pool.inactive.read();
                inactive.iter().filter(|e| e.due()).map(|e| e.endpoint.clone()).collect()
            };

            for endpoint in snapshot {
                if !still_connected() {
                    break;
                }

                match NodeSession::connect(endpoint.clone(), &config, events.clone()).await {
                    Ok(session) => {
                        if !still_connected() {
                            session.disconnect().await;
                            break;
                        }
                        pool.add_session(session).await;
                    }
                    Err(e) => {
                        tracing::debug!(endpoint = %endpoint, error = %e, "background connect attempt failed");
                        let mut inactive = pool.inactive.write();
                        if let Some(entry) = inactive.iter_mut().find(|e| e.endpoint == endpoint) {
                            entry.bump();
                        }
                    }
                }
            }

            pool.connector_running.store(false, Ordering::SeqCst);
        });
        *self.connector_handle.write() = Some(handle);
    }

    /// Awaits any in-flight background-connect sweep so a caller (spec.md
    /// §4.4 `reconnect()`) can run its own endpoint sweep without racing a
    /// still-running one.
    pub async fn quiesce_background_connect(&self) {
        let handle = self.connector_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n).map(|i| format!("127.0.0.1:{}", 10000 + i)).collect()
    }

    #[test]
    fn partition_awareness_requires_two_sessions_and_permission() {
        let pool = ConnectionPool::new(true, &endpoints(3));
        assert!(!pool.partition_awareness_active());
    }

    #[test]
    fn partition_awareness_disabled_when_not_allowed() {
        let pool = ConnectionPool::new(false, &endpoints(3));
        assert!(!pool.partition_awareness_active());
    }

    #[test]
    fn random_session_errors_when_pool_empty() {
        let pool = ConnectionPool::new(true, &endpoints(1));
        let err = pool.random_session().unwrap_err();
        assert!(matches!(err, ClientError::LostConnection(_)));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut entry = InactiveEndpoint::fresh("x:1".to_string());
        assert_eq!(entry.backoff, BACKOFF_FLOOR);
        for _ in 0..20 {
            entry.bump();
        }
        assert_eq!(entry.backoff, BACKOFF_CAP);
    }
}
