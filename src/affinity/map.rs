//! Distribution map: versioned per-cache partition-to-node mapping
//! (spec.md §3, §4.3).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::affinity::key::KeyConfig;
use crate::affinity::rendezvous::partition_for;
use crate::types::{AffinityTopologyVersion, NodeId};

/// One cache group as deserialized from a `CACHE_PARTITIONS` response
/// (spec.md §3, transient).
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub cache_id: i32,
    /// `true` iff the group uses the rendezvous affinity function.
    pub applicable: bool,
    pub key_config: KeyConfig,
    /// `nodeId -> [partitions]`, as received from the server.
    pub partition_map: Vec<(NodeId, Vec<i32>)>,
}

/// Stored, inverted form of one cache's affinity map (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct CacheAffinityMap {
    /// `partition -> nodeId`. Empty means "not applicable" — forces
    /// random routing forever for this cache (spec.md §4.3).
    pub partition_mapping: HashMap<i32, NodeId>,
    pub key_config: KeyConfig,
}

impl CacheAffinityMap {
    fn from_group(group: &CacheGroup) -> Self {
        let mut partition_mapping = HashMap::new();
        if group.applicable {
            for (node_id, partitions) in &group.partition_map {
                for partition in partitions {
                    partition_mapping.insert(*partition, *node_id);
                }
            }
        }
        CacheAffinityMap {
            partition_mapping,
            key_config: group.key_config.clone(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_mapping.len()
    }

    /// `partition = rendezvous(keyHash, |partitionMapping|); targetNodeId
    /// = partitionMapping[partition]` (spec.md §4.3 "Selecting a node").
    pub fn target_node_for_hash(&self, key_hash: i32) -> Option<NodeId> {
        let count = self.partition_count();
        if count == 0 {
            return None;
        }
        let partition = partition_for(key_hash, count) as i32;
        self.partition_mapping.get(&partition).copied()
    }
}

/// `cacheId -> CacheAffinityMap` (spec.md §3). Guarded by the router's
/// current [`AffinityTopologyVersion`] (invariant I4): a newer version
/// arriving clears the whole map.
pub struct DistributionMap {
    inner: RwLock<HashMap<i32, CacheAffinityMap>>,
    version: RwLock<AffinityTopologyVersion>,
}

impl Default for DistributionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionMap {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            version: RwLock::new(AffinityTopologyVersion::ZERO),
        }
    }

    pub fn current_version(&self) -> AffinityTopologyVersion {
        *self.version.read()
    }

    /// Look up a cache's affinity map, if the distribution map currently
    /// has an entry for it.
    pub fn get(&self, cache_id: i32) -> Option<CacheAffinityMap> {
        self.inner.read().get(&cache_id).cloned()
    }

    /// Apply a topology-change notification piggybacked on a response
    /// frame (spec.md §4.3 "Topology-change notification"). Returns `true`
    /// if the map was cleared (version strictly advanced).
    pub fn observe_topology_version(&self, new_version: AffinityTopologyVersion) -> bool {
        let mut version = self.version.write();
        if new_version > *version {
            *version = new_version;
            self.inner.write().clear();
            true
        } else {
            false
        }
    }

    /// Apply a `CACHE_PARTITIONS` response (spec.md §4.3 "Refresh
    /// protocol"): newer version clears and adopts, older is discarded,
    /// equal merges new cache entries only (existing entries kept as-is —
    /// invariant I4 already guarantees any stored entry matches the
    /// current version).
    pub fn apply_refresh(&self, response_version: AffinityTopologyVersion, groups: &[CacheGroup]) {
        let mut version = self.version.write();
        match response_version.cmp(&*version) {
            std::cmp::Ordering::Greater => {
                *version = response_version;
                let mut inner = self.inner.write();
                inner.clear();
                for group in groups {
                    inner.insert(group.cache_id, CacheAffinityMap::from_group(group));
                }
            }
            std::cmp::Ordering::Less => {
                // stale response, discard
            }
            std::cmp::Ordering::Equal => {
                let mut inner = self.inner.write();
                for group in groups {
                    inner.entry(group.cache_id).or_insert_with(|| CacheAffinityMap::from_group(group));
                }
            }
        }
    }
}
