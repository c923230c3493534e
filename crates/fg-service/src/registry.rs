//! In-memory registry of running networks.
//!
//! The map lock is only ever held to read or mutate the map itself; callers
//! clone the `Arc<NetworkEntry>` out and release the lock before doing any
//! container or command work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fg_types::rpc::NetworkSummary;
use fg_types::{FabricGridError, Network, NetworkState, Result};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// A network plus its lifecycle state.
#[derive(Debug)]
pub struct NetworkEntry {
    network: Network,
    state: Mutex<NetworkState>,
    created_at: DateTime<Utc>,
    teardown: AsyncMutex<()>,
}

impl NetworkEntry {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(NetworkState::Created),
            created_at: Utc::now(),
            teardown: AsyncMutex::new(()),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn id(&self) -> &str {
        &self.network.id
    }

    pub fn state(&self) -> NetworkState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&self, next: NetworkState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            return Err(FabricGridError::Internal(format!(
                "network {}: illegal state transition {} -> {}",
                self.network.id, *state, next
            )));
        }
        debug!(network = %self.network.id, from = %*state, to = %next, "Network state transition");
        *state = next;
        Ok(())
    }

    /// Serializes stops of this network; held for the whole teardown.
    pub async fn lock_teardown(&self) -> MutexGuard<'_, ()> {
        self.teardown.lock().await
    }

    /// Enter `Stopping`. A network left in `Stopping` by a failed stop may
    /// be stopped again.
    pub fn begin_stop(&self) -> Result<()> {
        if self.state() == NetworkState::Stopping {
            debug!(network = %self.network.id, "Retrying stop");
            return Ok(());
        }
        self.transition(NetworkState::Stopping)
    }

    pub fn summary(&self) -> NetworkSummary {
        NetworkSummary {
            network_id: self.network.id.clone(),
            name: self.network.name.clone(),
            channel: self.network.channel.name.clone(),
            state: self.state(),
            organizations: self.network.organizations.len(),
            orderers: self.network.orderers.len(),
        }
    }
}

/// Network id -> entry, guarded by a reader/writer lock.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    entries: RwLock<HashMap<String, Arc<NetworkEntry>>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<NetworkEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    /// Like `get`, failing with `NetworkNotFound`.
    pub async fn lookup(&self, id: &str) -> Result<Arc<NetworkEntry>> {
        self.get(id)
            .await
            .ok_or_else(|| FabricGridError::NetworkNotFound(id.to_string()))
    }

    /// Register a network. Identifiers are unique; a duplicate is a bug.
    pub async fn insert(&self, entry: Arc<NetworkEntry>) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(entry.id()) {
            return Err(FabricGridError::Internal(format!(
                "network {} is already registered",
                entry.id()
            )));
        }
        info!(network = %entry.id(), total = entries.len() + 1, "Registered network");
        entries.insert(entry.id().to_string(), entry);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<NetworkEntry>> {
        let removed = self.entries.write().await.remove(id);
        if removed.is_some() {
            info!(network = id, "Unregistered network");
        }
        removed
    }

    /// Summaries ordered by registration time.
    pub async fn list(&self) -> Vec<NetworkSummary> {
        let mut entries: Vec<Arc<NetworkEntry>> =
            self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at());
        entries.iter().map(|e| e.summary()).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
