// Graph store - single owner of the published channel graph
// This file rebuilds the graph from listchannels and swaps the new snapshot
// in atomically, so readers always hold a consistent view
//
// Numan Thabit 2025 Nov

use super::Graph;
use crate::errors::RpcError;
use crate::metrics::{GRAPH_CHANNELS, GRAPH_SYNCS};
use crate::transport::NodeRpc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30 * 60);

/// Owns the current [`Graph`] snapshot.
///
/// A sync builds a brand new graph without holding any lock and then replaces
/// the pointer. A failed sync leaves the previous snapshot published.
#[derive(Debug)]
pub struct GraphStore {
    current: RwLock<Option<Arc<Graph>>>,
    sync_lock: Mutex<()>,
    staleness: Duration,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl GraphStore {
    pub fn new(staleness: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            sync_lock: Mutex::new(()),
            staleness,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Currently published snapshot, if any sync has succeeded yet.
    pub async fn current(&self) -> Option<Arc<Graph>> {
        self.current.read().await.clone()
    }

    /// Replace the snapshot with one built from a fresh `listchannels`.
    /// Waits for any sync already running.
    pub async fn sync<N: NodeRpc + ?Sized>(&self, node: &N) -> Result<Arc<Graph>, RpcError> {
        let _guard = self.sync_lock.lock().await;
        self.rebuild(node).await
    }

    /// Callers hold `sync_lock`.
    #[tracing::instrument(skip_all)]
    async fn rebuild<N: NodeRpc + ?Sized>(&self, node: &N) -> Result<Arc<Graph>, RpcError> {
        let started = Instant::now();
        let records = match node.listchannels().await {
            Ok(records) => records,
            Err(err) => {
                GRAPH_SYNCS.with_label_values(&["failed"]).inc();
                warn!(error = %err, "graph sync failed; keeping previous snapshot");
                return Err(err);
            }
        };
        let graph = Graph::from_records(&records);
        info!(
            records = records.len(),
            channels = graph.channel_count(),
            nodes = graph.node_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph synced"
        );
        GRAPH_SYNCS.with_label_values(&["ok"]).inc();
        Ok(self.publish(graph).await)
    }

    /// A snapshot no older than the staleness threshold, syncing first when
    /// needed. Concurrent callers share a single sync.
    pub async fn snapshot<N: NodeRpc + ?Sized>(&self, node: &N) -> Result<Arc<Graph>, RpcError> {
        if let Some(graph) = self.fresh().await {
            return Ok(graph);
        }
        let _guard = self.sync_lock.lock().await;
        // another caller may have synced while we waited
        if let Some(graph) = self.fresh().await {
            return Ok(graph);
        }
        self.rebuild(node).await
    }

    pub async fn publish(&self, graph: Graph) -> Arc<Graph> {
        let graph = Arc::new(graph);
        GRAPH_CHANNELS.set(graph.channel_count() as i64);
        *self.current.write().await = Some(Arc::clone(&graph));
        graph
    }

    async fn fresh(&self) -> Option<Arc<Graph>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|g| !g.is_stale(self.staleness))
            .cloned()
    }
}
