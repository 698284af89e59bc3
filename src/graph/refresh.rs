// Background graph refresh
//
// Periodically rebuilds the channel graph from the node and broadcasts a
// SyncEvent to subscribers after each successful sync.
//
// Numan Thabit 2025 Nov

use super::GraphStore;
use crate::transport::NodeRpc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEvent {
    pub channels: usize,
    pub nodes: usize,
}

#[derive(Clone)]
pub struct GraphEvents {
    tx: broadcast::Sender<SyncEvent>,
}

impl GraphEvents {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

/// Start the graph refresh task.
/// The first sync runs immediately; failures keep the previous snapshot and
/// are retried on the next tick.
pub fn start_graph_refresh<N>(
    node: Arc<N>,
    store: Arc<GraphStore>,
    events: GraphEvents,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    N: NodeRpc + 'static,
{
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "graph refresh started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sync(node.as_ref()).await {
                Ok(graph) => {
                    let event = SyncEvent {
                        channels: graph.channel_count(),
                        nodes: graph.node_count(),
                    };
                    // no subscribers is fine
                    let _ = events.tx.send(event);
                    debug!(channels = event.channels, nodes = event.nodes, "graph refreshed");
                }
                Err(err) => {
                    warn!(error = %err, "graph refresh failed; retrying next tick");
                }
            }
        }
    })
}
