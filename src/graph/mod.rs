// Channel graph module - in-memory topology snapshot of the payment network
// This file defines the immutable Graph snapshot; store.rs owns publishing
// and refresh.rs keeps it warm in the background
//
// Numan Thabit 2025 Nov

pub mod channel;
pub mod refresh;
pub mod store;

pub use channel::{direction_between, Channel, ChannelKey, NodeId};
pub use refresh::{start_graph_refresh, GraphEvents, SyncEvent};
pub use store::GraphStore;

use crate::transport::ChannelRecord;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A read-only view of the channel graph.
///
/// Every edge is held once and indexed three ways: by source node, by
/// destination node and by its `(scid, direction)` key. A snapshot is never
/// mutated after construction; refreshes publish a new one.
#[derive(Debug, Clone)]
pub struct Graph {
    channels_from: HashMap<NodeId, Vec<Arc<Channel>>>,
    channels_to: HashMap<NodeId, Vec<Arc<Channel>>>,
    channel_by_key: HashMap<ChannelKey, Arc<Channel>>,
    synced_at: Instant,
}

impl Graph {
    /// Build a snapshot from directed edges. A key seen twice keeps the later
    /// edge at the position of the first one.
    pub fn from_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut ordered: Vec<Arc<Channel>> = Vec::new();
        let mut position: HashMap<ChannelKey, usize> = HashMap::new();
        for channel in channels {
            let key = channel.key();
            match position.get(&key) {
                Some(&idx) => ordered[idx] = Arc::new(channel),
                None => {
                    position.insert(key, ordered.len());
                    ordered.push(Arc::new(channel));
                }
            }
        }

        let mut channels_from: HashMap<NodeId, Vec<Arc<Channel>>> = HashMap::new();
        let mut channels_to: HashMap<NodeId, Vec<Arc<Channel>>> = HashMap::new();
        let mut channel_by_key = HashMap::with_capacity(ordered.len());
        for channel in ordered {
            channels_from
                .entry(channel.source.clone())
                .or_default()
                .push(Arc::clone(&channel));
            channels_to
                .entry(channel.destination.clone())
                .or_default()
                .push(Arc::clone(&channel));
            channel_by_key.insert(channel.key(), channel);
        }

        Self {
            channels_from,
            channels_to,
            channel_by_key,
            synced_at: Instant::now(),
        }
    }

    /// Build a snapshot from `listchannels` records, dropping disabled
    /// directions and records we cannot interpret.
    pub fn from_records(records: &[ChannelRecord]) -> Self {
        let mut skipped = 0usize;
        let channels = records
            .iter()
            .filter(|record| record.active.unwrap_or(true))
            .filter_map(|record| match Channel::try_from(record) {
                Ok(channel) => Some(channel),
                Err(err) => {
                    skipped += 1;
                    debug!(scid = %record.short_channel_id, error = %err, "skipping channel record");
                    None
                }
            })
            .collect::<Vec<_>>();
        if skipped > 0 {
            debug!(skipped = skipped, "ignored malformed channel records");
        }
        Self::from_channels(channels)
    }

    pub fn channels_from(&self, node: &NodeId) -> &[Arc<Channel>] {
        self.channels_from.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channels_to(&self, node: &NodeId) -> &[Arc<Channel>] {
        self.channels_to.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channel(&self, key: &ChannelKey) -> Option<&Arc<Channel>> {
        self.channel_by_key.get(key)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_by_key.len()
    }

    pub fn node_count(&self) -> usize {
        self.channels_from
            .keys()
            .chain(self.channels_to.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn synced_at(&self) -> Instant {
        self.synced_at
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.synced_at.elapsed() >= max_age
    }

    /// Structural equality of the three indices, ignoring sync time.
    pub fn same_topology(&self, other: &Graph) -> bool {
        fn same_buckets(
            a: &HashMap<NodeId, Vec<Arc<Channel>>>,
            b: &HashMap<NodeId, Vec<Arc<Channel>>>,
        ) -> bool {
            a.len() == b.len()
                && a.iter().all(|(node, edges)| {
                    b.get(node).is_some_and(|other| {
                        edges.len() == other.len()
                            && edges.iter().zip(other).all(|(x, y)| **x == **y)
                    })
                })
        }

        same_buckets(&self.channels_from, &other.channels_from)
            && same_buckets(&self.channels_to, &other.channels_to)
            && self.channel_by_key.len() == other.channel_by_key.len()
            && self
                .channel_by_key
                .iter()
                .all(|(key, edge)| other.channel_by_key.get(key).is_some_and(|e| **e == **edge))
    }
}
