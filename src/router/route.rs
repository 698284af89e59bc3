// Path and route types plus route construction
// This file turns an edge path into the per-hop forwarding plan handed to
// sendpay: amounts and cltv budgets are accumulated from the payee backwards
//
// Numan Thabit 2025 Nov

use crate::errors::RouteError;
use crate::graph::{Channel, ChannelKey, NodeId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered edges from payer to payee; each edge ends where the next starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    channels: Vec<Arc<Channel>>,
}

impl Path {
    pub(crate) fn new(channels: Vec<Arc<Channel>>) -> Self {
        debug_assert!(channels
            .windows(2)
            .all(|w| w[0].destination == w[1].source));
        Self { channels }
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.channels.iter().any(|c| c.is_key(key))
    }
}

/// One hop of a route in the shape `sendpay` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    /// Node receiving this hop.
    pub id: NodeId,
    pub channel: String,
    pub direction: u8,
    #[serde(rename = "amount_msat")]
    pub forward_msat: u64,
    #[serde(rename = "delay")]
    pub cltv_expiry_delta: u32,
}

impl RouteHop {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.channel.clone(), self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route {
    hops: Vec<RouteHop>,
}

impl Route {
    pub fn hops(&self) -> &[RouteHop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// What the payer sends into the first hop.
    pub fn amount_sent(&self) -> u64 {
        self.hops.first().map_or(0, |h| h.forward_msat)
    }

    /// What the payee receives.
    pub fn amount_delivered(&self) -> u64 {
        self.hops.last().map_or(0, |h| h.forward_msat)
    }

    pub fn fee_msat(&self) -> u64 {
        self.amount_sent().saturating_sub(self.amount_delivered())
    }

    pub fn total_cltv(&self) -> u32 {
        self.hops.first().map_or(0, |h| h.cltv_expiry_delta)
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.hops
            .iter()
            .any(|h| h.direction == key.direction && h.channel == key.short_channel_id)
    }

    pub fn channel_keys(&self) -> impl Iterator<Item = ChannelKey> + '_ {
        self.hops.iter().map(RouteHop::key)
    }
}

/// Build the forwarding plan for `path` delivering exactly `amount_msat`.
///
/// The last hop carries the bare amount and `final_cltv`. Walking back, hop
/// `i` must carry hop `i+1`'s amount plus the fee edge `i+1` charges for it,
/// and hop `i+1`'s cltv plus that edge's delta.
pub fn build_route(
    path: &Path,
    amount_msat: u64,
    final_cltv: u32,
    risk_factor: u64,
    fuzz_percent: f64,
) -> Result<Route, RouteError> {
    build_route_with_rng(
        path,
        amount_msat,
        final_cltv,
        risk_factor,
        fuzz_percent,
        &mut rand::thread_rng(),
    )
}

pub fn build_route_with_rng<R: Rng + ?Sized>(
    path: &Path,
    amount_msat: u64,
    final_cltv: u32,
    risk_factor: u64,
    fuzz_percent: f64,
    rng: &mut R,
) -> Result<Route, RouteError> {
    let channels = path.channels();
    let Some(last) = channels.last() else {
        return Err(RouteError::EmptyPath);
    };

    let mut forward = amount_msat;
    let mut cltv = final_cltv;
    let mut hops = Vec::with_capacity(channels.len());
    hops.push(hop(last, forward, cltv));
    for pair in channels.windows(2).rev() {
        let (this, next) = (&pair[0], &pair[1]);
        let fee = next.fee_with_rng(forward, risk_factor, fuzz_percent, rng);
        forward = forward.saturating_add(fee);
        cltv = cltv.saturating_add(next.cltv_delta);
        hops.push(hop(this, forward, cltv));
    }
    hops.reverse();
    Ok(Route { hops })
}

fn hop(channel: &Channel, forward_msat: u64, cltv_expiry_delta: u32) -> RouteHop {
    RouteHop {
        id: channel.destination.clone(),
        channel: channel.short_channel_id.clone(),
        direction: channel.direction,
        forward_msat,
        cltv_expiry_delta,
    }
}
