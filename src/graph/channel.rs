// Directed channel edges and their identifiers
// This file defines node ids, the (short_channel_id, direction) key and the
// fee arithmetic every routing decision is built on
//
// Numan Thabit 2025 Nov

use crate::errors::RouteError;
use crate::transport::ChannelRecord;
use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minutes in a non-leap year divided by the 10-minute block target; turns a
/// cltv delta into a fraction of a year of locked funds.
pub const RISK_DIVISOR: u128 = 5_259_600;

const NODE_ID_LEN: usize = 33;

/// Hex-encoded compressed public key of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn parse(s: &str) -> Result<Self, RouteError> {
        let bytes = hex::decode(s).map_err(|_| RouteError::InvalidNodeId(s.to_string()))?;
        if bytes.len() != NODE_ID_LEN {
            return Err(RouteError::InvalidNodeId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = RouteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeId::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::parse(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key of a directed edge, written `<short_channel_id>/<direction>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub short_channel_id: String,
    pub direction: u8,
}

impl ChannelKey {
    pub fn new(short_channel_id: impl Into<String>, direction: u8) -> Self {
        Self {
            short_channel_id: short_channel_id.into(),
            direction,
        }
    }
}

impl FromStr for ChannelKey {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RouteError::InvalidChannelKey(s.to_string());
        let (scid, direction) = s.rsplit_once('/').ok_or_else(invalid)?;
        if scid.is_empty() {
            return Err(invalid());
        }
        match direction {
            "0" => Ok(Self::new(scid, 0)),
            "1" => Ok(Self::new(scid, 1)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.short_channel_id, self.direction)
    }
}

impl Serialize for ChannelKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Direction of the edge `source -> destination`: 0 when the source sorts first.
pub fn direction_between(source: &NodeId, destination: &NodeId) -> u8 {
    if source < destination {
        0
    } else {
        1
    }
}

/// One forwarding direction of a public channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub source: NodeId,
    pub destination: NodeId,
    pub short_channel_id: String,
    pub direction: u8,
    pub base_fee_msat: u64,
    pub fee_per_millionth: u64,
    pub cltv_delta: u32,
    pub htlc_min_msat: u64,
    pub htlc_max_msat: u64,
}

impl Channel {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.short_channel_id.clone(), self.direction)
    }

    pub fn is_key(&self, key: &ChannelKey) -> bool {
        self.direction == key.direction && self.short_channel_id == key.short_channel_id
    }

    /// Whether a single HTLC of `amount_msat` fits this edge's bounds.
    pub fn carries(&self, amount_msat: u64) -> bool {
        amount_msat >= self.htlc_min_msat && amount_msat <= self.htlc_max_msat
    }

    /// Base plus proportional fee, rounded up to the next millisatoshi.
    pub fn routing_fee(&self, amount_msat: u64) -> u64 {
        let proportional =
            (self.fee_per_millionth as u128 * amount_msat as u128).div_ceil(1_000_000);
        saturate(self.base_fee_msat as u128 + proportional)
    }

    /// Fee charged for forwarding `amount_msat`, including the time-value
    /// `risk_factor` surcharge and up to `fuzz_percent`% random noise.
    pub fn fee(&self, amount_msat: u64, risk_factor: u64, fuzz_percent: f64) -> u64 {
        self.fee_with_rng(amount_msat, risk_factor, fuzz_percent, &mut rand::thread_rng())
    }

    pub fn fee_with_rng<R: Rng + ?Sized>(
        &self,
        amount_msat: u64,
        risk_factor: u64,
        fuzz_percent: f64,
        rng: &mut R,
    ) -> u64 {
        let fee = self.routing_fee(amount_msat);
        let fuzz = if fuzz_percent > 0.0 {
            (rng.gen::<f64>() * fuzz_percent * fee as f64 / 100.0) as u64
        } else {
            0
        };
        let risk = self.cltv_delta as u128 * amount_msat as u128 * risk_factor as u128
            / RISK_DIVISOR;
        fee.saturating_add(fuzz).saturating_add(saturate(risk))
    }
}

fn saturate(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

impl TryFrom<&ChannelRecord> for Channel {
    type Error = RouteError;

    fn try_from(record: &ChannelRecord) -> Result<Self, Self::Error> {
        let source = NodeId::parse(&record.source)?;
        let destination = NodeId::parse(&record.destination)?;
        let direction = direction_between(&source, &destination);
        // Older nodes omit htlc_maximum_msat; the channel capacity is the
        // tightest bound we can still vouch for.
        let htlc_max_msat = record
            .htlc_maximum_msat
            .or(record.amount_msat)
            .unwrap_or(u64::MAX);
        Ok(Self {
            source,
            destination,
            short_channel_id: record.short_channel_id.clone(),
            direction,
            base_fee_msat: record.base_fee_millisatoshi,
            fee_per_millionth: record.fee_per_millionth,
            cltv_delta: record.delay,
            htlc_min_msat: record.htlc_minimum_msat.unwrap_or(0),
            htlc_max_msat,
        })
    }
}
