// Error types and error handling module
// This file defines the error taxonomy shared by the node transport,
// the graph/path layer and the payment executor
//
// Numan Thabit 2025 Nov

use crate::graph::ChannelKey;
use serde_json::Value;
use thiserror::Error;

/// Coarse classification of a node command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Node unreachable or the call timed out.
    Transport,
    /// The node answered with something we could not parse.
    Decode,
    /// The node rejected the command at the application level.
    Command,
}

impl RpcErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorKind::Transport => "transport",
            RpcErrorKind::Decode => "decode",
            RpcErrorKind::Command => "command",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("unable to reach node at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("error decoding node response: {0}")]
    Decode(String),
    #[error("node replied with error: {message} ({code})")]
    Command {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl RpcError {
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            RpcError::Connect { .. } | RpcError::Timeout { .. } => RpcErrorKind::Transport,
            RpcError::Decode(_) => RpcErrorKind::Decode,
            RpcError::Command { .. } => RpcErrorKind::Command,
        }
    }

    /// Numeric command code, if the node produced one.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Command { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The channel the node blamed for a failed payment attempt.
    ///
    /// Only structured command errors whose `data` names both the erring channel
    /// and its direction produce a key; everything else returns `None`.
    pub fn erring_channel(&self) -> Option<ChannelKey> {
        let RpcError::Command {
            data: Some(data), ..
        } = self
        else {
            return None;
        };
        let scid = data.get("erring_channel")?.as_str()?;
        let direction = match data.get("erring_direction")? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        if direction > 1 {
            return None;
        }
        Some(ChannelKey::new(scid, direction as u8))
    }
}

#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("start == end")]
    SameEndpoint,
    #[error("no path found")]
    NoPathFound,
    #[error("cannot build a route from an empty path")]
    EmptyPath,
    #[error("amount can't be 0")]
    ZeroAmount,
    #[error("invalid channel key '{0}', expected <short_channel_id>/<direction>")]
    InvalidChannelKey(String),
    #[error("invalid node id '{0}'")]
    InvalidNodeId(String),
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("node call failed: {0}")]
    Node(#[from] RpcError),
}

#[derive(Debug, Clone, Error)]
pub enum PayError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("invoice has no amount and none was given")]
    MissingAmount,
    #[error("failed to query route: {0}")]
    Route(#[from] RouteError),
    #[error("fee {fee_msat}msat exceeds the allowed {limit_msat}msat")]
    FeeBudgetExceeded { fee_msat: u64, limit_msat: u64 },
    #[error("payment rejected: {message} ({code})")]
    RemoteRejected { code: i64, message: String },
    #[error("node blamed {0} again, which was already excluded")]
    RepeatedExclusion(ChannelKey),
    #[error("gave up after {0} attempts")]
    AttemptsExhausted(u32),
    #[error("payment deadline exceeded")]
    DeadlineExceeded,
}
