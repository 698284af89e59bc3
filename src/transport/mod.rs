// Transport module - the node command interface
// This file defines the NodeRpc trait the routing engine depends on; jsonrpc.rs
// implements it over HTTP
//
// Numan Thabit 2025 Nov

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::JsonRpc;
pub use types::{
    parse_amount_msat, ChannelRecord, DecodedInvoice, NodeInfo, PaymentResult, SendPayRequest,
};

use crate::errors::RpcError;
use async_trait::async_trait;
use std::time::Duration;

/// Commands the routing engine needs from the node.
///
/// Every call can fail with a transport, decode or command error, and callers
/// rely on [`RpcError::kind`] to tell them apart.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn getinfo(&self) -> Result<NodeInfo, RpcError>;

    /// Full channel-graph snapshot.
    async fn listchannels(&self) -> Result<Vec<ChannelRecord>, RpcError>;

    /// `description` is the preimage of a description-hash invoice, if any.
    async fn decodepay(
        &self,
        invoice: &str,
        description: Option<&str>,
    ) -> Result<DecodedInvoice, RpcError>;

    /// Start one payment attempt along an explicit route.
    async fn sendpay(&self, request: &SendPayRequest<'_>) -> Result<(), RpcError>;

    /// Block until the attempt for `payment_hash` resolves or `timeout` passes.
    async fn waitsendpay(
        &self,
        payment_hash: &str,
        timeout: Duration,
    ) -> Result<PaymentResult, RpcError>;
}
