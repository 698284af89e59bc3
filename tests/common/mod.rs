// In-memory node used by the integration tests
// MockNode serves a fixed channel list and scripted waitsendpay outcomes,
// and records every sendpay it receives
//
// Numan Thabit 2025 Nov

#![allow(dead_code)]

use async_trait::async_trait;
use ln_pathpay::errors::RpcError;
use ln_pathpay::graph::NodeId;
use ln_pathpay::router::RouteHop;
use ln_pathpay::transport::{
    ChannelRecord, DecodedInvoice, NodeInfo, NodeRpc, PaymentResult, SendPayRequest,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const OWN: u8 = 1;

pub fn id(n: u8) -> String {
    format!("02{}", hex::encode([n; 32]))
}

pub fn node_id(n: u8) -> NodeId {
    NodeId::parse(&id(n)).unwrap()
}

pub fn channel(src: u8, dst: u8, scid: &str, base: u64, ppm: u64, delay: u32) -> ChannelRecord {
    ChannelRecord {
        source: id(src),
        destination: id(dst),
        short_channel_id: scid.to_string(),
        active: Some(true),
        base_fee_millisatoshi: base,
        fee_per_millionth: ppm,
        delay,
        htlc_minimum_msat: Some(0),
        htlc_maximum_msat: Some(10_000_000_000),
        amount_msat: None,
    }
}

pub fn blame(scid: &str, direction: u8) -> Result<PaymentResult, RpcError> {
    Err(RpcError::Command {
        code: 204,
        message: "failed: WIRE_TEMPORARY_CHANNEL_FAILURE (reply from remote)".into(),
        data: Some(json!({
            "erring_index": 1,
            "erring_channel": scid,
            "erring_direction": direction
        })),
    })
}

#[derive(Debug, Clone)]
pub struct SentPay {
    pub payment_hash: String,
    pub route: Vec<RouteHop>,
}

pub struct MockNode {
    channels: Vec<ChannelRecord>,
    invoices: Mutex<HashMap<String, DecodedInvoice>>,
    outcomes: Mutex<VecDeque<Result<PaymentResult, RpcError>>>,
    sent: Mutex<Vec<SentPay>>,
    wait_delay: Option<Duration>,
    listchannels_calls: AtomicUsize,
    waiting: AtomicUsize,
    max_waiting: AtomicUsize,
}

impl MockNode {
    pub fn new(channels: Vec<ChannelRecord>) -> Self {
        Self {
            channels,
            invoices: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            wait_delay: None,
            listchannels_calls: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            max_waiting: AtomicUsize::new(0),
        }
    }

    /// Hold every waitsendpay for `delay` before answering.
    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    pub fn add_invoice(&self, bolt11: &str, payee: u8, amount_msat: Option<u64>) -> String {
        let payment_hash = hex::encode(bolt11.as_bytes()).repeat(2);
        self.invoices.lock().unwrap().insert(
            bolt11.to_string(),
            DecodedInvoice {
                payment_hash: payment_hash.clone(),
                payee: id(payee),
                amount_msat,
                min_final_cltv_expiry: Some(18),
                payment_secret: Some("cc".repeat(32)),
                description: None,
                created_at: None,
                expiry: None,
            },
        );
        payment_hash
    }

    pub fn push_outcome(&self, outcome: Result<PaymentResult, RpcError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn sent(&self) -> Vec<SentPay> {
        self.sent.lock().unwrap().clone()
    }

    pub fn listchannels_calls(&self) -> usize {
        self.listchannels_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_waits(&self) -> usize {
        self.max_waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn getinfo(&self) -> Result<NodeInfo, RpcError> {
        Ok(NodeInfo {
            id: id(OWN),
            alias: Some("mock".into()),
            blockheight: Some(800_000),
        })
    }

    async fn listchannels(&self) -> Result<Vec<ChannelRecord>, RpcError> {
        self.listchannels_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.channels.clone())
    }

    async fn decodepay(
        &self,
        invoice: &str,
        _description: Option<&str>,
    ) -> Result<DecodedInvoice, RpcError> {
        self.invoices
            .lock()
            .unwrap()
            .get(invoice)
            .cloned()
            .ok_or_else(|| RpcError::Command {
                code: -32602,
                message: format!("invalid bolt11: {invoice}"),
                data: None,
            })
    }

    async fn sendpay(&self, request: &SendPayRequest<'_>) -> Result<(), RpcError> {
        self.sent.lock().unwrap().push(SentPay {
            payment_hash: request.payment_hash.to_string(),
            route: request.route.to_vec(),
        });
        Ok(())
    }

    async fn waitsendpay(
        &self,
        payment_hash: &str,
        _timeout: Duration,
    ) -> Result<PaymentResult, RpcError> {
        let now = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_waiting.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.outcomes.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(serde_json::from_value(json!({
                "payment_hash": payment_hash,
                "status": "complete",
                "payment_preimage": "dd".repeat(32),
                "amount_sent_msat": "0msat"
            }))
            .unwrap())
        })
    }
}
