// Payment executor - drives one invoice to a final outcome
// This file implements the search/submit/await retry loop as an explicit state
// machine, excluding the channel the node blames after each failed attempt
//
// Numan Thabit 2025 Nov

use super::path::{channel_fee_limit, get_path, PathQuery, SearchStrategy, DEFAULT_MAX_HOPS};
use super::route::{build_route, Route};
use crate::errors::{PayError, RouteError, RpcError};
use crate::graph::{ChannelKey, GraphStore, NodeId};
use crate::metrics::PAYMENT_ATTEMPTS;
use crate::transport::{DecodedInvoice, NodeRpc, PaymentResult, SendPayRequest};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Terminal failure from the destination itself; no exclusion can help.
pub const PERMANENT_DESTINATION_FAILURE: i64 = 203;
pub const DEFAULT_FINAL_CLTV: u32 = 9;

const BLOCK_INTERVAL: Duration = Duration::from_secs(600);
const WAIT_MARGIN: Duration = Duration::from_secs(600);

/// Search order tried for the same exclusion set after a local fee rejection.
const STRATEGIES: [SearchStrategy; 2] = [SearchStrategy::FewestHops, SearchStrategy::LowestFee];

/// Execution statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub total_payments: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_attempts: u64,
    pub local_rejections: u64,
    pub success_rate: f64,
}

/// Executor-wide defaults, each overridable per payment.
#[derive(Debug, Clone)]
pub struct PayDefaults {
    pub max_fee_percent: f64,
    /// Payments up to this amount skip the fee-ratio check.
    pub exempt_fee_msat: u64,
    pub risk_factor: u64,
    pub max_attempts: u32,
    pub max_hops: usize,
    pub fuzz_percent: f64,
    /// Used when the invoice carries no min_final_cltv_expiry.
    pub final_cltv: u32,
    pub deadline: Option<Duration>,
}

impl Default for PayDefaults {
    fn default() -> Self {
        Self {
            max_fee_percent: 0.5,
            exempt_fee_msat: 5_000_000,
            risk_factor: 10,
            max_attempts: 30,
            max_hops: DEFAULT_MAX_HOPS,
            fuzz_percent: 0.0,
            final_cltv: DEFAULT_FINAL_CLTV,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentOptions {
    pub amount_msat: Option<u64>,
    pub risk_factor: Option<u64>,
    pub label: Option<String>,
    pub max_fee_percent: Option<f64>,
    pub exempt_fee_msat: Option<u64>,
    /// Description preimage for description-hash invoices.
    pub description: Option<String>,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
    pub fuzz_percent: Option<f64>,
}

/// Why an attempt failed, as recorded in the tries log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TryError {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erring_channel: Option<ChannelKey>,
}

impl TryError {
    fn from_rpc(err: &RpcError) -> Self {
        let message = match err {
            RpcError::Command { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind().as_str(),
            code: err.code(),
            message,
            erring_channel: err.erring_channel(),
        }
    }

    fn from_pay(err: &PayError) -> Self {
        match err {
            PayError::Rpc(rpc) => Self::from_rpc(rpc),
            PayError::RemoteRejected { code, message } => Self {
                kind: "command",
                code: Some(*code),
                message: message.clone(),
                erring_channel: None,
            },
            PayError::RepeatedExclusion(key) => Self {
                kind: "command",
                code: None,
                message: err.to_string(),
                erring_channel: Some(key.clone()),
            },
            other => Self {
                kind: "local",
                code: None,
                message: other.to_string(),
                erring_channel: None,
            },
        }
    }
}

/// One entry of the attempt log; appended once per submitted route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Try {
    pub route: Route,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TryError>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub success: bool,
    pub settlement: Option<PaymentResult>,
    pub tries: Vec<Try>,
    /// Why the payment stopped when it did not succeed. The real state of
    /// the payment is unknown after a transport failure.
    pub error: Option<PayError>,
}

enum State {
    Searching,
    LocalReject { fee_msat: u64, limit_msat: u64 },
    Submitted(Route),
    AwaitingResolution(Route),
    Succeeded(Route, PaymentResult),
    FailedRetryable(Route, RpcError, ChannelKey),
    FailedTerminal(Option<Route>, PayError),
}

/// Per-invocation state of one payment.
struct Flow {
    bolt11: String,
    invoice: DecodedInvoice,
    source: NodeId,
    payee: NodeId,
    amount_msat: u64,
    risk_factor: u64,
    max_fee_percent: f64,
    exempt_fee_msat: u64,
    max_attempts: u32,
    fuzz_percent: f64,
    final_cltv: u32,
    label: Option<String>,
    deadline: Option<Instant>,
    exclude: HashSet<ChannelKey>,
    strategy: usize,
    iterations: u32,
    tries: Vec<Try>,
}

impl Flow {
    /// Total fee ceiling for the whole route.
    fn fee_limit(&self) -> u64 {
        channel_fee_limit(self.amount_msat, self.max_fee_percent)
    }

    /// Per-channel ceiling handed to path search. Small payments may spend
    /// up to the exempt amount on a single channel.
    fn channel_fee_cap(&self) -> u64 {
        self.fee_limit().max(self.exempt_fee_msat)
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_passed(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}

/// Execution engine that turns invoices into settled payments
pub struct PaymentExecutor<N> {
    node: Arc<N>,
    graph: Arc<GraphStore>,
    defaults: PayDefaults,
    own_id: OnceCell<NodeId>,
    total_payments: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_attempts: AtomicU64,
    local_rejections: AtomicU64,
}

impl<N: NodeRpc> PaymentExecutor<N> {
    pub fn new(node: Arc<N>, graph: Arc<GraphStore>, defaults: PayDefaults) -> Self {
        Self {
            node,
            graph,
            defaults,
            own_id: OnceCell::new(),
            total_payments: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_attempts: AtomicU64::new(0),
            local_rejections: AtomicU64::new(0),
        }
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn defaults(&self) -> &PayDefaults {
        &self.defaults
    }

    /// Our node id, asked from the node once and cached.
    pub async fn own_id(&self) -> Result<&NodeId, RouteError> {
        self.own_id
            .get_or_try_init(|| async {
                let info = self.node.getinfo().await.map_err(RouteError::Node)?;
                NodeId::parse(&info.id)
            })
            .await
    }

    /// Get execution statistics
    pub fn get_stats(&self) -> ExecutionStats {
        let total = self.total_payments.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        ExecutionStats {
            total_payments: total,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            local_rejections: self.local_rejections.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                succeeded as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Pay `bolt11` and block until the payment is settled or conclusively
    /// failed.
    ///
    /// `Err` is returned only when the payment could not be started at all
    /// (undecodable invoice, missing amount, node unreachable for getinfo).
    /// Every later failure comes back as an unsuccessful [`PaymentOutcome`]
    /// carrying the tries log.
    #[tracing::instrument(skip_all, fields(payment_hash = tracing::field::Empty))]
    pub async fn pay_and_wait_until_resolution(
        &self,
        bolt11: &str,
        opts: PaymentOptions,
    ) -> Result<PaymentOutcome, PayError> {
        self.total_payments.fetch_add(1, Ordering::Relaxed);
        let mut flow = match self.prepare(bolt11, opts).await {
            Ok(flow) => flow,
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "payment could not be started");
                return Err(err);
            }
        };
        tracing::Span::current().record("payment_hash", flow.invoice.payment_hash.as_str());
        info!(
            amount_msat = flow.amount_msat,
            payee = %flow.payee,
            max_attempts = flow.max_attempts,
            "payment started"
        );

        let mut state = State::Searching;
        loop {
            state = match state {
                State::Searching => self.search(&mut flow).await,
                State::LocalReject {
                    fee_msat,
                    limit_msat,
                } => self.local_reject(&mut flow, fee_msat, limit_msat),
                State::Submitted(route) => self.submit(&flow, route).await,
                State::AwaitingResolution(route) => self.await_resolution(&flow, route).await,
                State::FailedRetryable(route, err, key) => {
                    PAYMENT_ATTEMPTS.with_label_values(&["retryable"]).inc();
                    info!(excluded = %key, code = ?err.code(), "attempt failed; excluding channel");
                    flow.tries.push(Try {
                        route,
                        error: Some(TryError::from_rpc(&err)),
                        success: false,
                    });
                    flow.exclude.insert(key);
                    flow.strategy = 0;
                    State::Searching
                }
                State::Succeeded(route, settlement) => {
                    PAYMENT_ATTEMPTS.with_label_values(&["succeeded"]).inc();
                    self.succeeded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        attempts = flow.tries.len() + 1,
                        fee_msat = route.fee_msat(),
                        "payment succeeded"
                    );
                    flow.tries.push(Try {
                        route,
                        error: None,
                        success: true,
                    });
                    return Ok(PaymentOutcome {
                        success: true,
                        settlement: Some(settlement),
                        tries: flow.tries,
                        error: None,
                    });
                }
                State::FailedTerminal(route, err) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    if let Some(route) = route {
                        PAYMENT_ATTEMPTS.with_label_values(&["terminal"]).inc();
                        flow.tries.push(Try {
                            route,
                            error: Some(TryError::from_pay(&err)),
                            success: false,
                        });
                    }
                    warn!(error = %err, attempts = flow.tries.len(), "payment failed");
                    return Ok(PaymentOutcome {
                        success: false,
                        settlement: None,
                        tries: flow.tries,
                        error: Some(err),
                    });
                }
            };
        }
    }

    async fn prepare(&self, bolt11: &str, opts: PaymentOptions) -> Result<Flow, PayError> {
        let invoice = self
            .node
            .decodepay(bolt11, opts.description.as_deref())
            .await?;
        let amount_msat = opts
            .amount_msat
            .or(invoice.amount_msat)
            .ok_or(PayError::MissingAmount)?;
        if amount_msat == 0 {
            return Err(RouteError::ZeroAmount.into());
        }
        let payee = NodeId::parse(&invoice.payee)?;
        let source = self.own_id().await?.clone();
        let deadline = opts
            .deadline
            .or(self.defaults.deadline)
            .map(|d| Instant::now() + d);

        Ok(Flow {
            bolt11: bolt11.to_string(),
            final_cltv: invoice
                .min_final_cltv_expiry
                .unwrap_or(self.defaults.final_cltv),
            invoice,
            source,
            payee,
            amount_msat,
            risk_factor: opts.risk_factor.unwrap_or(self.defaults.risk_factor),
            max_fee_percent: opts.max_fee_percent.unwrap_or(self.defaults.max_fee_percent),
            exempt_fee_msat: opts.exempt_fee_msat.unwrap_or(self.defaults.exempt_fee_msat),
            max_attempts: opts.max_attempts.unwrap_or(self.defaults.max_attempts),
            fuzz_percent: opts.fuzz_percent.unwrap_or(self.defaults.fuzz_percent),
            label: opts.label,
            deadline,
            exclude: HashSet::new(),
            strategy: 0,
            iterations: 0,
            tries: Vec::new(),
        })
    }

    async fn search(&self, flow: &mut Flow) -> State {
        flow.iterations += 1;
        if flow.iterations > flow.max_attempts {
            return State::FailedTerminal(None, PayError::AttemptsExhausted(flow.max_attempts));
        }
        if flow.deadline_passed() {
            return State::FailedTerminal(None, PayError::DeadlineExceeded);
        }

        let graph = match self.graph.snapshot(self.node.as_ref()).await {
            Ok(graph) => graph,
            Err(err) => return State::FailedTerminal(None, RouteError::Node(err).into()),
        };
        let query = PathQuery::new(flow.source.clone(), flow.payee.clone(), flow.amount_msat)
            .exclude(flow.exclude.clone())
            .max_hops(self.defaults.max_hops)
            .max_channel_fee_msat(flow.channel_fee_cap())
            .strategy(STRATEGIES[flow.strategy]);
        let route = match get_path(&graph, &query).and_then(|path| {
            build_route(
                &path,
                flow.amount_msat,
                flow.final_cltv,
                flow.risk_factor,
                flow.fuzz_percent,
            )
        }) {
            Ok(route) => route,
            Err(err) => return State::FailedTerminal(None, err.into()),
        };

        let fee_msat = route.fee_msat();
        let limit_msat = flow.fee_limit();
        debug!(
            iteration = flow.iterations,
            hops = route.len(),
            fee_msat = fee_msat,
            excluded = flow.exclude.len(),
            "candidate route"
        );
        if flow.amount_msat > flow.exempt_fee_msat && fee_msat > limit_msat {
            State::LocalReject {
                fee_msat,
                limit_msat,
            }
        } else {
            State::Submitted(route)
        }
    }

    fn local_reject(&self, flow: &mut Flow, fee_msat: u64, limit_msat: u64) -> State {
        self.local_rejections.fetch_add(1, Ordering::Relaxed);
        PAYMENT_ATTEMPTS.with_label_values(&["local_reject"]).inc();
        flow.strategy += 1;
        if flow.strategy >= STRATEGIES.len() {
            return State::FailedTerminal(
                None,
                PayError::FeeBudgetExceeded {
                    fee_msat,
                    limit_msat,
                },
            );
        }
        debug!(
            fee_msat = fee_msat,
            limit_msat = limit_msat,
            next = ?STRATEGIES[flow.strategy],
            "route too expensive; searching again"
        );
        State::Searching
    }

    async fn submit(&self, flow: &Flow, route: Route) -> State {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        let request = SendPayRequest {
            route: route.hops(),
            payment_hash: &flow.invoice.payment_hash,
            label: flow.label.as_deref(),
            bolt11: &flow.bolt11,
            amount_msat: flow.amount_msat,
            payment_secret: flow.invoice.payment_secret.as_deref(),
        };
        // waitsendpay reports the same failure, so a sendpay error is only logged
        if let Err(err) = self.node.sendpay(&request).await {
            debug!(error = %err, "sendpay returned an error");
        }
        State::AwaitingResolution(route)
    }

    async fn await_resolution(&self, flow: &Flow, route: Route) -> State {
        let mut wait = BLOCK_INTERVAL * route.total_cltv() + WAIT_MARGIN;
        if let Some(remaining) = flow.remaining() {
            wait = wait.min(remaining);
        }
        let waiting = self.node.waitsendpay(&flow.invoice.payment_hash, wait);
        let result = match flow.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, waiting).await {
                Ok(result) => result,
                Err(_) => {
                    return State::FailedTerminal(Some(route), PayError::DeadlineExceeded);
                }
            },
            None => waiting.await,
        };

        match result {
            Ok(settlement) if settlement.is_complete() => State::Succeeded(route, settlement),
            Ok(settlement) => State::FailedTerminal(
                Some(route),
                PayError::RemoteRejected {
                    code: 0,
                    message: format!(
                        "payment ended with status {}",
                        settlement.status.as_deref().unwrap_or("unknown")
                    ),
                },
            ),
            Err(err) => self.classify_failure(flow, route, err),
        }
    }

    fn classify_failure(&self, flow: &Flow, route: Route, err: RpcError) -> State {
        let RpcError::Command { code, message, .. } = &err else {
            if flow.deadline_passed() {
                return State::FailedTerminal(Some(route), PayError::DeadlineExceeded);
            }
            return State::FailedTerminal(Some(route), PayError::Rpc(err));
        };
        let rejected = PayError::RemoteRejected {
            code: *code,
            message: message.clone(),
        };
        if *code == PERMANENT_DESTINATION_FAILURE {
            return State::FailedTerminal(Some(route), rejected);
        }
        match err.erring_channel() {
            Some(key) if flow.exclude.contains(&key) => {
                State::FailedTerminal(Some(route), PayError::RepeatedExclusion(key))
            }
            Some(key) => State::FailedRetryable(route, err, key),
            None => State::FailedTerminal(Some(route), rejected),
        }
    }
}
