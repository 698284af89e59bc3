// Router facade - route queries, payments and payment history
// This file ties path search, route construction and the payment executor
// together behind the operations callers use
//
// Numan Thabit 2025 Nov

use super::execution::{PaymentExecutor, PaymentOptions, PaymentOutcome, Try, DEFAULT_FINAL_CLTV};
use super::path::{channel_fee_limit, get_path, PathQuery, DEFAULT_MAX_HOPS};
use super::route::{build_route, Route};
use crate::control::AdmissionControl;
use crate::errors::{PayError, RouteError};
use crate::graph::{ChannelKey, NodeId};
use crate::transport::NodeRpc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub const DEFAULT_FUZZ_PERCENT: f64 = 5.0;
pub const DEFAULT_MAX_CHANNEL_FEE_PERCENT: f64 = 0.5;

/// Parameters of a standalone route query.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub id: NodeId,
    pub amount_msat: u64,
    pub risk_factor: u64,
    pub cltv: Option<u32>,
    /// Defaults to our own node.
    pub from_id: Option<NodeId>,
    pub fuzz_percent: Option<f64>,
    pub exclude: HashSet<ChannelKey>,
    pub max_hops: Option<usize>,
    pub max_channel_fee_percent: Option<f64>,
}

impl RouteRequest {
    pub fn new(id: NodeId, amount_msat: u64, risk_factor: u64) -> Self {
        Self {
            id,
            amount_msat,
            risk_factor,
            cltv: None,
            from_id: None,
            fuzz_percent: None,
            exclude: HashSet::new(),
            max_hops: None,
            max_channel_fee_percent: None,
        }
    }
}

/// High-level Router that ties route queries and payment execution together
pub struct Router<N> {
    executor: Arc<PaymentExecutor<N>>,
    history: RwLock<HashMap<String, Vec<Try>>>,
    admission: Option<AdmissionControl>,
}

impl<N: NodeRpc> Router<N> {
    pub fn new(executor: Arc<PaymentExecutor<N>>) -> Self {
        Self {
            executor,
            history: RwLock::new(HashMap::new()),
            admission: None,
        }
    }

    pub fn with_admission(mut self, admission: AdmissionControl) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Get access to the payment executor (for statistics and defaults)
    pub fn executor(&self) -> &Arc<PaymentExecutor<N>> {
        &self.executor
    }

    /// Find a route without paying it.
    #[tracing::instrument(skip_all, fields(amount_msat = req.amount_msat, excluded = req.exclude.len()))]
    pub async fn get_route(&self, req: RouteRequest) -> Result<Route, RouteError> {
        if req.amount_msat == 0 {
            return Err(RouteError::ZeroAmount);
        }
        let source = match req.from_id {
            Some(id) => id,
            None => self.executor.own_id().await?.clone(),
        };
        if source == req.id {
            return Err(RouteError::SameEndpoint);
        }

        let graph = self
            .executor
            .graph()
            .snapshot(self.executor.node().as_ref())
            .await?;
        let percent = req
            .max_channel_fee_percent
            .unwrap_or(DEFAULT_MAX_CHANNEL_FEE_PERCENT);
        let query = PathQuery::new(source, req.id, req.amount_msat)
            .exclude(req.exclude)
            .max_hops(req.max_hops.unwrap_or(DEFAULT_MAX_HOPS))
            .max_channel_fee_msat(channel_fee_limit(req.amount_msat, percent));
        let path = get_path(&graph, &query)?;
        build_route(
            &path,
            req.amount_msat,
            req.cltv.unwrap_or(DEFAULT_FINAL_CLTV),
            req.risk_factor,
            req.fuzz_percent.unwrap_or(DEFAULT_FUZZ_PERCENT),
        )
    }

    /// Pay an invoice, waiting for a free admission slot first, and keep its
    /// tries log for [`Router::payment_status`].
    pub async fn pay(&self, bolt11: &str, opts: PaymentOptions) -> Result<PaymentOutcome, PayError> {
        let _permit = match &self.admission {
            Some(admission) => Some(admission.acquire().await),
            None => None,
        };
        let outcome = self
            .executor
            .pay_and_wait_until_resolution(bolt11, opts)
            .await?;
        info!(
            success = outcome.success,
            tries = outcome.tries.len(),
            "payment resolved"
        );
        self.history
            .write()
            .await
            .insert(bolt11.to_string(), outcome.tries.clone());
        Ok(outcome)
    }

    /// Tries log of the last payment of `bolt11` made through this router.
    pub async fn payment_status(&self, bolt11: &str) -> Option<Vec<Try>> {
        self.history.read().await.get(bolt11).cloned()
    }
}
