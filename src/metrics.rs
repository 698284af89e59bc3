// Metrics and observability module
// This file registers the prometheus series for node calls, graph syncs
// and payment attempts
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

pub static RPC_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pathpay_rpc_latency_seconds",
        "latency of node command calls",
        &["method"]
    )
    .unwrap()
});

pub static RPC_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pathpay_rpc_errors_total",
        "failed node command calls by error kind",
        &["method", "kind"]
    )
    .unwrap()
});

pub static GRAPH_SYNCS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pathpay_graph_sync_total",
        "channel graph rebuilds by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static GRAPH_CHANNELS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pathpay_graph_channels",
        "directed channels in the published graph snapshot"
    )
    .unwrap()
});

pub static PAYMENT_ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pathpay_payment_attempts_total",
        "payment attempts by outcome",
        &["outcome"]
    )
    .unwrap()
});
