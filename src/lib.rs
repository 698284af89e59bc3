// Library root module for ln-pathpay
// This file defines the public API and module structure for the payment
// routing engine: channel graph, path search, route construction and execution
//
// Numan Thabit 2025 Nov

pub mod config;
pub mod control;
pub mod errors;
pub mod graph;
pub mod metrics;
pub mod router;
pub mod transport;
