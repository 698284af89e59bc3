// Router module - path search, route construction and payment execution
// This file wires the routing plane together: path.rs finds edge paths,
// route.rs prices them hop by hop and execution.rs pays them
//
// Numan Thabit 2025 Nov

pub mod execution;
pub mod path;
pub mod route;

#[allow(clippy::module_inception)]
pub mod router;

pub use execution::{
    ExecutionStats, PayDefaults, PaymentExecutor, PaymentOptions, PaymentOutcome, Try, TryError,
};
pub use path::{channel_fee_limit, get_path, PathQuery, SearchStrategy};
pub use route::{build_route, Path, Route, RouteHop};
pub use router::{RouteRequest, Router};
