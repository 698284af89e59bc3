use anyhow::{anyhow, Context, Result};
use ln_pathpay::config::AppConfig;
use ln_pathpay::control::AdmissionControl;
use ln_pathpay::graph::{start_graph_refresh, GraphEvents, GraphStore, NodeId};
use ln_pathpay::router::{PaymentExecutor, Router};
use ln_pathpay::transport::{JsonRpc, NodeRpc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal payment daemon error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;
    let pay_defaults = config.pay_defaults().context("payment defaults")?;

    let node = Arc::new(
        JsonRpc::new(
            config.rpc_endpoint.clone(),
            config.rpc_access_key.clone(),
            config.accept_invalid_certs(),
        )
        .with_context(|| format!("initialize node client for {}", config.rpc_endpoint))?
        .with_timeout(config.request_timeout()),
    );

    // readiness probe: the node must answer and report a valid id
    let info = node.getinfo().await.context("node readiness probe failed")?;
    let own_id = NodeId::parse(&info.id).context("node reported an invalid id")?;

    let graph = Arc::new(GraphStore::new(config.graph_staleness()));
    let events = GraphEvents::new(64);
    let mut sync_events = events.subscribe();
    let _refresh_handle = start_graph_refresh(
        Arc::clone(&node),
        Arc::clone(&graph),
        events,
        config.graph_refresh_interval(),
    );

    let executor = Arc::new(PaymentExecutor::new(
        Arc::clone(&node),
        Arc::clone(&graph),
        pay_defaults,
    ));
    let admission = AdmissionControl::new(config.max_inflight());
    let router = Arc::new(Router::new(executor).with_admission(admission.clone()));

    info!(
        node = %own_id,
        alias = info.alias.as_deref().unwrap_or(""),
        blockheight = ?info.blockheight,
        rpc = %node.endpoint(),
        max_inflight = admission.limit(),
        staleness_secs = config.graph_staleness().as_secs(),
        "payment router online"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = router.executor().get_stats();
                let channels = graph.current().await.map(|g| g.channel_count());
                info!(
                    total_payments = stats.total_payments,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    attempts = stats.total_attempts,
                    local_rejections = stats.local_rejections,
                    success_rate = stats.success_rate,
                    in_flight = admission.in_flight(),
                    channels = ?channels,
                    "pathpay heartbeat"
                );
            }
            event = sync_events.recv() => {
                match event {
                    Ok(event) => debug!(channels = event.channels, nodes = event.nodes, "graph snapshot replaced"),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped = skipped, "sync events lagged"),
                    Err(RecvError::Closed) => {
                        warn!("graph refresh task stopped");
                        return Err(anyhow!("graph refresh task exited"));
                    }
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl_c listener error");
                }
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
