use {
    crate::{
        accrual::AccrualEngine,
        arguments::Arguments,
        housekeeper::FloorPriceKeeper,
        node::{ChainClient, RpcNode},
        projector::{balance::BalanceProjector, orderbook::OrderbookProjector},
        queue::RedisQueue,
        scanner::{Scanner, ScannerConfig},
        shutdown,
    },
    database::{Tables, indexed_status::IndexType},
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
};

/// Assumes tracing and the metrics registry have already been set up.
pub async fn run(args: Arguments) {
    let chain_id = args.chain_id();
    let tables = Tables::new(args.chain.name());

    let pool = PgPool::connect(args.db_url.as_str())
        .await
        .expect("connect database");
    run_pool_metrics_job(pool.clone());

    let client: Arc<dyn ChainClient> = Arc::new(RpcNode::new(args.node_url.clone()));
    let queue = RedisQueue::connect(&args.redis_url, args.chain.name())
        .await
        .expect("connect redis");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown::signal_handler().await;
            cancel.cancel();
        });
    }

    let scanner_config = |index_type| ScannerConfig {
        chain_id,
        index_type,
        contract: args.dex_address,
        confirmation_lag: args.chain.confirmation_lag(),
        block_window: args.scan_block_window,
        poll_interval: args.scan_sleep_interval,
    };

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    let orderbook_scanner = Scanner::new(
        pool.clone(),
        client.clone(),
        OrderbookProjector::new(
            pool.clone(),
            tables.clone(),
            client.clone(),
            queue,
            args.eth_address.to_string(),
        ),
        scanner_config(IndexType::OrderBook),
    );
    tasks.spawn(orderbook_scanner.run(cancel.child_token()));

    let balance_scanner = Scanner::new(
        pool.clone(),
        client.clone(),
        BalanceProjector::new(pool.clone(), tables.clone(), client.clone(), chain_id),
        scanner_config(IndexType::Erc20),
    );
    tasks.spawn(balance_scanner.run(cancel.child_token()));

    let accrual = AccrualEngine::new(
        pool.clone(),
        tables.clone(),
        chain_id,
        args.accrual_utc_offset(),
        args.accrual_interval,
    );
    tasks.spawn(accrual.run(cancel.child_token()));

    let keeper = FloorPriceKeeper::new(
        pool.clone(),
        tables.clone(),
        args.floor_price_enabled,
        args.floor_price_interval,
        args.floor_price_retention,
        args.floor_price_batch_size,
    );
    tasks.spawn(keeper.run(cancel.child_token()));

    // Outside the join set: the server has no cancellation path and would
    // block the graceful drain below.
    let metrics_server = tokio::spawn(observe::metrics::serve_metrics(args.metrics_address));

    // Any loop ending on its own is fatal: the supervisor restarts the whole
    // process rather than running degraded.
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tasks.join_next() => {
            tracing::error!(?result, "task exited unexpectedly");
            std::process::exit(1);
        }
        result = metrics_server => {
            tracing::error!(?result, "metrics server exited unexpectedly");
            std::process::exit(1);
        }
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(?err, "task exited with error during shutdown"),
            Err(err) => tracing::warn!(?err, "task panicked during shutdown"),
        }
    }
    tracing::info!("shutdown complete");
}

fn run_pool_metrics_job(pool: PgPool) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let idle = i64::try_from(pool.num_idle()).unwrap_or(i64::MAX);
            let active = i64::from(pool.size()) - idle;
            let metrics = Metrics::get();
            metrics.active_connections.set(active);
            metrics.idle_connections.set(idle);
        }
    });
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Number of active connections in the database pool.
    #[metric(name = "database_active_connections")]
    active_connections: prometheus::IntGauge,

    /// Number of idle connections in the database pool.
    #[metric(name = "database_idle_connections")]
    idle_connections: prometheus::IntGauge,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
