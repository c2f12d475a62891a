//! The confirmation-lagged block-range scanner.
//!
//! One scanner instance owns one cursor row and drives one event sink. The
//! loop is strictly serial: poll the head, fetch one window of logs, hand
//! them to the sink in node order, then persist the cursor. The cursor only
//! moves after the whole window was dispatched, so a crash anywhere inside a
//! window replays it; every sink write is idempotent for that reason.

use {
    crate::node::{ChainClient, EventLog},
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    database::indexed_status::{self, IndexType},
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
    tokio_util::sync::CancellationToken,
};

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Projects a single log. Errors are logged by the scanner and do not
    /// abort the window.
    async fn on_log(&self, log: &EventLog) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub chain_id: i64,
    pub index_type: IndexType,
    pub contract: alloy_primitives::Address,
    /// Blocks below the head that are still considered unstable.
    pub confirmation_lag: u64,
    /// Maximum number of blocks a single `eth_getLogs` window spans.
    pub block_window: u64,
    /// Backoff between head polls and after transient RPC errors.
    pub poll_interval: Duration,
}

pub struct Scanner<S> {
    pool: PgPool,
    client: Arc<dyn ChainClient>,
    sink: S,
    config: ScannerConfig,
}

/// The next inclusive window to scan, or `None` while the chain has not
/// grown enough confirmed blocks.
fn next_window(next: u64, head: u64, lag: u64, window: u64) -> Option<(u64, u64)> {
    let safe_head = head.saturating_sub(lag);
    if next > safe_head {
        return None;
    }
    Some((next, (next + window).min(safe_head)))
}

impl<S: EventSink> Scanner<S> {
    pub fn new(pool: PgPool, client: Arc<dyn ChainClient>, sink: S, config: ScannerConfig) -> Self {
        Self {
            pool,
            client,
            sink,
            config,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let index_type = self.config.index_type;
        let cursor = {
            let mut ex = self.pool.acquire().await?;
            indexed_status::fetch(&mut ex, self.config.chain_id, index_type)
                .await?
                .with_context(|| format!("cursor row missing for {index_type:?}"))?
        };
        let mut next = u64::try_from(cursor.last_indexed_block)
            .context("cursor block number is negative")?;
        tracing::info!(?index_type, start_block = next, "scanner starting");

        loop {
            if cancel.is_cancelled() {
                tracing::info!(?index_type, "scanner stopped");
                return Ok(());
            }

            let head = match self.client.block_number().await {
                Ok(head) => head,
                Err(err) => {
                    tracing::warn!(?index_type, ?err, "failed to get current block number");
                    self.sleep(&cancel).await;
                    continue;
                }
            };

            let Some((start, end)) = next_window(
                next,
                head,
                self.config.confirmation_lag,
                self.config.block_window,
            ) else {
                self.sleep(&cancel).await;
                continue;
            };

            let logs = match self
                .client
                .filter_logs(start, end, self.config.contract)
                .await
            {
                Ok(logs) => logs,
                Err(err) => {
                    tracing::warn!(?index_type, ?err, start, end, "failed to fetch logs");
                    self.sleep(&cancel).await;
                    continue;
                }
            };

            for log in &logs {
                if let Err(err) = self.sink.on_log(log).await {
                    // The cursor still advances: the event is either
                    // malformed (retrying cannot help) or its writes are
                    // idempotent under the next replay.
                    tracing::error!(
                        ?index_type,
                        ?err,
                        tx_hash = %log.tx_hash,
                        block_number = log.block_number,
                        "failed to project event"
                    );
                    Metrics::get()
                        .projection_errors
                        .with_label_values(&[index_type.as_str()])
                        .inc();
                }
            }

            next = end + 1;
            let advanced = {
                let mut ex = self.pool.acquire().await?;
                indexed_status::advance(
                    &mut ex,
                    self.config.chain_id,
                    index_type,
                    i64::try_from(next).context("next block overflows cursor")?,
                )
                .await
                .context("failed to advance cursor")?
            };
            if advanced == 0 {
                return Err(anyhow!("cursor row vanished for {index_type:?}"));
            }

            let metrics = Metrics::get();
            metrics
                .windows_synced
                .with_label_values(&[index_type.as_str()])
                .inc();
            metrics
                .logs_dispatched
                .with_label_values(&[index_type.as_str()])
                .inc_by(logs.len() as u64);
            tracing::info!(?index_type, start, end, logs = logs.len(), "synced block window");
        }
    }

    async fn sleep(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Block windows fully dispatched and committed to the cursor.
    #[metric(labels("index_type"))]
    windows_synced: prometheus::IntCounterVec,

    /// Logs handed to the event sinks.
    #[metric(labels("index_type"))]
    logs_dispatched: prometheus::IntCounterVec,

    /// Logs whose projection failed and was skipped.
    #[metric(labels("index_type"))]
    projection_errors: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
