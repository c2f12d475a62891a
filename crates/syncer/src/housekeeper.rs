//! Periodic floor-price maintenance.
//!
//! Two independent tickers: a daily sweep drops snapshots that fell out of
//! the retention window, and the snapshot tick recomputes the current floor
//! of every collection from active listings. Snapshotting is optional
//! (deployments that aggregate external marketplaces compute floors
//! elsewhere); retention cleanup always runs.

use {
    anyhow::Result,
    database::{Tables, floor_prices},
    sqlx::PgPool,
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct FloorPriceKeeper {
    pool: PgPool,
    tables: Tables,
    /// Whether this deployment computes snapshots at all.
    snapshots_enabled: bool,
    snapshot_interval: Duration,
    retention: Duration,
    batch_size: usize,
}

impl FloorPriceKeeper {
    pub fn new(
        pool: PgPool,
        tables: Tables,
        snapshots_enabled: bool,
        snapshot_interval: Duration,
        retention: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            tables,
            snapshots_enabled,
            snapshot_interval,
            retention,
            batch_size,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let start = tokio::time::Instant::now();
        let mut retention_tick = tokio::time::interval_at(start + DAY, DAY);
        let mut snapshot_tick =
            tokio::time::interval_at(start + self.snapshot_interval, self.snapshot_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("floor price keeper stopped");
                    return Ok(());
                }
                _ = retention_tick.tick() => {
                    if let Err(err) = self.delete_expired().await {
                        tracing::warn!(?err, "failed to delete expired floor prices");
                    }
                }
                _ = snapshot_tick.tick() => {
                    if !self.snapshots_enabled {
                        continue;
                    }
                    if let Err(err) = self.snapshot().await {
                        tracing::warn!(?err, "failed to snapshot floor prices");
                    }
                }
            }
        }
    }

    async fn delete_expired(&self) -> Result<()> {
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp() - retention;
        let mut ex = self.pool.acquire().await?;
        let deleted = floor_prices::delete_older_than(&mut ex, &self.tables, cutoff).await?;
        tracing::debug!(deleted, cutoff, "floor price retention sweep");
        Ok(())
    }

    async fn snapshot(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut ex = self.pool.acquire().await?;
        let floors = floor_prices::query_current_floors(&mut ex, &self.tables, now).await?;
        for batch in floors.chunks(self.batch_size.max(1)) {
            floor_prices::upsert_snapshots(&mut ex, &self.tables, batch).await?;
        }
        tracing::debug!(collections = floors.len(), "floor prices snapshotted");
        Ok(())
    }
}
