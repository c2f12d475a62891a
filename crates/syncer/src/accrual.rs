//! The hourly time-weighted points engine.
//!
//! Per owner the engine walks the balance-change timeline and accrues
//! `balance x minutes` over hourly buckets, converted to points at 0.05 per
//! balance-hour. Buckets close on hour boundaries of the configured accrual
//! zone; `deadline_time` is the watermark separating accrued history from
//! pending balance rows (`whether_integral = 'N'`).
//!
//! The engine is the sole writer of `erc_integral_sum` and of the
//! `whether_integral` flag, so a pass takes no locks. A failed pass simply
//! leaves rows unflagged for the next pass; a balance row that lands behind
//! an already-closed deadline triggers a full recompute of the owner's
//! bucket (a "rewind").

use {
    anyhow::{Context, Result},
    bigdecimal::BigDecimal,
    database::{
        Tables,
        balances::{self, TimelinePoint},
        integral_sums::{self, IntegralSum},
    },
    rust_decimal::{Decimal, RoundingStrategy},
    sqlx::{PgConnection, PgPool},
    std::{
        collections::{HashMap, HashSet},
        str::FromStr,
        time::Duration,
    },
    tokio_util::sync::CancellationToken,
};

const HOUR: i64 = 3_600;

/// The next hour boundary strictly after `t`, in a zone `utc_offset` seconds
/// east of UTC. A `t` exactly on a boundary yields the following one.
fn next_hour(t: i64, utc_offset: i64) -> i64 {
    ((t + utc_offset).div_euclid(HOUR) + 1) * HOUR - utc_offset
}

/// The hour boundary at or before `t`, exclusive: a `t` exactly on a
/// boundary belongs to the bucket that closes there, so it truncates to the
/// previous boundary.
fn truncate_hour_exclusive(t: i64, utc_offset: i64) -> i64 {
    (t - 1 + utc_offset).div_euclid(HOUR) * HOUR - utc_offset
}

/// Whole minutes from `t1` to `t2`, both truncated to the minute. The chain
/// cannot move time backwards past the confirmation lag, so a negative
/// difference indicates corrupt data and is clamped to zero.
fn minutes_between(t1: i64, t2: i64) -> i64 {
    let minutes = t2.div_euclid(60) - t1.div_euclid(60);
    if minutes < 0 {
        tracing::warn!(t1, t2, "negative minute difference clamped to zero");
        return 0;
    }
    minutes
}

/// `Σ balance x minutes` over `[first point, hi]`. Each point's balance
/// holds until the next change; the last one holds until `hi`.
fn integrate(points: &[TimelinePoint], hi: i64) -> i64 {
    let mut total = 0;
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            let prev = &points[i - 1];
            total += prev.running_balance * minutes_between(prev.change_time, point.change_time);
        }
        if i == points.len() - 1 {
            total += point.running_balance * minutes_between(point.change_time, hi);
        }
    }
    total
}

/// Converts accumulated balance-minutes to points at 0.05 per balance-hour,
/// rounded to two decimals half away from zero.
fn to_points(quantity_minutes: i64) -> BigDecimal {
    let rate = Decimal::new(5, 2);
    let points = (Decimal::from(quantity_minutes) * rate / Decimal::from(60))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    BigDecimal::from_str(&points.to_string()).expect("decimal is valid")
}

pub struct AccrualEngine {
    pool: PgPool,
    tables: Tables,
    chain_id: i64,
    /// Seconds east of UTC of the zone whose hour boundaries bucket accrual.
    utc_offset: i64,
    pass_interval: Duration,
}

impl AccrualEngine {
    pub fn new(
        pool: PgPool,
        tables: Tables,
        chain_id: i64,
        utc_offset: i64,
        pass_interval: Duration,
    ) -> Self {
        Self {
            pool,
            tables,
            chain_id,
            utc_offset,
            pass_interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                tracing::info!("accrual engine stopped");
                return Ok(());
            }
            // Errors end the pass only; unflagged rows are picked up again.
            match self.pass().await {
                Ok(()) => Metrics::get().accrual_passes.inc(),
                Err(err) => {
                    tracing::error!(?err, "accrual pass failed");
                    Metrics::get().accrual_pass_errors.inc();
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.pass_interval) => {}
            }
        }
    }

    pub async fn pass(&self) -> Result<()> {
        let mut ex = self.pool.acquire().await?;
        let sums = integral_sums::fetch_all(&mut ex, &self.tables).await?;
        let pending = balances::unprocessed_owners(&mut ex, &self.tables).await?;

        if sums.is_empty() {
            for (owner, first_change) in &pending {
                self.open_first_bucket(&mut ex, owner, *first_change).await?;
            }
            return Ok(());
        }

        let pending_by_owner: HashMap<&str, i64> = pending
            .iter()
            .map(|(owner, first_change)| (owner.as_str(), *first_change))
            .collect();
        let known: HashSet<&str> = sums.iter().map(|sum| sum.owner.as_str()).collect();

        for sum in &sums {
            self.advance_bucket(&mut ex, sum, pending_by_owner.get(sum.owner.as_str()).copied())
                .await?;
        }
        // Owners trading for the first time since the last pass.
        for (owner, first_change) in &pending {
            if !known.contains(owner.as_str()) {
                self.open_first_bucket(&mut ex, owner, *first_change).await?;
            }
        }
        Ok(())
    }

    /// Case A: the owner has no bucket yet. Accrue `[first_change,
    /// next_hour(first_change)]` and insert the row.
    async fn open_first_bucket(
        &self,
        ex: &mut PgConnection,
        owner: &str,
        first_change: i64,
    ) -> Result<()> {
        let close = next_hour(first_change, self.utc_offset);
        let timeline = balances::timeline(ex, &self.tables, owner, close).await?;
        let points: Vec<TimelinePoint> = timeline
            .into_iter()
            .filter(|point| point.change_time >= first_change)
            .collect();
        let quantity_minutes = integrate(&points, close);

        integral_sums::insert(
            ex,
            &self.tables,
            &IntegralSum {
                chain_id: self.chain_id,
                owner: owner.to_string(),
                integral: to_points(quantity_minutes),
                deadline_time: close,
            },
        )
        .await
        .context("failed to insert integral sum")?;
        self.flag(ex, &points).await?;

        tracing::info!(owner, start_time = first_change, end_time = close, "accrued first bucket");
        Ok(())
    }

    /// Case B: advance an existing bucket by one hour, or rewind and fully
    /// recompute it when a balance row arrived behind the deadline.
    async fn advance_bucket(
        &self,
        ex: &mut PgConnection,
        sum: &IntegralSum,
        earliest_pending: Option<i64>,
    ) -> Result<()> {
        let close = next_hour(sum.deadline_time, self.utc_offset);
        let mut open = sum.deadline_time;
        let mut rewind = false;
        if let Some(change_time) = earliest_pending {
            if change_time < open {
                open = truncate_hour_exclusive(change_time, self.utc_offset);
                rewind = true;
                tracing::info!(
                    owner = %sum.owner,
                    change_time,
                    rewound_to = open,
                    "late balance row, recomputing bucket"
                );
            }
        }

        let timeline = balances::timeline(ex, &self.tables, &sum.owner, close).await?;
        let (points, quantity_minutes) = if rewind {
            // Recompute from the very first balance change.
            let quantity_minutes = integrate(&timeline, close);
            (timeline, quantity_minutes)
        } else {
            let in_bucket: Vec<TimelinePoint> = timeline
                .iter()
                .filter(|point| point.change_time >= open)
                .copied()
                .collect();
            let quantity_minutes = if in_bucket.is_empty() {
                // No changes this hour; the balance held flat.
                let resting = timeline
                    .iter()
                    .rev()
                    .find(|point| point.change_time <= open)
                    .map(|point| point.running_balance)
                    .unwrap_or(0);
                resting * minutes_between(open, close)
            } else {
                integrate(&in_bucket, close)
            };
            (in_bucket, quantity_minutes)
        };

        let row = IntegralSum {
            chain_id: self.chain_id,
            owner: sum.owner.clone(),
            integral: to_points(quantity_minutes),
            deadline_time: close,
        };
        if rewind {
            integral_sums::upsert_replace(ex, &self.tables, &row)
                .await
                .context("failed to replace integral sum")?;
        } else {
            integral_sums::upsert_add(ex, &self.tables, &row)
                .await
                .context("failed to add integral sum")?;
        }
        self.flag(ex, &points).await?;

        tracing::info!(owner = %sum.owner, start_time = open, end_time = close, "accrued bucket");
        Ok(())
    }

    async fn flag(&self, ex: &mut PgConnection, points: &[TimelinePoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let ids = points.iter().map(|point| point.id).collect::<Vec<_>>();
        balances::mark_integrated(ex, &self.tables, &ids)
            .await
            .context("failed to flag balance rows")?;
        Ok(())
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Completed accrual passes.
    accrual_passes: prometheus::IntCounter,

    /// Accrual passes aborted by an error.
    accrual_pass_errors: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2022-01-08 00:00:00 UTC, a clean day boundary.
    const DAY: i64 = 1_641_600_000;

    fn point(change_time: i64, running_balance: i64) -> TimelinePoint {
        TimelinePoint {
            id: change_time,
            change_time,
            running_balance,
        }
    }

    #[test]
    fn next_hour_boundaries() {
        // 12:10 -> 13:00
        assert_eq!(next_hour(DAY + 43_800, 0), DAY + 46_800);
        // Exactly 13:00 -> 14:00
        assert_eq!(next_hour(DAY + 46_800, 0), DAY + 50_400);
        // UTC+8: 00:00 UTC is 08:00 local, next local boundary is 01:00 UTC.
        assert_eq!(next_hour(DAY, 8 * HOUR), DAY + HOUR);
        // UTC+05:30: 00:00 UTC is 05:30 local, the boundary lands at 00:30.
        assert_eq!(next_hour(DAY, 5 * HOUR + 1_800), DAY + 1_800);
    }

    #[test]
    fn truncation_is_exclusive_on_boundaries() {
        // 13:45 -> 13:00
        assert_eq!(truncate_hour_exclusive(DAY + 49_500, 0), DAY + 46_800);
        // A row exactly at 14:00 belongs to the bucket closing at 14:00.
        assert_eq!(truncate_hour_exclusive(DAY + 50_400, 0), DAY + 46_800);
    }

    #[test]
    fn minute_arithmetic() {
        assert_eq!(minutes_between(DAY + 43_800, DAY + 45_000), 20);
        // Truncation to the minute before subtracting.
        assert_eq!(minutes_between(DAY + 659, DAY + 661), 1);
        assert_eq!(minutes_between(DAY + 601, DAY + 659), 0);
        // Backwards time never produces negative accrual.
        assert_eq!(minutes_between(DAY + 45_000, DAY + 43_800), 0);
    }

    #[test]
    fn integrates_balance_minutes() {
        // Mint 10 at 12:10, mint 5 more at 12:30, close at 13:00:
        // 10 x 20min + 15 x 30min = 650.
        let points = [point(DAY + 43_800, 10), point(DAY + 45_000, 15)];
        assert_eq!(integrate(&points, DAY + 46_800), 650);

        // A single change holds until the close.
        assert_eq!(integrate(&[point(DAY + 43_800, 10)], DAY + 46_800), 500);
        assert_eq!(integrate(&[], DAY + 46_800), 0);
    }

    #[test]
    fn converts_to_points() {
        assert_eq!(to_points(650), BigDecimal::from_str("0.54").unwrap());
        // 900 balance-minutes is a flat 15 tokens for an hour.
        assert_eq!(to_points(900), BigDecimal::from_str("0.75").unwrap());
        // Midpoints round away from zero: 30 x 0.05 / 60 = 0.025.
        assert_eq!(to_points(30), BigDecimal::from_str("0.03").unwrap());
        assert_eq!(to_points(0), BigDecimal::from_str("0.00").unwrap());
    }

    mod postgres {
        use {
            super::*,
            database::balances::{BalanceEvent, NewBalance},
        };

        fn mint(owner: &str, quantity: i64, change_time: i64, event_index: i64) -> NewBalance {
            NewBalance {
                chain_id: 1,
                owner: owner.to_string(),
                quantity,
                change_time,
                event: BalanceEvent::Mint,
                tx_hash: format!("0x{event_index:02x}"),
                event_index,
                leg: 0,
            }
        }

        async fn engine() -> (AccrualEngine, PgPool) {
            let tables = Tables::new("test");
            let pool = PgPool::connect("postgresql://").await.unwrap();
            let mut ex = pool.acquire().await.unwrap();
            database::testing::create_schema(&mut ex, &tables).await.unwrap();
            database::testing::clear(&mut ex, &tables).await.unwrap();
            drop(ex);
            let engine =
                AccrualEngine::new(pool.clone(), tables, 1, 0, Duration::from_secs(3_600));
            (engine, pool)
        }

        async fn record(pool: &PgPool, rows: &[NewBalance]) {
            let tables = Tables::new("test");
            let mut tx = pool.begin().await.unwrap();
            balances::record(&mut tx, &tables, rows).await.unwrap();
            tx.commit().await.unwrap();
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_first_hour_accrual() {
            let (engine, pool) = engine().await;
            let tables = Tables::new("test");
            let owner = "0xfirsthour";

            // Mint 10 at 12:10 and 5 more at 12:30.
            record(&pool, &[mint(owner, 10, DAY + 43_800, 1)]).await;
            record(&pool, &[mint(owner, 5, DAY + 45_000, 2)]).await;

            engine.pass().await.unwrap();

            let mut ex = pool.acquire().await.unwrap();
            let sum = integral_sums::fetch(&mut ex, &tables, owner).await.unwrap().unwrap();
            assert_eq!(sum.integral, BigDecimal::from_str("0.54").unwrap());
            assert_eq!(sum.deadline_time, DAY + 46_800);

            // Both rows consumed.
            assert!(
                balances::unprocessed_owners(&mut ex, &tables)
                    .await
                    .unwrap()
                    .iter()
                    .all(|(pending, _)| pending != owner)
            );
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_flat_balance_keeps_accruing() {
            let (engine, pool) = engine().await;
            let tables = Tables::new("test");
            let owner = "0xflat";

            record(&pool, &[mint(owner, 15, DAY + 45_000, 3)]).await;
            engine.pass().await.unwrap();
            // Second pass: no new rows, the flat 15 tokens earn a full hour.
            engine.pass().await.unwrap();

            let mut ex = pool.acquire().await.unwrap();
            let sum = integral_sums::fetch(&mut ex, &tables, owner).await.unwrap().unwrap();
            // 0.38 for the first partial hour (15 x 30min), then 0.75.
            assert_eq!(sum.integral, BigDecimal::from_str("1.13").unwrap());
            assert_eq!(sum.deadline_time, DAY + 50_400);
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_late_row_rewinds_bucket() {
            let (engine, pool) = engine().await;
            let tables = Tables::new("test");
            let owner = "0xlate";

            // History: 10 tokens since 12:30, already accrued through 14:00.
            record(&pool, &[mint(owner, 10, DAY + 45_000, 4)]).await;
            let mut ex = pool.acquire().await.unwrap();
            let timeline = balances::timeline(&mut ex, &tables, owner, i64::MAX).await.unwrap();
            balances::mark_integrated(&mut ex, &tables, &[timeline[0].id]).await.unwrap();
            integral_sums::insert(
                &mut ex,
                &tables,
                &IntegralSum {
                    chain_id: 1,
                    owner: owner.to_string(),
                    integral: BigDecimal::from_str("2.00").unwrap(),
                    deadline_time: DAY + 50_400,
                },
            )
            .await
            .unwrap();
            drop(ex);

            // A row lands at 13:45, behind the 14:00 deadline.
            record(&pool, &[mint(owner, 5, DAY + 49_500, 5)]).await;
            engine.pass().await.unwrap();

            let mut ex = pool.acquire().await.unwrap();
            let sum = integral_sums::fetch(&mut ex, &tables, owner).await.unwrap().unwrap();
            // Recomputed from scratch over [12:30, 15:00]:
            // 10 x 75min + 15 x 75min = 1875 -> 1.56, replacing the stale 2.00.
            assert_eq!(sum.integral, BigDecimal::from_str("1.56").unwrap());
            assert_eq!(sum.deadline_time, DAY + 54_000);

            assert!(
                balances::unprocessed_owners(&mut ex, &tables)
                    .await
                    .unwrap()
                    .iter()
                    .all(|(pending, _)| pending != owner)
            );
        }
    }
}
