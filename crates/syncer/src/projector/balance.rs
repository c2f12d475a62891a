//! Projects the reward token's `TokensMinted` / `TokensBurned` /
//! `TokensTransferred` events into the balance tables the points engine
//! consumes.

use {
    crate::{
        events::{self, DexEvent},
        node::{ChainClient, EventLog},
        scanner::EventSink,
    },
    alloy_primitives::U256,
    anyhow::{Context, Result},
    async_trait::async_trait,
    database::{
        Tables,
        balances::{self, BalanceEvent, NewBalance},
    },
    sqlx::PgPool,
    std::sync::Arc,
};

/// The token has 18 decimals; balances are tracked in whole tokens.
const SCALE: u64 = 1_000_000_000_000_000_000;

/// Whole-token amount as a signed quantity. Amounts beyond `i64` after
/// scaling are rejected rather than silently truncated.
fn scaled(amount: U256) -> Result<i64> {
    let whole = amount / U256::from(SCALE);
    i64::try_from(whole)
        .ok()
        .with_context(|| format!("scaled amount {whole} overflows i64"))
}

pub struct BalanceProjector {
    pool: PgPool,
    tables: Tables,
    client: Arc<dyn ChainClient>,
    chain_id: i64,
}

impl BalanceProjector {
    pub fn new(pool: PgPool, tables: Tables, client: Arc<dyn ChainClient>, chain_id: i64) -> Self {
        Self {
            pool,
            tables,
            client,
            chain_id,
        }
    }

    fn row(
        &self,
        log: &EventLog,
        owner: String,
        quantity: i64,
        change_time: i64,
        event: BalanceEvent,
        leg: i32,
    ) -> Result<NewBalance> {
        Ok(NewBalance {
            chain_id: self.chain_id,
            owner,
            quantity,
            change_time,
            event,
            tx_hash: log.tx_hash_hex(),
            event_index: i64::try_from(log.log_index).context("log index overflows i64")?,
            leg,
        })
    }

    async fn record(&self, rows: &[NewBalance]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        balances::record(&mut tx, &self.tables, rows)
            .await
            .context("failed to record balance change")?;
        tx.commit().await.context("commit balance change")?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for BalanceProjector {
    async fn on_log(&self, log: &EventLog) -> Result<()> {
        let event = match events::decode(log)? {
            Some(event) => event,
            None => return Ok(()),
        };
        let change_time = match event {
            DexEvent::Minted(_) | DexEvent::Burned(_) | DexEvent::Transferred(_) => self
                .client
                .block_time(log.block_number)
                .await
                .context("failed to get block time")?,
            // Order-book events belong to the other scanner.
            _ => return Ok(()),
        };

        match event {
            DexEvent::Minted(minted) => {
                let quantity = scaled(minted.amount)?;
                self.record(&[self.row(
                    log,
                    minted.to.to_string(),
                    quantity,
                    change_time,
                    BalanceEvent::Mint,
                    0,
                )?])
                .await
            }
            DexEvent::Burned(burned) => {
                let quantity = scaled(burned.amount)?;
                self.record(&[self.row(
                    log,
                    burned.from.to_string(),
                    -quantity,
                    change_time,
                    BalanceEvent::Burn,
                    0,
                )?])
                .await
            }
            DexEvent::Transferred(transfer) => {
                let quantity = scaled(transfer.amount)?;
                // Both legs go in one statement so the pair stays zero-sum.
                self.record(&[
                    self.row(
                        log,
                        transfer.from.to_string(),
                        -quantity,
                        change_time,
                        BalanceEvent::Transfer,
                        0,
                    )?,
                    self.row(
                        log,
                        transfer.to.to_string(),
                        quantity,
                        change_time,
                        BalanceEvent::Transfer,
                        1,
                    )?,
                ])
                .await
            }
            _ => unreachable!("filtered above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            events::{TokensMinted, TokensTransferred},
            node::MockChainClient,
        },
        alloy_primitives::{B256, address},
        alloy_sol_types::SolEvent,
    };

    #[test]
    fn scales_down_18_decimals() {
        assert_eq!(scaled(U256::from(SCALE)).unwrap(), 1);
        assert_eq!(scaled(U256::from(SCALE) * U256::from(25u64)).unwrap(), 25);
        // Dust below one whole token truncates to zero.
        assert_eq!(scaled(U256::from(SCALE - 1)).unwrap(), 0);
        // Values beyond i64 whole tokens are refused.
        let huge = U256::from(SCALE) * (U256::from(u64::MAX) + U256::from(1u8));
        assert!(scaled(huge).is_err());
    }

    fn encode<E: SolEvent>(event: &E, log_index: u64) -> EventLog {
        EventLog {
            topics: event.encode_topics().into_iter().map(|t| t.0).collect(),
            data: event.encode_data(),
            block_number: 55,
            tx_hash: B256::repeat_byte(0xbb),
            log_index,
        }
    }

    async fn projector() -> (BalanceProjector, sqlx::PgPool) {
        let tables = Tables::new("test");
        let pool = sqlx::PgPool::connect("postgresql://").await.unwrap();
        let mut ex = pool.acquire().await.unwrap();
        database::testing::create_schema(&mut ex, &tables).await.unwrap();
        database::testing::clear(&mut ex, &tables).await.unwrap();
        drop(ex);
        let mut client = MockChainClient::new();
        client.expect_block_time().returning(|_| Ok(1_700_000_000));
        (
            BalanceProjector::new(pool.clone(), tables, Arc::new(client), 1),
            pool,
        )
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_transfer_updates_both_sums() {
        let (projector, pool) = projector().await;
        let tables = Tables::new("test");
        let sender = address!("1111111111111111111111111111111111111111");
        let receiver = address!("2222222222222222222222222222222222222222");

        let mint = TokensMinted {
            to: sender,
            amount: U256::from(SCALE) * U256::from(5u64),
            by: sender,
        };
        projector.on_log(&encode(&mint, 0)).await.unwrap();

        let transfer = TokensTransferred {
            from: sender,
            to: receiver,
            amount: U256::from(SCALE) * U256::from(2u64),
        };
        projector.on_log(&encode(&transfer, 1)).await.unwrap();
        // Replay of the same log is a no-op.
        projector.on_log(&encode(&transfer, 1)).await.unwrap();

        let mut ex = pool.acquire().await.unwrap();
        assert_eq!(
            balances::fetch_sum(&mut ex, &tables, &sender.to_string()).await.unwrap(),
            Some(3)
        );
        assert_eq!(
            balances::fetch_sum(&mut ex, &tables, &receiver.to_string()).await.unwrap(),
            Some(2)
        );

        let timeline = balances::timeline(&mut ex, &tables, &sender.to_string(), i64::MAX)
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.last().unwrap().running_balance, 3);
    }
}
