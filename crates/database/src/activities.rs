use {
    crate::Tables,
    bigdecimal::BigDecimal,
    sqlx::{Executor, PgConnection},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i32)]
pub enum ActivityKind {
    #[default]
    Listing = 1,
    CollectionBid = 2,
    ItemBid = 3,
    CancelListing = 4,
    CancelCollectionBid = 5,
    CancelItemBid = 6,
    Sale = 7,
}

/// One row in the append-only `activities_<chain>` table. `(tx_hash,
/// event_index)` is the natural key that makes window replays no-ops.
#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct Activity {
    pub activity_type: ActivityKind,
    pub maker: String,
    pub taker: String,
    pub collection_address: String,
    pub token_id: String,
    pub currency_address: String,
    pub price: BigDecimal,
    pub block_number: i64,
    pub tx_hash: String,
    pub event_index: i64,
    pub event_time: i64,
}

pub async fn insert_ignore_conflicts(
    ex: &mut PgConnection,
    tables: &Tables,
    activity: &Activity,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{}\" \
           (activity_type, maker, taker, collection_address, token_id, \
            currency_address, price, block_number, tx_hash, event_index, event_time) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         ON CONFLICT (tx_hash, event_index) DO NOTHING;",
        tables.activities()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(activity.activity_type)
            .bind(&activity.maker)
            .bind(&activity.taker)
            .bind(&activity.collection_address)
            .bind(&activity.token_id)
            .bind(&activity.currency_address)
            .bind(&activity.price)
            .bind(activity.block_number)
            .bind(&activity.tx_hash)
            .bind(activity.event_index)
            .bind(activity.event_time),
    )
    .await?;
    Ok(())
}

pub async fn fetch_by_tx(
    ex: &mut PgConnection,
    tables: &Tables,
    tx_hash: &str,
) -> Result<Vec<Activity>, sqlx::Error> {
    let query = format!(
        "SELECT activity_type, maker, taker, collection_address, token_id, \
                currency_address, price, block_number, tx_hash, event_index, event_time \
         FROM \"{}\" WHERE tx_hash = $1 ORDER BY event_index;",
        tables.activities()
    );
    sqlx::query_as(&query).bind(tx_hash).fetch_all(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::Connection,
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_repeated_activity_insert_ignored() {
        let tables = crate::Tables::new("test");
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        crate::testing::create_schema(&mut db, &tables).await.unwrap();
        let mut db = db.begin().await.unwrap();

        let activity = Activity {
            activity_type: ActivityKind::Sale,
            tx_hash: "0x11".to_string(),
            event_index: 3,
            price: BigDecimal::from(7u32),
            ..Default::default()
        };
        for _ in 0..2 {
            insert_ignore_conflicts(&mut db, &tables, &activity).await.unwrap();
        }
        // A different log of the same transaction is a different activity.
        let second = Activity {
            event_index: 4,
            ..activity.clone()
        };
        insert_ignore_conflicts(&mut db, &tables, &second).await.unwrap();

        let stored = fetch_by_tx(&mut db, &tables, "0x11").await.unwrap();
        assert_eq!(stored, vec![activity, second]);
    }
}
