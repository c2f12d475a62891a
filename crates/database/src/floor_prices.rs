use {
    crate::Tables,
    bigdecimal::BigDecimal,
    sqlx::{Executor, PgConnection},
};

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct FloorPrice {
    pub collection_address: String,
    pub price: BigDecimal,
    pub event_time: i64,
}

/// Current floor per collection: the cheapest active, unexpired listing whose
/// maker still owns the listed item. Orders store formatter-cased addresses
/// while the item table stores lower-cased comparison keys, so the join
/// lower-cases the order side.
pub async fn query_current_floors(
    ex: &mut PgConnection,
    tables: &Tables,
    now: i64,
) -> Result<Vec<FloorPrice>, sqlx::Error> {
    let query = format!(
        "SELECT i.collection_address, MIN(o.price) AS price, $1::bigint AS event_time \
         FROM \"{items}\" i \
         JOIN \"{orders}\" o \
           ON LOWER(o.collection_address) = i.collection_address \
          AND o.token_id = i.token_id \
         WHERE o.order_type = $2 \
           AND o.order_status = $3 \
           AND o.expire_time > $1 \
           AND LOWER(o.maker) = i.owner \
         GROUP BY i.collection_address;",
        items = tables.items(),
        orders = tables.orders(),
    );
    sqlx::query_as(&query)
        .bind(now)
        .bind(crate::orders::OrderType::Listing)
        .bind(crate::orders::OrderStatus::Active)
        .fetch_all(ex)
        .await
}

/// Persists one batch of snapshots. Snapshots are keyed by
/// `(collection_address, event_time)`; re-running a tick is a no-op.
pub async fn upsert_snapshots(
    ex: &mut PgConnection,
    tables: &Tables,
    snapshots: &[FloorPrice],
) -> Result<(), sqlx::Error> {
    if snapshots.is_empty() {
        return Ok(());
    }
    let values = (0..snapshots.len())
        .map(|i| format!("(${}, ${}, ${})", i * 3 + 1, i * 3 + 2, i * 3 + 3))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "INSERT INTO \"{}\" (collection_address, price, event_time) \
         VALUES {values} \
         ON CONFLICT (collection_address, event_time) DO NOTHING;",
        tables.floor_prices(),
    );
    let mut insert = sqlx::query(&query);
    for snapshot in snapshots {
        insert = insert
            .bind(&snapshot.collection_address)
            .bind(&snapshot.price)
            .bind(snapshot.event_time);
    }
    ex.execute(insert).await?;
    Ok(())
}

/// Drops snapshots that fell out of the retention window.
pub async fn delete_older_than(
    ex: &mut PgConnection,
    tables: &Tables,
    cutoff: i64,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "DELETE FROM \"{}\" WHERE event_time < $1;",
        tables.floor_prices()
    );
    let result = ex.execute(sqlx::query(&query).bind(cutoff)).await?;
    Ok(result.rows_affected())
}

pub async fn fetch_all(
    ex: &mut PgConnection,
    tables: &Tables,
) -> Result<Vec<FloorPrice>, sqlx::Error> {
    let query = format!(
        "SELECT collection_address, price, event_time \
         FROM \"{}\" ORDER BY collection_address, event_time;",
        tables.floor_prices()
    );
    sqlx::query_as(&query).fetch_all(ex).await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            items::{self, Item},
            orders::{self, Order, OrderStatus, OrderType},
        },
        sqlx::Connection,
    };

    async fn listing(
        db: &mut PgConnection,
        tables: &Tables,
        id: &str,
        token_id: &str,
        price: u64,
        maker: &str,
        expire_time: i64,
    ) {
        orders::insert_ignore_conflicts(
            db,
            tables,
            &Order {
                order_id: id.to_string(),
                collection_address: "0xCoLLeCtIoN".to_string(),
                token_id: token_id.to_string(),
                maker: maker.to_string(),
                price: BigDecimal::from(price),
                quantity_remaining: 1,
                size: 1,
                order_type: OrderType::Listing,
                order_status: OrderStatus::Active,
                expire_time,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_floor_snapshot_flow() {
        let tables = crate::Tables::new("test");
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        crate::testing::create_schema(&mut db, &tables).await.unwrap();
        let mut db = db.begin().await.unwrap();

        for token_id in ["1", "2", "3"] {
            items::insert_ignore_conflicts(
                &mut db,
                &tables,
                &Item {
                    collection_address: "0xcollection".to_string(),
                    token_id: token_id.to_string(),
                    owner: "0xmaker".to_string(),
                },
            )
            .await
            .unwrap();
        }

        let now = 10_000;
        listing(&mut db, &tables, "0x1", "1", 500, "0xMaKeR", now + 100).await;
        listing(&mut db, &tables, "0x2", "2", 300, "0xMaKeR", now + 100).await;
        // Expired, so it cannot set the floor.
        listing(&mut db, &tables, "0x3", "3", 100, "0xMaKeR", now - 100).await;

        let floors = query_current_floors(&mut db, &tables, now).await.unwrap();
        assert_eq!(
            floors,
            vec![FloorPrice {
                collection_address: "0xcollection".to_string(),
                price: BigDecimal::from(300u32),
                event_time: now,
            }]
        );

        upsert_snapshots(&mut db, &tables, &floors).await.unwrap();
        // A repeated tick at the same timestamp is absorbed.
        upsert_snapshots(&mut db, &tables, &floors).await.unwrap();
        assert_eq!(fetch_all(&mut db, &tables).await.unwrap().len(), 1);

        assert_eq!(delete_older_than(&mut db, &tables, now + 1).await.unwrap(), 1);
        assert!(fetch_all(&mut db, &tables).await.unwrap().is_empty());
    }
}
