use {
    crate::Tables,
    bigdecimal::BigDecimal,
    sqlx::{Executor, PgConnection},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i32)]
pub enum OrderType {
    #[default]
    Listing = 1,
    CollectionBid = 2,
    ItemBid = 3,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::Type)]
#[repr(i32)]
pub enum OrderStatus {
    #[default]
    Active = 0,
    Filled = 1,
    Cancelled = 2,
    Expired = 3,
}

/// The only marketplace this indexer writes; other ids belong to aggregated
/// external marketplaces.
pub const MARKETPLACE_ORDER_BOOK: i32 = 1;

/// One row in the `orders_<chain>` table. Identifiers and addresses are
/// stored as text: order ids as lower-case `0x` hex, addresses in the
/// checksummed form downstream services display directly.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct Order {
    pub order_id: String,
    pub collection_address: String,
    pub token_id: String,
    pub marketplace_id: i32,
    pub currency_address: String,
    pub maker: String,
    pub taker: String,
    pub price: BigDecimal,
    pub quantity_remaining: i64,
    pub size: i64,
    pub order_type: OrderType,
    pub order_status: OrderStatus,
    pub expire_time: i64,
    pub event_time: i64,
    pub salt: i64,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            order_id: Default::default(),
            collection_address: Default::default(),
            token_id: Default::default(),
            marketplace_id: MARKETPLACE_ORDER_BOOK,
            currency_address: Default::default(),
            maker: Default::default(),
            taker: Default::default(),
            price: Default::default(),
            quantity_remaining: Default::default(),
            size: Default::default(),
            order_type: Default::default(),
            order_status: Default::default(),
            expire_time: Default::default(),
            event_time: Default::default(),
            salt: Default::default(),
        }
    }
}

const COLUMNS: &str = "order_id, collection_address, token_id, marketplace_id, \
                       currency_address, maker, taker, price, quantity_remaining, size, \
                       order_type, order_status, expire_time, event_time, salt";

/// Replayed windows re-insert the same `order_id`; the conflict is ignored so
/// later status transitions are not clobbered by the stale `Make` image.
pub async fn insert_ignore_conflicts(
    ex: &mut PgConnection,
    tables: &Tables,
    order: &Order,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{}\" ({COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         ON CONFLICT (order_id) DO NOTHING;",
        tables.orders()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(&order.order_id)
            .bind(&order.collection_address)
            .bind(&order.token_id)
            .bind(order.marketplace_id)
            .bind(&order.currency_address)
            .bind(&order.maker)
            .bind(&order.taker)
            .bind(&order.price)
            .bind(order.quantity_remaining)
            .bind(order.size)
            .bind(order.order_type)
            .bind(order.order_status)
            .bind(order.expire_time)
            .bind(order.event_time)
            .bind(order.salt),
    )
    .await?;
    Ok(())
}

pub async fn fetch(
    ex: &mut PgConnection,
    tables: &Tables,
    order_id: &str,
) -> Result<Option<Order>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM \"{}\" WHERE order_id = $1;",
        tables.orders()
    );
    sqlx::query_as(&query).bind(order_id).fetch_optional(ex).await
}

pub async fn set_cancelled(
    ex: &mut PgConnection,
    tables: &Tables,
    order_id: &str,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE \"{}\" SET order_status = $2 WHERE order_id = $1;",
        tables.orders()
    );
    let result = ex
        .execute(sqlx::query(&query).bind(order_id).bind(OrderStatus::Cancelled))
        .await?;
    Ok(result.rows_affected())
}

/// A match always consumes the sell side completely.
pub async fn fill_sell_side(
    ex: &mut PgConnection,
    tables: &Tables,
    order_id: &str,
    taker: &str,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE \"{}\" \
         SET order_status = $2, quantity_remaining = 0, taker = $3 \
         WHERE order_id = $1;",
        tables.orders()
    );
    let result = ex
        .execute(
            sqlx::query(&query)
                .bind(order_id)
                .bind(OrderStatus::Filled)
                .bind(taker),
        )
        .await?;
    Ok(result.rows_affected())
}

/// One unit of a multi-unit bid was consumed but the bid stays active.
pub async fn set_remaining(
    ex: &mut PgConnection,
    tables: &Tables,
    order_id: &str,
    quantity_remaining: i64,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE \"{}\" SET quantity_remaining = $2 WHERE order_id = $1;",
        tables.orders()
    );
    let result = ex
        .execute(sqlx::query(&query).bind(order_id).bind(quantity_remaining))
        .await?;
    Ok(result.rows_affected())
}

/// The last unit of the buy side was consumed.
pub async fn fill_buy_side(
    ex: &mut PgConnection,
    tables: &Tables,
    order_id: &str,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE \"{}\" \
         SET order_status = $2, quantity_remaining = 0 \
         WHERE order_id = $1;",
        tables.orders()
    );
    let result = ex
        .execute(sqlx::query(&query).bind(order_id).bind(OrderStatus::Filled))
        .await?;
    Ok(result.rows_affected())
}
