use {
    crate::INDEXED_STATUS_TABLE,
    sqlx::{Executor, PgConnection},
};

/// Partitions the shared cursor table between the independent scanners.
///
/// Each scanner owns exactly one `(chain_id, index_type)` row. The values are
/// part of the persisted state, so they must never be reused across scanners.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexType {
    OrderBook = 6,
    Erc20 = 7,
}

impl IndexType {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderBook => "order_book",
            Self::Erc20 => "erc20",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct Cursor {
    pub last_indexed_block: i64,
    pub last_indexed_time: i64,
}

/// Returns the scanner's cursor, or `None` if it was never seeded. Seeding
/// happens externally; a missing row is fatal to the owning scanner.
pub async fn fetch(
    ex: &mut PgConnection,
    chain_id: i64,
    index_type: IndexType,
) -> Result<Option<Cursor>, sqlx::Error> {
    let query = format!(
        "SELECT last_indexed_block, last_indexed_time \
         FROM {INDEXED_STATUS_TABLE} \
         WHERE chain_id = $1 AND index_type = $2;"
    );
    sqlx::query_as(&query)
        .bind(chain_id)
        .bind(index_type.as_i64())
        .fetch_optional(ex)
        .await
}

/// Moves the cursor to `next_block` after a fully projected window. Returns
/// the number of updated rows; 0 means the cursor row vanished, which callers
/// treat as fatal.
pub async fn advance(
    ex: &mut PgConnection,
    chain_id: i64,
    index_type: IndexType,
    next_block: i64,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE {INDEXED_STATUS_TABLE} \
         SET last_indexed_block = $3 \
         WHERE chain_id = $1 AND index_type = $2;"
    );
    let result = ex
        .execute(
            sqlx::query(&query)
                .bind(chain_id)
                .bind(index_type.as_i64())
                .bind(next_block),
        )
        .await?;
    Ok(result.rows_affected())
}

/// Seeds a cursor row. Used by tests; production rows are provisioned by the
/// deployment tooling.
pub async fn seed(
    ex: &mut PgConnection,
    chain_id: i64,
    index_type: IndexType,
    cursor: Cursor,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO {INDEXED_STATUS_TABLE} \
           (chain_id, index_type, last_indexed_block, last_indexed_time) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (chain_id, index_type) \
         DO UPDATE SET last_indexed_block = EXCLUDED.last_indexed_block, \
                       last_indexed_time = EXCLUDED.last_indexed_time;"
    );
    ex.execute(
        sqlx::query(&query)
            .bind(chain_id)
            .bind(index_type.as_i64())
            .bind(cursor.last_indexed_block)
            .bind(cursor.last_indexed_time),
    )
    .await?;
    Ok(())
}
